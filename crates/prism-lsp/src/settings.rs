use serde::Deserialize;

/// Initialization options for the prism server.
///
/// Provided by the client as `initializationOptions` and captured once: the
/// dispatch engine reads the resulting options for the rest of the session,
/// and only a full re-initialization changes them.
///
/// # Examples
///
/// ```
/// use prism_lsp::settings::ServerSettings;
///
/// let json = r#"{
///     "filterIncompleteCompletions": false,
///     "definitionLinkSupport": true
/// }"#;
///
/// let settings: ServerSettings = serde_json::from_str(json).unwrap();
/// assert!(!settings.filter_incomplete_completions);
/// assert_eq!(settings.definition_link_support, Some(true));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    /// Drop speculative completion candidates shadowed by a complete
    /// candidate with the same insertion text.
    #[serde(default = "default_true")]
    pub filter_incomplete_completions: bool,

    /// Override for `LocationLink` definition results. When unset, the
    /// client's declared capability decides.
    #[serde(default)]
    pub definition_link_support: Option<bool>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            filter_incomplete_completions: default_true(),
            definition_link_support: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ServerSettings::default();
        assert!(settings.filter_incomplete_completions);
        assert!(settings.definition_link_support.is_none());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings: ServerSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.filter_incomplete_completions);
        assert!(settings.definition_link_support.is_none());
    }

    #[test]
    fn test_camel_case_field_names() {
        let settings: ServerSettings =
            serde_json::from_str(r#"{"filterIncompleteCompletions": false}"#).unwrap();
        assert!(!settings.filter_incomplete_completions);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let settings: ServerSettings =
            serde_json::from_str(r#"{"somethingElse": 42}"#).unwrap();
        assert!(settings.filter_incomplete_completions);
    }
}
