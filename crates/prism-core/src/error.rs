use thiserror::Error;
use tower_lsp_server::ls_types::Uri;

use crate::provider::Feature;

/// Error types for the prism dispatch core.
///
/// Store-level errors (`UnknownDocument`, `StaleVersion`) fail the specific
/// operation and are surfaced to the transport layer as request errors.
/// `ProviderFailure` never escapes an aggregated request: the dispatcher
/// catches it per provider, logs it, and drops that provider's contribution.
///
/// # Examples
///
/// ```
/// use prism_core::error::{CoreError, Result};
/// use tower_lsp_server::ls_types::Uri;
///
/// fn bump(uri: &Uri, current: i32, proposed: i32) -> Result<i32> {
///     if proposed <= current {
///         return Err(CoreError::StaleVersion {
///             uri: uri.clone(),
///             current,
///             proposed,
///         });
///     }
///     Ok(proposed)
/// }
/// ```
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown document: {uri:?}")]
    UnknownDocument { uri: Uri },

    #[error("stale version for {uri:?}: proposed {proposed}, current {current}")]
    StaleVersion {
        uri: Uri,
        current: i32,
        proposed: i32,
    },

    #[error("provider {provider} failed during {feature:?}: {message}")]
    ProviderFailure {
        provider: &'static str,
        feature: Feature,
        message: String,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("configuration unavailable for section {section}")]
    ConfigUnavailable { section: String },
}

/// Convenience type alias for `Result<T, CoreError>`.
///
/// This is the standard `Result` type used throughout the prism codebase.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_document_display() {
        let uri = Uri::from_file_path("/test/page.html").unwrap();
        let error = CoreError::UnknownDocument { uri };
        assert!(error.to_string().starts_with("unknown document"));
    }

    #[test]
    fn test_stale_version_display() {
        let uri = Uri::from_file_path("/test/page.html").unwrap();
        let error = CoreError::StaleVersion {
            uri,
            current: 7,
            proposed: 3,
        };
        let text = error.to_string();
        assert!(text.contains("proposed 3"));
        assert!(text.contains("current 7"));
    }

    #[test]
    fn test_provider_failure_display() {
        let error = CoreError::ProviderFailure {
            provider: "style",
            feature: Feature::Diagnostics,
            message: "parser exploded".into(),
        };
        let text = error.to_string();
        assert!(text.contains("style"));
        assert!(text.contains("Diagnostics"));
        assert!(text.contains("parser exploded"));
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(CoreError::Cancelled.to_string(), "request cancelled");
    }

    #[test]
    fn test_config_unavailable_display() {
        let error = CoreError::ConfigUnavailable {
            section: "prism.validation".into(),
        };
        assert!(error.to_string().contains("prism.validation"));
    }
}
