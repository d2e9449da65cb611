use std::sync::Arc;

use crate::provider::{Feature, LanguageProvider};

/// Ordered registry of language-feature providers.
///
/// Registration order is significant: first-match policies (hover,
/// definition) and conflict tie-breaks (rename) resolve in favour of
/// earlier-registered providers. The registry is built once at startup and
/// append-only; it holds no per-document state.
///
/// # Examples
///
/// ```no_run
/// use prism_core::registry::ProviderRegistry;
/// use prism_core::provider::Feature;
/// use std::sync::Arc;
///
/// let mut registry = ProviderRegistry::new();
/// // registry.register(Arc::new(StyleProvider::new()));
/// // registry.register(Arc::new(MarkupProvider::new()));
///
/// for provider in registry.providers_for(Feature::Hover, "css") {
///     println!("hover candidate: {}", provider.id());
/// }
/// ```
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn LanguageProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Appends a provider. Later registrations rank after earlier ones.
    pub fn register(&mut self, provider: Arc<dyn LanguageProvider>) {
        tracing::debug!("registered provider: {}", provider.id());
        self.providers.push(provider);
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true when no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Looks a provider up by its identifier.
    pub fn by_id(&self, id: &str) -> Option<Arc<dyn LanguageProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .map(Arc::clone)
    }

    /// Providers implementing `feature` for `content_type`, in registration
    /// order.
    pub fn providers_for(
        &self,
        feature: Feature,
        content_type: &str,
    ) -> Vec<Arc<dyn LanguageProvider>> {
        self.providers
            .iter()
            .filter(|provider| provider.implements(feature) && provider.handles(content_type))
            .map(Arc::clone)
            .collect()
    }

    /// Providers implementing `feature` for any of the given content types,
    /// in registration order and without duplicates.
    pub fn providers_for_any(
        &self,
        feature: Feature,
        content_types: &[String],
    ) -> Vec<Arc<dyn LanguageProvider>> {
        self.providers
            .iter()
            .filter(|provider| {
                provider.implements(feature)
                    && content_types.iter().any(|ct| provider.handles(ct))
            })
            .map(Arc::clone)
            .collect()
    }

    /// Providers implementing `feature` regardless of content type, in
    /// registration order. Used for document-agnostic requests such as
    /// file renames.
    pub fn providers_with(&self, feature: Feature) -> Vec<Arc<dyn LanguageProvider>> {
        self.providers
            .iter()
            .filter(|provider| provider.implements(feature))
            .map(Arc::clone)
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
