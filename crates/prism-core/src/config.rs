//! Pull-based configuration cache.
//!
//! Configuration is fetched from a collaborator on demand and cached per
//! `(section, scope)` pair. Environments without dynamic configuration push a
//! single global blob instead; every consumer reads through [`ConfigCache::get`]
//! either way and never learns which mode is active.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tower_lsp_server::ls_types::Uri;

use crate::error::Result;

/// Collaborator that resolves configuration values.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Whether the environment supports per-document configuration pulls.
    fn supports_pull(&self) -> bool;

    /// Fetches the value of `section` scoped to `scope`, or
    /// `ConfigUnavailable` when the collaborator cannot resolve it.
    async fn fetch(&self, section: &str, scope: Option<&Uri>) -> Result<Value>;
}

/// Cache over a [`ConfigSource`] with a pushed-global fallback.
///
/// A failed fetch degrades to the global blob's section (and finally to
/// `Value::Null`) instead of failing the surrounding request.
pub struct ConfigCache {
    source: Arc<dyn ConfigSource>,
    values: DashMap<(String, Option<Uri>), Value>,
    global: RwLock<Value>,
}

impl ConfigCache {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            values: DashMap::new(),
            global: RwLock::new(Value::Null),
        }
    }

    /// Reads the configuration value for `section`, scoped to a document.
    ///
    /// Never fails: unresolvable configuration falls back to the pushed
    /// global blob, then to `Value::Null`.
    pub async fn get(&self, section: &str, scope: Option<&Uri>) -> Value {
        let key = (section.to_string(), scope.cloned());
        if let Some(value) = self.values.get(&key) {
            return value.clone();
        }

        if self.source.supports_pull() {
            match self.source.fetch(section, scope).await {
                Ok(value) => {
                    self.values.insert(key, value.clone());
                    return value;
                }
                Err(error) => {
                    tracing::debug!("config fetch failed for {}: {}", section, error);
                }
            }
        }

        self.global_section(section)
    }

    /// Drops every cached value. The next `get` per key re-fetches.
    pub fn invalidate_all(&self) {
        self.values.clear();
    }

    /// Drops cached values scoped to one document (used on close).
    pub fn evict(&self, uri: &Uri) {
        self.values
            .retain(|(_, scope), _| scope.as_ref() != Some(uri));
    }

    /// Replaces the pushed global configuration blob.
    pub fn set_global(&self, value: Value) {
        *self.global.write().unwrap() = value;
    }

    /// Re-fetches every previously cached key after a change signal.
    ///
    /// Used in pull mode so all open documents observe new values without
    /// waiting for their next lazy read.
    pub async fn refresh(&self) {
        let keys: Vec<(String, Option<Uri>)> = self
            .values
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        self.values.clear();
        for (section, scope) in keys {
            let _ = self.get(&section, scope.as_ref()).await;
        }
    }

    fn global_section(&self, section: &str) -> Value {
        let global = self.global.read().unwrap();
        // Dotted sections walk nested objects, matching scoped settings
        // payloads ({"prism": {"validate": true}} for "prism.validate").
        let mut current = &*global;
        for part in section.split('.') {
            match current.get(part) {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }
        current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::error::CoreError;

    struct StubSource {
        pull: AtomicBool,
        fail: AtomicBool,
        fetches: AtomicUsize,
    }

    impl StubSource {
        fn new(pull: bool) -> Arc<Self> {
            Arc::new(Self {
                pull: AtomicBool::new(pull),
                fail: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConfigSource for StubSource {
        fn supports_pull(&self) -> bool {
            self.pull.load(Ordering::SeqCst)
        }

        async fn fetch(&self, section: &str, scope: Option<&Uri>) -> Result<Value> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::ConfigUnavailable {
                    section: section.into(),
                });
            }
            Ok(json!({
                "section": section,
                "scoped": scope.is_some(),
            }))
        }
    }

    fn uri(path: &str) -> Uri {
        Uri::from_file_path(path).unwrap()
    }

    #[tokio::test]
    async fn test_pull_mode_fetches_and_caches() {
        let source = StubSource::new(true);
        let cache = ConfigCache::new(source.clone());
        let scope = uri("/doc.html");

        let first = cache.get("prism.validate", Some(&scope)).await;
        let second = cache.get("prism.validate", Some(&scope)).await;

        assert_eq!(first, second);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scopes_cached_independently() {
        let source = StubSource::new(true);
        let cache = ConfigCache::new(source.clone());

        cache.get("prism.validate", Some(&uri("/a.html"))).await;
        cache.get("prism.validate", Some(&uri("/b.html"))).await;
        cache.get("prism.validate", None).await;

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_push_mode_reads_global_blob() {
        let source = StubSource::new(false);
        let cache = ConfigCache::new(source.clone());
        cache.set_global(json!({"prism": {"validate": {"enabled": false}}}));

        let value = cache.get("prism.validate", None).await;
        assert_eq!(value, json!({"enabled": false}));
        // No pulls happen in push mode.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_degrades_to_global_then_null() {
        let source = StubSource::new(true);
        source.fail.store(true, Ordering::SeqCst);
        let cache = ConfigCache::new(source.clone());

        assert_eq!(cache.get("prism.validate", None).await, Value::Null);

        cache.set_global(json!({"prism": {"validate": true}}));
        assert_eq!(cache.get("prism.validate", None).await, json!(true));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = StubSource::new(true);
        let cache = ConfigCache::new(source.clone());

        cache.get("prism.validate", None).await;
        cache.invalidate_all();
        cache.get("prism.validate", None).await;

        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_drops_only_that_scope() {
        let source = StubSource::new(true);
        let cache = ConfigCache::new(source.clone());
        let kept = uri("/kept.html");
        let closed = uri("/closed.html");

        cache.get("prism.validate", Some(&kept)).await;
        cache.get("prism.validate", Some(&closed)).await;
        cache.evict(&closed);

        cache.get("prism.validate", Some(&kept)).await;
        cache.get("prism.validate", Some(&closed)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refresh_refetches_known_keys() {
        let source = StubSource::new(true);
        let cache = ConfigCache::new(source.clone());

        cache.get("prism.validate", Some(&uri("/a.html"))).await;
        cache.get("prism.format", None).await;
        cache.refresh().await;

        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);
    }
}
