//! Cached pack loading.
//!
//! The cache is a read-mostly map guarded by an RW-lock; entries are keyed
//! `"{namespace}/{pack}"` and only served when their version matches the
//! requested one. Invalidation is O(1) and externally triggered (the
//! deployment layer watches pack documents for changes).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use omnia_domain::error::{Error, Result};
use omnia_domain::evals::{EvalDefinition, EvalTrigger, PromptPackEvals};

use crate::document::PackDocument;
use crate::source::PackSource;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PackLoader
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loads and caches eval definitions from pack documents.
pub struct PackLoader {
    source: Arc<dyn PackSource>,
    cache: RwLock<HashMap<String, PromptPackEvals>>,
}

impl PackLoader {
    pub fn new(source: Arc<dyn PackSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load the evals of `(namespace, pack_name)` at `pack_version`.
    ///
    /// Serves from cache when the cached entry's version matches the
    /// requested one; otherwise refetches from the source. An empty
    /// `pack_version` accepts whatever version the source currently holds.
    pub async fn load_evals(
        &self,
        namespace: &str,
        pack_name: &str,
        pack_version: &str,
    ) -> Result<PromptPackEvals> {
        let key = cache_key(namespace, pack_name);

        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&key) {
                if pack_version.is_empty() || entry.pack_version == pack_version {
                    return Ok(entry.clone());
                }
            }
        }

        // Miss or version drift — refetch outside the lock.
        let raw = self.source.fetch(namespace, pack_name).await?;
        let doc = PackDocument::parse(&key, &raw)?;

        if !pack_version.is_empty() && doc.version != pack_version {
            return Err(Error::pack(
                &key,
                format!("version mismatch: requested {pack_version}, document has {}", doc.version),
            ));
        }

        let evals = doc.into_evals(pack_name);
        tracing::debug!(
            pack = %key,
            version = %evals.pack_version,
            evals = evals.evals.len(),
            "pack evals loaded"
        );

        self.cache.write().insert(key, evals.clone());
        Ok(evals)
    }

    /// Drop the cached entry for `(namespace, pack_name)`, if any.
    pub fn invalidate_cache(&self, namespace: &str, pack_name: &str) {
        self.cache.write().remove(&cache_key(namespace, pack_name));
    }

    /// Number of cached packs (for introspection/tests).
    pub fn cached_packs(&self) -> usize {
        self.cache.read().len()
    }
}

fn cache_key(namespace: &str, pack_name: &str) -> String {
    format!("{namespace}/{pack_name}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger filtering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Select the evals matching `trigger`.
///
/// `None` returns a copy of all evals. The returned vec is always an owned
/// copy — mutating it never touches the cached entry.
pub fn filter_evals_by_trigger(
    evals: &[EvalDefinition],
    trigger: Option<EvalTrigger>,
) -> Vec<EvalDefinition> {
    match trigger {
        None => evals.to_vec(),
        Some(t) => evals.iter().filter(|e| e.trigger == t).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// In-memory source that counts fetches.
    struct CountingSource {
        raw: String,
        fetches: AtomicUsize,
    }

    impl CountingSource {
        fn new(raw: &str) -> Arc<Self> {
            Arc::new(Self {
                raw: raw.to_owned(),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PackSource for CountingSource {
        async fn fetch(&self, _namespace: &str, _pack_name: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.raw.clone())
        }
    }

    const RAW: &str = r#"{
        "id": "p", "version": "v1",
        "evals": [
            {"id": "e1", "type": "contains", "trigger": "per_turn", "params": {"value": "x"}},
            {"id": "e2", "type": "max_length", "trigger": "on_session_complete",
             "params": {"maxLength": 100}}
        ],
        "pack_assertions": [{"type": "tools_called", "params": {}}]
    }"#;

    #[tokio::test]
    async fn second_load_hits_cache() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source.clone());

        let first = loader.load_evals("prod", "p", "v1").await.unwrap();
        let second = loader.load_evals("prod", "p", "v1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1, "cache hit must not refetch");
    }

    #[tokio::test]
    async fn version_drift_refetches() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source.clone());

        loader.load_evals("prod", "p", "v1").await.unwrap();
        // Requesting a version the document doesn't have errors out, but it
        // must have gone back to the source to find out.
        let err = loader.load_evals("prod", "p", "v2").await.unwrap_err();
        assert!(matches!(err, Error::Pack { .. }));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_version_accepts_current_document() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source);
        let evals = loader.load_evals("prod", "p", "").await.unwrap();
        assert_eq!(evals.pack_version, "v1");
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source.clone());

        loader.load_evals("prod", "p", "v1").await.unwrap();
        loader.invalidate_cache("prod", "p");
        loader.load_evals("prod", "p", "v1").await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(loader.cached_packs(), 1);
    }

    #[tokio::test]
    async fn filter_matches_trigger_only() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source);
        let pack = loader.load_evals("prod", "p", "v1").await.unwrap();

        let per_turn = filter_evals_by_trigger(&pack.evals, Some(EvalTrigger::PerTurn));
        assert_eq!(per_turn.len(), 1);
        assert_eq!(per_turn[0].id, "e1");

        // Converted assertions land on on_session_complete.
        let on_complete =
            filter_evals_by_trigger(&pack.evals, Some(EvalTrigger::OnSessionComplete));
        assert_eq!(on_complete.len(), 2);
    }

    #[tokio::test]
    async fn filter_none_returns_detached_copy() {
        let source = CountingSource::new(RAW);
        let loader = PackLoader::new(source);
        let pack = loader.load_evals("prod", "p", "v1").await.unwrap();

        let mut all = filter_evals_by_trigger(&pack.evals, None);
        assert_eq!(all.len(), pack.evals.len());
        all[0].id = "mutated".into();

        // The cached entry is untouched.
        let again = loader.load_evals("prod", "p", "v1").await.unwrap();
        assert_eq!(again.evals[0].id, "e1");
    }
}
