use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Response cache shared by every view in the process, keyed by
/// resource plus query string.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<CacheKey, Value>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: String,
    pub query: String,
}

impl CacheKey {
    pub fn new(resource: &str, query: &[(&str, &str)]) -> Self {
        let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        Self {
            resource: resource.trim_matches('/').to_string(),
            query: pairs.join("&"),
        }
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let hit = self.entries.read().await.get(key).cloned();
        if hit.is_some() {
            debug!(resource = %key.resource, query = %key.query, "cache hit");
        }
        hit
    }

    pub async fn put(&self, key: CacheKey, value: Value) {
        self.entries.write().await.insert(key, value);
    }

    /// Drops every cached query of `resource`.
    pub async fn invalidate(&self, resource: &str) {
        let resource = resource.trim_matches('/');
        let root = resource.split('/').next().unwrap_or(resource);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.resource.split('/').next() != Some(root));
        debug!(resource = root, dropped = before - entries.len(), "cache invalidated");
    }
}
