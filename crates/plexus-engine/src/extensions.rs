//! Host-supplied context for a run
//!
//! `ProcessContext` carries what the host hands to `process_graph`: plain
//! settings readable by nodes and a typed extension map for runtime objects
//! that cannot be serialized (API clients, database handles, ...).
//!
//! # Example
//!
//! ```ignore
//! use plexus_engine::ProcessContext;
//! use std::sync::Arc;
//!
//! let mut context = ProcessContext::new();
//! context.extensions.set("http", Arc::new(reqwest::Client::new()));
//!
//! // In a node's process():
//! if let Some(client) = ctx.extension::<Arc<reqwest::Client>>("http") {
//!     client.get(url).send().await?;
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;

/// Typed extension map for injecting non-serializable dependencies
/// into graph execution.
pub struct Extensions {
    inner: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create an empty extension map.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Insert a typed value under the given key.
    ///
    /// If a value already exists for this key, it is replaced.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Box::new(value));
    }

    /// Get a reference to a typed value by key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

impl Default for Extensions {
    fn default() -> Self {
        Self::new()
    }
}

/// Context handed to a run by its host
#[derive(Default)]
pub struct ProcessContext {
    /// Free-form settings (API keys, model defaults, feature switches)
    pub settings: HashMap<String, serde_json::Value>,
    pub extensions: Extensions,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_type_mismatch_returns_none() {
        let mut ext = Extensions::new();
        ext.set("count", 42u32);

        assert!(ext.get::<String>("count").is_none());
        assert_eq!(ext.get::<u32>("count"), Some(&42));
    }

    #[test]
    fn test_context_settings_and_extensions() {
        let mut context = ProcessContext::new().with_setting("model", serde_json::json!("small"));
        context.extensions.set("data", Arc::new(vec![1, 2, 3]));

        assert_eq!(context.setting("model"), Some(&serde_json::json!("small")));
        let data = context.extensions.get::<Arc<Vec<i32>>>("data").unwrap();
        assert_eq!(data.as_ref(), &vec![1, 2, 3]);
        assert!(!context.extensions.has("missing"));
    }
}
