//! Capability cache.
//!
//! Caches a server's advertised tools/resources/prompts per
//! `(server, version, flags)` so agents composing their documentation do
//! not re-query. Invalidated only by an explicit refresh or close;
//! reads may return stale data during graceful shutdown, which is fine.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::metadata::Capabilities;
use crate::registry::FeatureFlags;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    server: String,
    version: String,
    flags: String,
}

fn key(server: &str, version: &str, flags: &FeatureFlags) -> CacheKey {
    CacheKey {
        server: server.to_string(),
        version: version.to_string(),
        flags: format!(
            "{}:{}",
            flags.toolsets.as_deref().unwrap_or("-"),
            flags.readonly.map_or("-".to_string(), |b| b.to_string())
        ),
    }
}

/// Cache of discovered server capabilities.
pub struct CapabilityCache {
    entries: RwLock<HashMap<CacheKey, Capabilities>>,
}

impl CapabilityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached capabilities for a server, if discovered.
    pub fn get(&self, server: &str, version: &str, flags: &FeatureFlags) -> Option<Capabilities> {
        self.entries
            .read()
            .expect("capability cache lock poisoned")
            .get(&key(server, version, flags))
            .cloned()
    }

    /// Store freshly discovered capabilities.
    pub fn store(
        &self,
        server: &str,
        version: &str,
        flags: &FeatureFlags,
        capabilities: Capabilities,
    ) {
        self.entries
            .write()
            .expect("capability cache lock poisoned")
            .insert(key(server, version, flags), capabilities);
    }

    /// Drop one server's entry. Used by `refresh_capabilities` and close.
    pub fn invalidate(&self, server: &str, version: &str, flags: &FeatureFlags) {
        self.entries
            .write()
            .expect("capability cache lock poisoned")
            .remove(&key(server, version, flags));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("capability cache lock poisoned")
            .clear();
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ToolInfo;

    fn caps(tool_names: &[&str]) -> Capabilities {
        Capabilities {
            tools: tool_names
                .iter()
                .map(|name| ToolInfo {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: None,
                })
                .collect(),
            resources: vec![],
            prompts: vec![],
        }
    }

    #[test]
    fn store_and_get() {
        let cache = CapabilityCache::new();
        let flags = FeatureFlags::default();
        assert!(cache.get("s", "1", &flags).is_none());

        cache.store("s", "1", &flags, caps(&["a", "b"]));
        let stored = cache.get("s", "1", &flags).unwrap();
        assert_eq!(stored.tools.len(), 2);
    }

    #[test]
    fn flags_are_part_of_the_key() {
        let cache = CapabilityCache::new();
        let default = FeatureFlags::default();
        let readonly = FeatureFlags {
            toolsets: None,
            readonly: Some(true),
        };

        cache.store("s", "1", &default, caps(&["everything"]));
        cache.store("s", "1", &readonly, caps(&["read_only_tool"]));

        assert_eq!(cache.get("s", "1", &default).unwrap().tools[0].name, "everything");
        assert_eq!(
            cache.get("s", "1", &readonly).unwrap().tools[0].name,
            "read_only_tool"
        );
    }

    #[test]
    fn invalidate_removes_one_entry() {
        let cache = CapabilityCache::new();
        let flags = FeatureFlags::default();
        cache.store("s", "1", &flags, caps(&["a"]));
        cache.store("other", "1", &flags, caps(&["b"]));

        cache.invalidate("s", "1", &flags);
        assert!(cache.get("s", "1", &flags).is_none());
        assert!(cache.get("other", "1", &flags).is_some());
    }

    #[test]
    fn clear_removes_everything() {
        let cache = CapabilityCache::new();
        let flags = FeatureFlags::default();
        cache.store("s", "1", &flags, caps(&["a"]));
        cache.clear();
        assert!(cache.get("s", "1", &flags).is_none());
    }
}
