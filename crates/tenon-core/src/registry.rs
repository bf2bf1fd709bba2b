//! Component registry.
//!
//! Maps logical component names to instances. Registration order is
//! remembered so shutdown can close components in reverse dependency
//! order. Registering calls [`Component::bind`] with the runtime handle
//! so components can emit and make requests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::component::Component;
use crate::runtime::ComponentHandle;

/// Name -> instance map for all registered components.
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, Arc<dyn Component>>>,
    order: RwLock<Vec<String>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Register a component and hand it the runtime handle.
    ///
    /// Re-registering a name replaces the old instance (with a warning).
    pub fn register(&self, component: Arc<dyn Component>, handle: ComponentHandle) {
        let name = component.name().to_string();
        component.bind(handle);

        let mut components = self.components.write().expect("registry lock poisoned");
        if components.insert(name.clone(), component).is_some() {
            warn!(component = %name, "replaced existing component registration");
        } else {
            self.order
                .write()
                .expect("registry lock poisoned")
                .push(name.clone());
        }
        debug!(component = %name, "component registered");
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Whether a component is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.components
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.read().expect("registry lock poisoned").clone()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components
            .read()
            .expect("registry lock poisoned")
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First registered component of input kind, used by the main loop.
    pub fn input_component(&self) -> Option<Arc<dyn Component>> {
        let order = self.order.read().expect("registry lock poisoned");
        let components = self.components.read().expect("registry lock poisoned");
        order
            .iter()
            .filter_map(|name| components.get(name))
            .find(|c| c.kind() == tenon_types::spec::ComponentKind::Input)
            .cloned()
    }

    /// Close every component, newest-registered first. Component close
    /// failures are logged, not propagated; closing is best-effort.
    pub async fn close_all(&self) {
        let names: Vec<String> = {
            let order = self.order.read().expect("registry lock poisoned");
            order.iter().rev().cloned().collect()
        };
        for name in names {
            let component = self.get(&name);
            if let Some(component) = component {
                debug!(component = %name, "closing component");
                if let Err(e) = component.close().await {
                    warn!(component = %name, error = %e, "component close failed");
                }
            }
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentInput;
    use crate::runtime::Runtime;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tenon_types::Result;
    use tenon_types::spec::ComponentKind;

    struct Probe {
        name: String,
        kind: ComponentKind,
        closes: Arc<AtomicUsize>,
        close_log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Component for Probe {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> ComponentKind {
            self.kind
        }
        async fn input(&self, _input: ComponentInput) -> Result<Option<Value>> {
            Ok(None)
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.close_log.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    fn probe(
        name: &str,
        kind: ComponentKind,
        closes: &Arc<AtomicUsize>,
        log: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> Arc<dyn Component> {
        Arc::new(Probe {
            name: name.into(),
            kind,
            closes: closes.clone(),
            close_log: log.clone(),
        })
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let runtime = Runtime::empty();
        let registry = runtime.registry();
        let closes = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        registry.register(
            probe("a", ComponentKind::Agent, &closes, &log),
            runtime.handle().component_handle("a", ComponentKind::Agent),
        );

        assert!(registry.contains("a"));
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn close_all_runs_in_reverse_order() {
        let runtime = Runtime::empty();
        let registry = runtime.registry();
        let closes = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            registry.register(
                probe(name, ComponentKind::Tool, &closes, &log),
                runtime.handle().component_handle(name, ComponentKind::Tool),
            );
        }

        registry.close_all().await;
        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["third", "second", "first"]
        );
    }

    #[tokio::test]
    async fn input_component_is_first_input_kind() {
        let runtime = Runtime::empty();
        let registry = runtime.registry();
        let closes = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        registry.register(
            probe("ag", ComponentKind::Agent, &closes, &log),
            runtime.handle().component_handle("ag", ComponentKind::Agent),
        );
        registry.register(
            probe("inp", ComponentKind::Input, &closes, &log),
            runtime.handle().component_handle("inp", ComponentKind::Input),
        );

        let input = registry.input_component().unwrap();
        assert_eq!(input.name(), "inp");
    }
}
