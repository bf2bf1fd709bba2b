//! The runtime: composition root and main loop.
//!
//! A [`Runtime`] owns one bus, one registry, one router, one dispatcher,
//! and one correlator. Components and callers interact through a
//! cloneable [`Handle`]; each component additionally gets a
//! [`ComponentHandle`] carrying its identity, bound at registration.
//!
//! Startup sequence, driven by the component specs the configuration
//! layer hands over:
//!
//! 1. Construct components in dependency order.
//! 2. Register each with the bus and wire the router.
//! 3. Validate routing (cycles and bad targets abort startup).
//! 4. Run blocking initialization with per-component timeouts.
//! 5. Enter the main loop: read the input component until it yields the
//!    exit sentinel, emitting `input.received` for each item.
//!
//! There is no global state: tests spin up fresh runtimes freely.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tenon_types::envelope::MessageEnvelope;
use tenon_types::payload::{InputReceived, events};
use tenon_types::spec::{ComponentKind, ComponentSpec};
use tenon_types::{Payload, Result, TenonError};

use crate::bus::{BusStats, EventBus, Listener};
use crate::component::{Component, ConsoleOutput};
use crate::delivery::{DeadLetter, DispatchStats, Dispatcher, dispatch, flush_queued};
use crate::payload::RawPayload;
use crate::registry::ComponentRegistry;
use crate::request::{
    Correlator, DEFAULT_REQUEST_TIMEOUT, RequestBuilder, RequestScope, StreamChunk, ask_user,
    request, request_multiple, request_stream,
};
use crate::router::{Router, RouterStats, Severity};
use crate::startup::{DEFAULT_STARTUP_TIMEOUT, StartupReport, run_startup};

/// Tunables for a runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Session identifier stamped on envelopes.
    pub session_id: String,
    /// Per-component blocking-initialization timeout.
    pub startup_timeout: Duration,
    /// Maximum queued envelopes per not-yet-registered target.
    pub max_queue_len: usize,
    /// How long shutdown waits for in-flight requests to drain.
    pub grace_period: Duration,
    /// Interval of the expired-envelope sweeper.
    pub sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_id: "default_session".into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            max_queue_len: 100,
            grace_period: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Builds components from their specs.
///
/// The runtime resolves dependency order and hands each factory call the
/// already-constructed dependencies. Implemented for closures.
pub trait ComponentFactory: Send + Sync {
    /// Construct the component described by `spec`.
    fn build(
        &self,
        spec: &ComponentSpec,
        deps: &HashMap<String, Arc<dyn Component>>,
    ) -> Result<Arc<dyn Component>>;
}

impl<F> ComponentFactory for F
where
    F: Fn(&ComponentSpec, &HashMap<String, Arc<dyn Component>>) -> Result<Arc<dyn Component>>
        + Send
        + Sync,
{
    fn build(
        &self,
        spec: &ComponentSpec,
        deps: &HashMap<String, Arc<dyn Component>>,
    ) -> Result<Arc<dyn Component>> {
        self(spec, deps)
    }
}

pub(crate) struct RuntimeInner {
    bus: EventBus,
    registry: ComponentRegistry,
    router: Router,
    dispatcher: Dispatcher,
    correlator: Arc<Correlator>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
    closed: AtomicBool,
    startup_report: std::sync::RwLock<StartupReport>,
}

/// Cloneable facade over one runtime's bus, router, and correlator.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<RuntimeInner>,
}

impl Handle {
    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    /// The declarative router.
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// The request correlator.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Session identifier stamped on outgoing envelopes.
    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Register a component: binds its [`ComponentHandle`], then
    /// redelivers anything queued for its name while it was absent.
    pub fn register_component(&self, component: Arc<dyn Component>) {
        let name = component.name().to_string();
        let kind = component.kind();
        self.inner
            .registry
            .register(component, self.component_handle(&name, kind));
        flush_queued(self, &name);
    }

    /// Build the identity-carrying handle for a component.
    pub fn component_handle(&self, name: &str, kind: ComponentKind) -> ComponentHandle {
        ComponentHandle {
            handle: self.clone(),
            name: name.to_string(),
            kind,
        }
    }

    /// Emit an event through the bus (hooks, pipes, listeners) without
    /// routing. Returns the final payload.
    pub async fn emit(&self, event: &str, raw: impl Into<RawPayload>) -> Payload {
        self.inner.bus.emit(event, raw).await
    }

    /// Emit an event from a component and route the processed payload to
    /// the component's targets.
    pub async fn emit_from_component(
        &self,
        source: &str,
        event: &str,
        raw: impl Into<RawPayload>,
    ) -> Payload {
        let mut payload = self.inner.bus.payloads().create(event, raw);
        let kind = self
            .inner
            .registry
            .get(source)
            .map(|c| c.kind())
            .or_else(|| self.inner.router.kind_of(source));
        payload.attribute(source, kind.map_or("unknown", |k| k.as_str()));

        let processed = self.inner.bus.emit(event, payload).await;

        for target in self.inner.router.targets_of(source) {
            self.inner.router.count_processed();
            let envelope = MessageEnvelope::component_message(
                self.session_id().to_string(),
                event,
                processed.to_value(),
                target.clone(),
                Some(source.to_string()),
            );
            if let Err(e) = dispatch(self.clone(), envelope).await {
                self.inner.router.count_failure();
                warn!(source = %source, target = %target, error = %e, "routing failed");
            }
        }

        processed
    }

    /// Dead-lettered messages, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dispatcher.dead_letters()
    }

    /// Bus counters.
    pub fn bus_stats(&self) -> BusStats {
        self.inner.bus.stats()
    }

    /// Router counters.
    pub fn router_stats(&self) -> RouterStats {
        self.inner.router.stats()
    }

    /// Delivery counters.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }
}

/// A [`Handle`] bound to one component's identity.
///
/// Handed to every component at registration via
/// [`Component::bind`](crate::component::Component::bind).
#[derive(Clone)]
pub struct ComponentHandle {
    handle: Handle,
    name: String,
    kind: ComponentKind,
}

impl ComponentHandle {
    /// The owning component's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning component's kind.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// The underlying runtime handle.
    pub fn runtime(&self) -> &Handle {
        &self.handle
    }

    /// Emit an event attributed to this component and route it to the
    /// component's declared targets.
    pub async fn emit(&self, event: &str, raw: impl Into<RawPayload>) -> Payload {
        self.handle.emit_from_component(&self.name, event, raw).await
    }

    /// Make a typed request to another component and await its reply,
    /// with the default 5 s timeout.
    pub async fn request(&self, target: &str, data: Value) -> Result<Value> {
        self.request_with_timeout(target, data, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Make a typed request with an explicit timeout.
    ///
    /// An unknown target surfaces as
    /// [`TenonError::Timeout`] -- components may register late, so "not
    /// found" is indistinguishable from "slow".
    pub async fn request_with_timeout(
        &self,
        target: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value> {
        request(&self.handle, &self.name, target, data, timeout).await
    }

    /// Start a fluent request: `message().to(..).with_data(..).send_and_wait()`.
    pub fn message(&self) -> RequestBuilder {
        RequestBuilder::new(self.clone())
    }

    /// Pin a target and timeout for a series of requests.
    pub fn request_scope(&self, target: impl Into<String>, timeout: Duration) -> RequestScope {
        RequestScope::new(self.clone(), target.into(), timeout)
    }

    /// Issue several requests concurrently. Results keep input order.
    pub async fn request_multiple(
        &self,
        requests: Vec<(String, Value)>,
        timeout: Duration,
    ) -> Vec<Result<Value>> {
        request_multiple(&self.handle, &self.name, requests, timeout).await
    }

    /// Issue a request and consume the reply as a chunk stream.
    pub async fn request_stream(
        &self,
        target: &str,
        data: Value,
        timeout: Duration,
    ) -> futures_util::stream::Iter<std::vec::IntoIter<StreamChunk>> {
        request_stream(&self.handle, &self.name, target, data, timeout).await
    }

    /// Ask the user a question and await the matching
    /// `user.input.response`. A timeout yields a sentinel string.
    pub async fn ask_user(&self, question: &str, timeout: Duration) -> String {
        ask_user(&self.handle, &self.name, question, timeout).await
    }
}

/// Routes `user.input.response` events back to waiting `ask_user` calls.
struct UserResponseListener {
    correlator: Arc<Correlator>,
}

#[async_trait]
impl Listener for UserResponseListener {
    async fn notify(&self, payload: Payload) -> Result<()> {
        if let Payload::UserInputResponse(response) = payload {
            self.correlator
                .complete_user(&response.request_id, response.response);
        }
        Ok(())
    }
}

/// One component-pipeline runtime instance.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a bare runtime with only the console sink registered.
    ///
    /// Useful for tests and for embedding applications that register
    /// components programmatically instead of via specs.
    pub fn empty() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a bare runtime with explicit tunables.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let inner = Arc::new(RuntimeInner {
            bus: EventBus::new(),
            registry: ComponentRegistry::new(),
            router: Router::new(),
            dispatcher: Dispatcher::new(config.max_queue_len),
            correlator: Arc::new(Correlator::new()),
            config,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            startup_report: std::sync::RwLock::new(StartupReport::default()),
        });
        let runtime = Self { inner };
        let handle = runtime.handle();
        handle.registry().register(
            Arc::new(ConsoleOutput),
            handle.component_handle(tenon_types::spec::CONSOLE_OUTPUT, ComponentKind::Output),
        );
        handle.bus().add_listener(
            events::USER_INPUT_RESPONSE,
            Arc::new(UserResponseListener {
                correlator: handle.correlator().clone(),
            }),
        );
        runtime
    }

    /// Build a runtime from parsed component specs.
    ///
    /// Constructs components in dependency order, wires routing,
    /// validates the graph (errors abort startup), and runs the blocking
    /// initialization phase. Only after this returns may peers read
    /// capability-derived descriptions.
    pub async fn start(specs: Vec<ComponentSpec>, factory: &dyn ComponentFactory) -> Result<Self> {
        Self::start_with_config(specs, factory, RuntimeConfig::default()).await
    }

    /// [`start`](Runtime::start) with explicit tunables.
    pub async fn start_with_config(
        specs: Vec<ComponentSpec>,
        factory: &dyn ComponentFactory,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let startup_timeout = config.startup_timeout;
        let sweep_interval = config.sweep_interval;
        let runtime = Self::with_config(config);
        let handle = runtime.handle();

        let mut spec_map: HashMap<String, ComponentSpec> = HashMap::new();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(TenonError::ConfigInvalid {
                    reason: "component name must be a non-empty identifier".into(),
                });
            }
            if spec.name == tenon_types::spec::CONSOLE_OUTPUT {
                return Err(TenonError::ConfigInvalid {
                    reason: format!(
                        "'{}' is a reserved component name",
                        tenon_types::spec::CONSOLE_OUTPUT
                    ),
                });
            }
            if spec_map.contains_key(&spec.name) {
                return Err(TenonError::ConfigInvalid {
                    reason: format!("duplicate component name '{}'", spec.name),
                });
            }
            spec_map.insert(spec.name.clone(), spec);
        }

        // 1. Construct in dependency order.
        let order = crate::resolver::resolve_order(&spec_map)?;
        for name in &order {
            let spec = &spec_map[name];
            let mut deps: HashMap<String, Arc<dyn Component>> = HashMap::new();
            for dep in &spec.depends_on {
                if let Some(component) = handle.registry().get(dep) {
                    deps.insert(dep.clone(), component);
                }
            }
            let component = factory.build(spec, &deps)?;
            if component.name() != spec.name {
                warn!(
                    spec = %spec.name,
                    component = %component.name(),
                    "component name does not match its spec"
                );
            }
            handle.register_component(component);
        }

        // 2. Routing table + validation.
        handle.router().configure(&spec_map);
        let errors: Vec<String> = handle
            .router()
            .validate()
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message)
            .collect();
        if !errors.is_empty() {
            return Err(TenonError::ConfigInvalid {
                reason: errors.join("; "),
            });
        }

        // 3. Expired-envelope sweeper.
        {
            let handle = handle.clone();
            let token = handle.shutdown_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(sweep_interval) => {
                            handle.dispatcher().sweep_expired();
                        }
                    }
                }
            });
        }

        // 4. Blocking initialization.
        let report = run_startup(handle.registry(), startup_timeout).await;
        *runtime
            .inner
            .startup_report
            .write()
            .expect("startup report lock poisoned") = report;

        Ok(runtime)
    }

    /// A cloneable handle to this runtime.
    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    /// Outcomes of the blocking-initialization phase.
    pub fn startup_report(&self) -> StartupReport {
        self.inner
            .startup_report
            .read()
            .expect("startup report lock poisoned")
            .clone()
    }

    /// Drive the main loop: read the input component until it yields the
    /// exit sentinel (`"exit"` or `";"`) or runs dry, wrapping each item
    /// in an `input.received` emission. Shuts down on loop exit.
    pub async fn run(&self) -> Result<()> {
        let handle = self.handle();
        let Some(input) = handle.registry().input_component() else {
            warn!("no input component registered, nothing to run");
            return self.shutdown().await;
        };
        let input_name = input.name().to_string();
        info!(input = %input_name, "main loop started");

        loop {
            let next = tokio::select! {
                _ = self.inner.shutdown.cancelled() => None,
                item = input.next_input() => item,
            };
            let Some(text) = next else { break };
            let trimmed = text.trim();
            if trimmed == "exit" || trimmed == ";" {
                debug!("exit sentinel received");
                break;
            }
            if trimmed.is_empty() {
                continue;
            }

            let payload = Payload::InputReceived(InputReceived {
                input: text,
                inputs: Map::new(),
                session_id: Some(self.inner.config.session_id.clone()),
                timestamp: chrono::Utc::now(),
                component_id: Some(input_name.clone()),
                component_type: Some(ComponentKind::Input.as_str().to_string()),
            });
            handle
                .emit_from_component(&input_name, events::INPUT_RECEIVED, payload)
                .await;
        }

        info!("main loop finished");
        self.shutdown().await
    }

    /// Shut down: stop intake, drain in-flight requests within the grace
    /// period, close components in reverse registration order, and fail
    /// remaining pending requests. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("runtime shutting down");
        self.inner.shutdown.cancel();

        let deadline = Instant::now() + self.inner.config.grace_period;
        while self.inner.correlator.pending_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.inner.registry.close_all().await;
        self.inner.correlator.fail_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_runtime_has_console_sink() {
        let runtime = Runtime::empty();
        assert!(
            runtime
                .registry()
                .contains(tenon_types::spec::CONSOLE_OUTPUT)
        );
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let runtime = Runtime::empty();
        runtime.shutdown().await.unwrap();
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_spec_names_rejected() {
        let specs = vec![
            ComponentSpec::new("a", ComponentKind::Tool, "t"),
            ComponentSpec::new("a", ComponentKind::Tool, "t"),
        ];
        let factory = |_: &ComponentSpec, _: &HashMap<String, Arc<dyn Component>>| {
            Err::<Arc<dyn Component>, _>(TenonError::ConfigInvalid {
                reason: "factory should not run".into(),
            })
        };
        let err = Runtime::start(specs, &factory).await.unwrap_err();
        assert!(matches!(err, TenonError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn reserved_name_rejected() {
        let specs = vec![ComponentSpec::new(
            tenon_types::spec::CONSOLE_OUTPUT,
            ComponentKind::Output,
            "console",
        )];
        let factory = |_: &ComponentSpec, _: &HashMap<String, Arc<dyn Component>>| {
            Err::<Arc<dyn Component>, _>(TenonError::ConfigInvalid {
                reason: "factory should not run".into(),
            })
        };
        let err = Runtime::start(specs, &factory).await.unwrap_err();
        match err {
            TenonError::ConfigInvalid { reason } => assert!(reason.contains("reserved")),
            other => panic!("expected ConfigInvalid, got {other}"),
        }
    }
}
