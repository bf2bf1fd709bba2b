//! The unified event bus.
//!
//! Holds three kinds of subscriptions per event name:
//!
//! - **Hooks** -- read-only observers, run concurrently per emission.
//!   They see the pre-pipe payload; return values are ignored.
//! - **Pipes** -- transformers, run sequentially in registration order,
//!   threading one payload. Returning `None` keeps the previous payload.
//! - **Listeners** -- fire-and-forget; spawned with the final payload.
//!
//! Callback failures (errors and panics alike) are logged and never
//! abort the emission. Registration is single-writer; dispatch is
//! concurrent-safe.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

use tenon_types::{Payload, Result};

use crate::payload::{PayloadRegistry, RawPayload};

/// Read-only subscriber. Runs concurrently with peer hooks and must be
/// side-effect-only from the bus's perspective.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Observe an emission. Errors are logged and swallowed.
    async fn run(&self, payload: &Payload) -> Result<()>;
}

/// Transforming subscriber. Runs in registration order; returning
/// `Some(payload)` replaces the current payload, `None` keeps it.
/// A returned payload of a different schema is discarded with a warning.
#[async_trait]
pub trait Pipe: Send + Sync {
    /// Transform an emission. Errors are logged and the previous payload
    /// is retained.
    async fn transform(&self, payload: Payload) -> Result<Option<Payload>>;
}

/// Fire-and-forget subscriber. Failures are logged.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Receive the final (post-pipe) payload.
    async fn notify(&self, payload: Payload) -> Result<()>;
}

/// Identifier returned by registration, usable for unsubscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

struct Entry<T> {
    id: SubscriptionId,
    callback: T,
}

fn new_id(prefix: &str) -> SubscriptionId {
    SubscriptionId(format!(
        "{prefix}-{}",
        &Uuid::new_v4().simple().to_string()[..8]
    ))
}

/// Counters exposed by [`EventBus::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Total emissions processed.
    pub events_emitted: u64,
    /// Total hook invocations.
    pub hooks_executed: u64,
    /// Total pipe invocations.
    pub pipes_executed: u64,
    /// Total listener dispatches.
    pub listeners_fired: u64,
}

/// The in-process pub/sub mechanism for typed payloads.
pub struct EventBus {
    hooks: RwLock<HashMap<String, Vec<Entry<Arc<dyn Hook>>>>>,
    pipes: RwLock<HashMap<String, Vec<Entry<Arc<dyn Pipe>>>>>,
    listeners: RwLock<HashMap<String, Vec<Entry<Arc<dyn Listener>>>>>,
    payloads: PayloadRegistry,
    events_emitted: AtomicU64,
    hooks_executed: AtomicU64,
    pipes_executed: AtomicU64,
    listeners_fired: AtomicU64,
}

impl EventBus {
    /// Create an empty bus with the built-in payload schemas.
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            pipes: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            payloads: PayloadRegistry::new(),
            events_emitted: AtomicU64::new(0),
            hooks_executed: AtomicU64::new(0),
            pipes_executed: AtomicU64::new(0),
            listeners_fired: AtomicU64::new(0),
        }
    }

    /// The payload coercion registry.
    pub fn payloads(&self) -> &PayloadRegistry {
        &self.payloads
    }

    /// Register a hook for an event.
    pub fn add_hook(&self, event: impl Into<String>, hook: Arc<dyn Hook>) -> SubscriptionId {
        let event = event.into();
        let id = new_id("hook");
        debug!(event = %event, id = ?id, "registered hook");
        self.hooks
            .write()
            .expect("bus lock poisoned")
            .entry(event)
            .or_default()
            .push(Entry {
                id: id.clone(),
                callback: hook,
            });
        id
    }

    /// Register a pipe for an event. Order of registration is the order
    /// of execution, stable across emissions.
    pub fn add_pipe(&self, event: impl Into<String>, pipe: Arc<dyn Pipe>) -> SubscriptionId {
        let event = event.into();
        let id = new_id("pipe");
        debug!(event = %event, id = ?id, "registered pipe");
        self.pipes
            .write()
            .expect("bus lock poisoned")
            .entry(event)
            .or_default()
            .push(Entry {
                id: id.clone(),
                callback: pipe,
            });
        id
    }

    /// Register a fire-and-forget listener for an event.
    pub fn add_listener(
        &self,
        event: impl Into<String>,
        listener: Arc<dyn Listener>,
    ) -> SubscriptionId {
        let event = event.into();
        let id = new_id("evt");
        debug!(event = %event, id = ?id, "registered listener");
        self.listeners
            .write()
            .expect("bus lock poisoned")
            .entry(event)
            .or_default()
            .push(Entry {
                id: id.clone(),
                callback: listener,
            });
        id
    }

    /// Remove a subscription of any kind. Returns whether it was found.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        fn remove_from<T>(
            map: &RwLock<HashMap<String, Vec<Entry<T>>>>,
            id: &SubscriptionId,
        ) -> bool {
            let mut guard = map.write().expect("bus lock poisoned");
            let mut removed = false;
            for entries in guard.values_mut() {
                let before = entries.len();
                entries.retain(|e| &e.id != id);
                removed |= entries.len() != before;
            }
            removed
        }

        remove_from(&self.hooks, id) | remove_from(&self.pipes, id) | remove_from(&self.listeners, id)
    }

    /// Emit an event: build the typed payload, run hooks concurrently,
    /// thread the payload through pipes, fire listeners, and return the
    /// final (possibly transformed) payload.
    pub async fn emit(&self, event: &str, raw: impl Into<RawPayload>) -> Payload {
        let payload = self.payloads.create(event, raw);
        debug!(event = %event, "emitting");

        self.run_hooks(event, &payload).await;
        let payload = self.run_pipes(event, payload).await;
        self.fire_listeners(event, payload.clone());

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        payload
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            hooks_executed: self.hooks_executed.load(Ordering::Relaxed),
            pipes_executed: self.pipes_executed.load(Ordering::Relaxed),
            listeners_fired: self.listeners_fired.load(Ordering::Relaxed),
        }
    }

    /// Number of subscriptions registered for an event, across all kinds.
    pub fn subscription_count(&self, event: &str) -> usize {
        let hooks = self
            .hooks
            .read()
            .expect("bus lock poisoned")
            .get(event)
            .map_or(0, Vec::len);
        let pipes = self
            .pipes
            .read()
            .expect("bus lock poisoned")
            .get(event)
            .map_or(0, Vec::len);
        let listeners = self
            .listeners
            .read()
            .expect("bus lock poisoned")
            .get(event)
            .map_or(0, Vec::len);
        hooks + pipes + listeners
    }

    async fn run_hooks(&self, event: &str, payload: &Payload) {
        let hooks: Vec<Arc<dyn Hook>> = {
            let guard = self.hooks.read().expect("bus lock poisoned");
            match guard.get(event) {
                Some(entries) => entries.iter().map(|e| e.callback.clone()).collect(),
                None => return,
            }
        };
        if hooks.is_empty() {
            return;
        }

        debug!(event = %event, count = hooks.len(), "running hooks");

        // Each hook runs in its own task so a panic in one cannot take
        // down the emission or its peers.
        let mut tasks = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move { hook.run(&payload).await }));
        }

        for (i, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event = %event, hook = i, error = %e, "hook failed");
                }
                Err(join_err) => {
                    error!(event = %event, hook = i, error = %join_err, "hook panicked");
                }
            }
            self.hooks_executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn run_pipes(&self, event: &str, payload: Payload) -> Payload {
        let pipes: Vec<Arc<dyn Pipe>> = {
            let guard = self.pipes.read().expect("bus lock poisoned");
            match guard.get(event) {
                Some(entries) => entries.iter().map(|e| e.callback.clone()).collect(),
                None => return payload,
            }
        };
        if pipes.is_empty() {
            return payload;
        }

        debug!(event = %event, count = pipes.len(), "running pipes");

        let mut current = payload;
        for (i, pipe) in pipes.into_iter().enumerate() {
            self.pipes_executed.fetch_add(1, Ordering::Relaxed);
            let input = current.clone();
            let task = tokio::spawn(async move { pipe.transform(input).await });
            match task.await {
                Ok(Ok(Some(next))) => {
                    // A pipe must keep the payload schema; a mismatched
                    // replacement is discarded.
                    if next.schema_event() == current.schema_event() {
                        current = next;
                    } else {
                        warn!(
                            event = %event,
                            pipe = i,
                            "pipe returned payload of a different schema, discarding"
                        );
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    error!(event = %event, pipe = i, error = %e, "pipe failed");
                }
                Err(join_err) => {
                    error!(event = %event, pipe = i, error = %join_err, "pipe panicked");
                }
            }
        }
        current
    }

    fn fire_listeners(&self, event: &str, payload: Payload) {
        let listeners: Vec<Arc<dyn Listener>> = {
            let guard = self.listeners.read().expect("bus lock poisoned");
            match guard.get(event) {
                Some(entries) => entries.iter().map(|e| e.callback.clone()).collect(),
                None => return,
            }
        };

        debug!(event = %event, count = listeners.len(), "firing listeners");

        for listener in listeners {
            self.listeners_fired.fetch_add(1, Ordering::Relaxed);
            let payload = payload.clone();
            let event = event.to_string();
            tokio::spawn(async move {
                if let Err(e) = listener.notify(payload).await {
                    error!(event = %event, error = %e, "listener failed");
                }
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Closure adapters ────────────────────────────────────────────────────

struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&Payload) + Send + Sync,
{
    async fn run(&self, payload: &Payload) -> Result<()> {
        (self.0)(payload);
        Ok(())
    }
}

/// Wrap a synchronous closure as a [`Hook`].
pub fn hook_fn<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&Payload) + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

struct FnPipe<F>(F);

#[async_trait]
impl<F> Pipe for FnPipe<F>
where
    F: Fn(Payload) -> Option<Payload> + Send + Sync,
{
    async fn transform(&self, payload: Payload) -> Result<Option<Payload>> {
        Ok((self.0)(payload))
    }
}

/// Wrap a synchronous closure as a [`Pipe`].
pub fn pipe_fn<F>(f: F) -> Arc<dyn Pipe>
where
    F: Fn(Payload) -> Option<Payload> + Send + Sync + 'static,
{
    Arc::new(FnPipe(f))
}

struct FnListener<F>(F);

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(Payload) + Send + Sync,
{
    async fn notify(&self, payload: Payload) -> Result<()> {
        (self.0)(payload);
        Ok(())
    }
}

/// Wrap a synchronous closure as a [`Listener`].
pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(Payload) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}
