//! # tenon-core
//!
//! The engine of the tenon component pipeline runtime: a single
//! in-process event bus, a declarative router built from component `to`
//! configurations, correlated request/response between components, and
//! the async runtime that wires it all together.
//!
//! Modules, roughly bottom-up:
//!
//! - **[`payload`]** -- event-name -> payload coercion registry
//! - **[`bus`]** -- hooks / pipes / listeners and `emit`
//! - **[`component`]** -- the [`Component`] trait and the console sink
//! - **[`registry`]** -- name -> component instance map
//! - **[`resolver`]** -- dependency-ordered component construction
//! - **[`router`]** -- routing table, inference, and validation
//! - **[`delivery`]** -- bounded queues, retries, dead-letter
//! - **[`request`]** -- request/response correlation and sugar
//! - **[`startup`]** -- parallel blocking initialization
//! - **[`runtime`]** -- the composition root and main loop
//!
//! No global state: everything hangs off a [`Runtime`] instance, so tests
//! spin up fresh runtimes without cross-contamination.

pub mod bus;
pub mod component;
pub mod delivery;
pub mod payload;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod router;
pub mod runtime;
pub mod startup;

pub use bus::{EventBus, Hook, Listener, Pipe, hook_fn, listener_fn, pipe_fn};
pub use component::{Component, ComponentInput, ConsoleOutput};
pub use delivery::{DeadLetter, DispatchStats};
pub use payload::{PayloadRegistry, RawPayload};
pub use request::{Correlator, RequestBuilder, RequestScope, StreamChunk};
pub use router::{RouteDiagnostic, Router, Severity};
pub use runtime::{ComponentFactory, ComponentHandle, Handle, Runtime, RuntimeConfig};
pub use startup::{StartupOutcome, StartupReport};
