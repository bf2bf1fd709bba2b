//! # tenon-types
//!
//! Core type definitions for the tenon component pipeline runtime.
//!
//! This crate is the foundation of the dependency graph -- the engine
//! (`tenon-core`) and the tool-server layer (`tenon-mcp`) both depend on
//! it. It contains:
//!
//! - **[`error`]** -- [`TenonError`], the framework-wide error taxonomy
//! - **[`payload`]** -- Typed event payloads and the generic fallback
//! - **[`envelope`]** -- [`MessageEnvelope`] for routed and correlated traffic
//! - **[`spec`]** -- Post-parse component specifications consumed at startup

pub mod envelope;
pub mod error;
pub mod payload;
pub mod spec;

pub use envelope::MessageEnvelope;
pub use error::{Result, TenonError};
pub use payload::Payload;
pub use spec::{ComponentKind, ComponentSpec};
