//! shuttle-core
//!
//! Typed request/reply between two processes over a shared queue.
//!
//! # Modules
//! - **domain**: ids, envelope, channel names, error classification, fleet shapes
//! - **ports**: QueueBackend, Clock, IdGenerator, CarStore/CompanyStore
//! - **impls**: in-memory and sqlite queue backends, in-memory fleet store
//! - **typed**: message vocabulary, type registry, codec, handler traits
//! - **app**: builder, gateway, dispatch loop, supervisor, fleet client
//! - **config**: layered process configuration
//! - **observability**: tracing setup and dispatch counters

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use self::app::{
    BuildError, CallError, CallOptions, DispatchLoop, FleetClient, FleetHandlers, Gateway,
    JobStatusRegistry, Shuttle, ShuttleBuilder, Supervisor,
};
pub use self::config::ShuttleConfig;
pub use self::domain::{Channels, CorrelationId, Envelope, EnvelopeId};
pub use self::ports::{ConsumeFilter, QueueBackend, QueueError};
