//! App - the ports put together.
//!
//! # Components
//! - **ShuttleBuilder / Shuttle**: wiring and startup checks
//! - **Gateway**: publish a request, await its correlated response
//! - **DispatchLoop**: consume requests, run handlers, publish responses
//! - **Supervisor**: restarts the dispatch loop after failures
//! - **FleetHandlers / FleetClient**: the fleet vocabulary on both sides
//! - **JobStatusRegistry**: shared state of the front-end's jobs

pub mod builder;
pub mod dispatch_loop;
pub mod fleet_client;
pub mod fleet_handlers;
pub mod gateway;
pub mod status;
pub mod supervisor;

pub use self::builder::{BuildError, Shuttle, ShuttleBuilder};
pub use self::dispatch_loop::{
    DispatchError, DispatchLoop, DispatchOutcome, DispatchSettings, LoopState,
};
pub use self::fleet_client::{FleetClient, FleetError, OnlineUpdate};
pub use self::fleet_handlers::FleetHandlers;
pub use self::gateway::{CallError, CallOptions, Gateway, GatewaySettings};
pub use self::status::JobStatusRegistry;
pub use self::supervisor::{Supervisor, SupervisorSettings};
