//! Ports - traits at the seams.
//!
//! Each trait hides an outside system (the queueing medium, the entity store,
//! the time source) behind an interface the app layer codes against.

pub mod clock;
pub mod fleet_store;
pub mod id_generator;
pub mod queue_backend;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::fleet_store::{CarStore, CompanyStore, StoreError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_backend::{
    ConsumeFilter, Delivery, QueueBackend, QueueError, Settlement, deadline_after,
};
