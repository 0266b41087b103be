//! Impls - concrete adapters for the ports.
//!
//! - **InMemoryQueueBackend**: process-local channels, for tests and `demo`
//! - **SqliteQueueBackend**: durable channels shared between processes
//! - **InMemoryFleetStore**: `CarStore` + `CompanyStore` over a shared map

pub mod inmem_fleet;
pub mod inmem_queue;
pub mod sqlite_queue;

use std::sync::Arc;

use tracing::info;

pub use self::inmem_fleet::InMemoryFleetStore;
pub use self::inmem_queue::InMemoryQueueBackend;
pub use self::sqlite_queue::{SqliteQueueBackend, SqliteQueueSettings};

use crate::config::{BackendKind, QueueConfig};
use crate::ports::{QueueBackend, QueueError};

/// Open the backend `config` asks for.
pub async fn connect(config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
    match config.backend {
        BackendKind::Memory => {
            info!("using in-memory queue backend");
            Ok(Arc::new(InMemoryQueueBackend::new()))
        }
        BackendKind::Sqlite => {
            info!(url = %config.database_url, "using sqlite queue backend");
            let settings = SqliteQueueSettings {
                poll_interval: config.poll_interval(),
                visibility_timeout: config.visibility_timeout(),
                ..SqliteQueueSettings::default()
            };
            let backend = SqliteQueueBackend::connect(&config.database_url, settings).await?;
            Ok(Arc::new(backend))
        }
    }
}
