//! ShuttleBuilder - wiring of backend, vocabulary and loops.
//!
//! Checks run once at build time:
//! - the expected type tags are all registered (`expect_types`)
//! - both channels exist on the backend

use std::sync::Arc;

use tracing::info;

use super::dispatch_loop::{DispatchLoop, DispatchSettings};
use super::gateway::{Gateway, GatewaySettings};
use super::supervisor::{Supervisor, SupervisorSettings};
use crate::config::{ConfigError, DispatchConfig, GatewayConfig, QueueConfig, ShuttleConfig};
use crate::domain::Channels;
use crate::impls;
use crate::observability::DispatchStats;
use crate::ports::{Clock, IdGenerator, QueueBackend, QueueError, SystemClock, UlidGenerator};
use crate::typed::{PayloadCodec, RegistryError, RequestHandler, TypeRegistry};

/// ```ignore
/// let shuttle = ShuttleBuilder::new()
///     .backend(Arc::new(InMemoryQueueBackend::new()))
///     .expect_types(&["GetCarsRequest", "GetCarsResponse"])
///     .build()
///     .await?;
/// let supervisor = shuttle.supervise(FleetHandlers::in_memory(store).into_table());
/// let cars = FleetClient::new(shuttle.gateway()).cars().await?;
/// ```
pub struct ShuttleBuilder {
    backend: Option<Arc<dyn QueueBackend>>,
    registry: Option<TypeRegistry>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    channels: Option<Channels>,
    gateway: GatewayConfig,
    dispatch: DispatchConfig,
    expected_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no queue backend configured")]
    MissingBackend,

    #[error("missing type tags: {0:?}. These were expected but are not registered.")]
    MissingTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("queue backend failed during setup: {0}")]
    Queue(#[from] QueueError),
}

impl ShuttleBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            registry: None,
            clock: Arc::new(SystemClock),
            ids: None,
            channels: None,
            gateway: GatewayConfig::default(),
            dispatch: DispatchConfig::default(),
            expected_types: None,
        }
    }

    /// Connect the configured backend and take over every setting.
    pub async fn from_config(config: &ShuttleConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let backend = impls::connect(&config.queue).await?;
        Ok(Self::new()
            .backend(backend)
            .channels(config.queue.channels().map_err(ConfigError::from)?)
            .gateway_config(config.gateway.clone())
            .dispatch_config(config.dispatch.clone()))
    }

    pub fn backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the standard vocabulary.
    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn channels(mut self, channels: Channels) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn gateway_config(mut self, config: GatewayConfig) -> Self {
        self.gateway = config;
        self
    }

    pub fn dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn expect_types(mut self, type_names: &[&str]) -> Self {
        self.expected_types = Some(type_names.iter().map(|t| t.to_string()).collect());
        self
    }

    pub async fn build(self) -> Result<Shuttle, BuildError> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => TypeRegistry::standard()?,
        };
        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTypes(missing));
            }
        }

        let backend = self.backend.ok_or(BuildError::MissingBackend)?;
        let channels = match self.channels {
            Some(channels) => channels,
            None => QueueConfig::default().channels().map_err(ConfigError::from)?,
        };
        backend.declare(&channels.requests).await?;
        backend.declare(&channels.responses).await?;

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(self.clock.clone())));
        info!(
            requests = %channels.requests,
            responses = %channels.responses,
            types = registry.len(),
            "shuttle ready"
        );

        Ok(Shuttle {
            backend,
            codec: PayloadCodec::new(Arc::new(registry)),
            ids,
            clock: self.clock,
            channels,
            gateway: self.gateway,
            dispatch: self.dispatch,
            stats: Arc::new(DispatchStats::new()),
        })
    }
}

impl Default for ShuttleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Built wiring. Hands out the client and server sides.
#[derive(Clone)]
pub struct Shuttle {
    backend: Arc<dyn QueueBackend>,
    codec: PayloadCodec,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    channels: Channels,
    gateway: GatewayConfig,
    dispatch: DispatchConfig,
    stats: Arc<DispatchStats>,
}

impl Shuttle {
    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    /// Counters shared by every dispatch loop of this shuttle.
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            Arc::clone(&self.backend),
            self.codec.clone(),
            Arc::clone(&self.ids),
            Arc::clone(&self.clock),
            self.channels.clone(),
            GatewaySettings::from(&self.gateway),
        )
    }

    pub fn dispatch_loop(&self, handler: impl RequestHandler + 'static) -> DispatchLoop {
        DispatchLoop::new(
            Arc::clone(&self.backend),
            self.codec.clone(),
            Arc::new(handler),
            Arc::clone(&self.ids),
            Arc::clone(&self.clock),
            self.channels.clone(),
            DispatchSettings::from(&self.dispatch),
            Arc::clone(&self.stats),
        )
    }

    /// Dispatch loop for `handler`, already running under a supervisor.
    pub fn supervise(&self, handler: impl RequestHandler + 'static) -> Supervisor {
        Supervisor::spawn(
            Arc::new(self.dispatch_loop(handler)),
            SupervisorSettings::from(&self.dispatch),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelName;
    use crate::impls::InMemoryQueueBackend;
    use crate::typed::{GetCarsRequest, GetCarsResponse, Message};

    fn memory() -> Arc<dyn QueueBackend> {
        Arc::new(InMemoryQueueBackend::new())
    }

    #[tokio::test]
    async fn build_success() {
        let shuttle = ShuttleBuilder::new()
            .backend(memory())
            .expect_types(&[GetCarsRequest::TYPE, GetCarsResponse::TYPE])
            .build()
            .await;
        assert!(shuttle.is_ok());
    }

    #[tokio::test]
    async fn build_missing_types() {
        let mut registry = TypeRegistry::new();
        registry.register::<GetCarsRequest>().unwrap();

        let shuttle = ShuttleBuilder::new()
            .backend(memory())
            .registry(registry)
            .expect_types(&[GetCarsRequest::TYPE, GetCarsResponse::TYPE])
            .build()
            .await;
        assert!(matches!(
            shuttle,
            Err(BuildError::MissingTypes(missing)) if missing == vec![GetCarsResponse::TYPE.to_string()]
        ));
    }

    #[tokio::test]
    async fn build_without_backend_fails() {
        let shuttle = ShuttleBuilder::new().build().await;
        assert!(matches!(shuttle, Err(BuildError::MissingBackend)));
    }

    #[tokio::test]
    async fn build_declares_both_channels() {
        let backend = memory();
        let channels = Channels::new(
            ChannelName::new("requests-a").unwrap(),
            ChannelName::new("responses-a").unwrap(),
        );
        let shuttle = ShuttleBuilder::new()
            .backend(Arc::clone(&backend))
            .channels(channels.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(shuttle.channels(), &channels);
        assert_eq!(backend.depth(&channels.requests).await.unwrap(), 0);
        assert_eq!(backend.depth(&channels.responses).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn from_config_uses_configured_channels() {
        let config = ShuttleConfig::from_sources(
            "[queue]\nrequest_channel = \"in\"\nresponse_channel = \"out\"\n",
            Default::default(),
        )
        .unwrap();

        let shuttle = ShuttleBuilder::from_config(&config)
            .await
            .unwrap()
            .build()
            .await
            .unwrap();
        assert_eq!(shuttle.channels().requests.as_str(), "in");
        assert_eq!(shuttle.channels().responses.as_str(), "out");
    }
}
