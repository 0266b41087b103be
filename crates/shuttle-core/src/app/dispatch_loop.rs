//! DispatchLoop - server side of the request/reply pair.
//!
//! ```text
//! Idle -> Polling -> Dispatching -> Idle ...
//!            |            |
//!            +-> Faulted <+   (transport failure; the supervisor restarts us)
//! ```
//!
//! One consumed request yields at most one response. Envelopes that cannot be
//! decoded, carry an unknown tag or are not requests at all are logged and
//! dropped; putting them back would only have them fail again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::domain::{Channels, Classify, CorrelationId, Envelope, ErrorKind};
use crate::observability::DispatchStats;
use crate::ports::{Clock, ConsumeFilter, IdGenerator, QueueBackend, QueueError};
use crate::typed::{FaultResponse, Payload, PayloadCodec, RequestHandler, Response};

/// Publishing a response is attempted this many times before giving up.
const PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Idle,
    Polling,
    Dispatching,
    Faulted,
    Stopped,
}

/// What happened to one consumed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler's reply was published.
    Answered,
    /// The handler failed; a `FaultResponse` was published instead.
    Faulted,
    /// Unusable envelope, no response.
    Discarded,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request channel failed: {0}")]
    Transport(#[source] QueueError),

    #[error("could not publish response for {correlation_id}: {source}")]
    Publish {
        correlation_id: CorrelationId,
        #[source]
        source: QueueError,
    },
}

impl Classify for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Transport(err) | DispatchError::Publish { source: err, .. } => {
                err.kind()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub consume_timeout: Duration,
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            consume_timeout: config.consume_timeout(),
        }
    }
}

pub struct DispatchLoop {
    backend: Arc<dyn QueueBackend>,
    codec: PayloadCodec,
    handler: Arc<dyn RequestHandler>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    channels: Channels,
    settings: DispatchSettings,
    stats: Arc<DispatchStats>,
    state: watch::Sender<LoopState>,
}

impl DispatchLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        codec: PayloadCodec,
        handler: Arc<dyn RequestHandler>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        channels: Channels,
        settings: DispatchSettings,
        stats: Arc<DispatchStats>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            backend,
            codec,
            handler,
            ids,
            clock,
            channels,
            settings,
            stats,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "dispatch loop state");
        }
    }

    /// Polling: take the next request, waiting at most `consume_timeout`.
    pub async fn next_request(&self) -> Result<Option<Envelope>, DispatchError> {
        self.set_state(LoopState::Polling);
        let consumed = self
            .backend
            .consume_one(
                &self.channels.requests,
                &ConsumeFilter::Any,
                self.settings.consume_timeout,
            )
            .await;

        match consumed {
            Ok(Some(delivery)) => delivery.ack().await.map(Some).map_err(DispatchError::Transport),
            Ok(None) => Ok(None),
            Err(err @ QueueError::MalformedEnvelope { .. }) => {
                warn!(error = %err, "discarding unreadable request envelope");
                self.stats.record_discarded();
                Ok(None)
            }
            Err(err) => Err(DispatchError::Transport(err)),
        }
    }

    /// Dispatching: decode, run the handler, publish exactly one response.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<DispatchOutcome, DispatchError> {
        self.set_state(LoopState::Dispatching);
        self.stats.record_received();
        let outcome = self.dispatch_inner(&envelope).await;
        self.set_state(LoopState::Idle);
        outcome
    }

    async fn dispatch_inner(&self, envelope: &Envelope) -> Result<DispatchOutcome, DispatchError> {
        let correlation_id = envelope.correlation_id();
        let type_name = envelope.type_name();

        let request = match self.codec.decode(envelope.content(), type_name) {
            Ok(Payload::Request(request)) => request,
            Ok(Payload::Response(_)) => {
                warn!(%correlation_id, type_name, "unsupported request type, discarding");
                self.stats.record_discarded();
                return Ok(DispatchOutcome::Discarded);
            }
            Err(err) => {
                warn!(%correlation_id, type_name, error = %err, "undecodable request, discarding");
                self.stats.record_discarded();
                return Ok(DispatchOutcome::Discarded);
            }
        };

        let data_id = request.data_id();
        let (response, outcome) = match self.handler.handle_request(request).await {
            Ok(response) => (response, DispatchOutcome::Answered),
            Err(err) => {
                error!(%correlation_id, type_name, error = %err, "handler failed");
                let fault = FaultResponse {
                    data_id,
                    request_type: type_name.to_string(),
                    message: err.to_string(),
                };
                (Response::FaultResponse(fault), DispatchOutcome::Faulted)
            }
        };

        let reply = match self.response_envelope(correlation_id, response) {
            Some(reply) => reply,
            None => {
                self.stats.record_discarded();
                return Ok(DispatchOutcome::Discarded);
            }
        };
        self.publish_response(reply).await?;

        match outcome {
            DispatchOutcome::Faulted => self.stats.record_faulted(),
            _ => self.stats.record_answered(),
        }
        debug!(%correlation_id, type_name, ?outcome, "request handled");
        Ok(outcome)
    }

    fn response_envelope(&self, correlation_id: CorrelationId, response: Response) -> Option<Envelope> {
        match self.codec.encode(&Payload::Response(response)) {
            Ok(encoded) => Some(Envelope::new(
                self.ids.envelope_id(),
                correlation_id,
                encoded.type_name,
                encoded.content,
                self.clock.now(),
            )),
            Err(err) => {
                error!(%correlation_id, error = %err, "could not encode response");
                None
            }
        }
    }

    async fn publish_response(&self, reply: Envelope) -> Result<(), DispatchError> {
        let correlation_id = reply.correlation_id();
        let mut attempt = 1;
        loop {
            match self
                .backend
                .publish(&self.channels.responses, reply.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < PUBLISH_ATTEMPTS => {
                    warn!(%correlation_id, attempt, error = %err, "response publish failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(DispatchError::Publish {
                        correlation_id,
                        source,
                    });
                }
            }
        }
    }

    /// One Polling + Dispatching round. `None` when no request arrived in time.
    pub async fn run_once(&self) -> Result<Option<DispatchOutcome>, DispatchError> {
        match self.next_request().await? {
            Some(envelope) => self.dispatch(envelope).await.map(Some),
            None => {
                self.set_state(LoopState::Idle);
                Ok(None)
            }
        }
    }

    /// Serve requests one at a time until shutdown is signalled.
    ///
    /// Shutdown is checked between bounded consumes, never in the middle of a
    /// dispatch. Dropping the sender counts as shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), DispatchError> {
        info!(channel = %self.channels.requests, "dispatch loop started");
        while !shutdown_requested(&shutdown) {
            self.run_once().await?;
        }
        info!("dispatch loop stopped");
        Ok(())
    }

    /// Like `run`, but up to `concurrency` requests are handled at once, one
    /// task per request.
    /// - 応答の順序はリクエストの順序と一致しない
    /// - 停止時は走っているタスクを全部待ってから戻る
    pub async fn run_concurrent(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
        concurrency: usize,
    ) -> Result<(), DispatchError> {
        info!(channel = %self.channels.requests, concurrency, "dispatch loop started");
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        let result = loop {
            if shutdown_requested(&shutdown) {
                break Ok(());
            }
            while let Some(done) = in_flight.try_join_next() {
                log_task_result(done);
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break Ok(());
            };
            match self.next_request().await {
                Ok(Some(envelope)) => {
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        this.dispatch(envelope).await
                    });
                }
                Ok(None) => self.set_state(LoopState::Idle),
                Err(err) => break Err(err),
            }
        };

        // requests already taken are always finished
        while let Some(done) = in_flight.join_next().await {
            log_task_result(done);
        }
        info!("dispatch loop stopped");
        result
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

fn log_task_result(done: Result<Result<DispatchOutcome, DispatchError>, tokio::task::JoinError>) {
    match done {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => error!(error = %err, "dispatch failed"),
        Err(err) => error!(error = %err, "dispatch task panicked"),
    }
}
