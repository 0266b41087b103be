//! Gateway - publish a request, wait for the response with the same
//! correlation id.
//!
//! Each call mints a fresh correlation id, so concurrent calls can share one
//! response channel: the backend only hands a call the envelope carrying its
//! own id. A call always has a ceiling (its deadline) and may also be
//! cancelled from outside. Neither withdraws the published request; a late
//! response is simply never collected.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::domain::{Channels, Classify, CorrelationId, Envelope};
use crate::ports::{
    Clock, ConsumeFilter, Delivery, IdGenerator, QueueBackend, QueueError, deadline_after,
};
use crate::typed::{CodecError, Message, Payload, PayloadCodec, Request, Response, Rpc};

/// Pause before retrying after a transient backend failure.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("no response for {correlation_id} within {waited:?}")]
    Timeout {
        correlation_id: CorrelationId,
        waited: Duration,
    },

    #[error("call {correlation_id} was cancelled")]
    Cancelled { correlation_id: CorrelationId },

    #[error("queue backend failed: {0}")]
    Transport(#[source] QueueError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("expected {expected}, got {actual}")]
    ResponseTypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("{request_type} failed on the server: {message}")]
    Remote {
        request_type: String,
        message: String,
    },
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Replaces the configured call deadline.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Timing of the wait loop.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub consume_timeout: Duration,
    pub call_deadline: Duration,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            consume_timeout: config.consume_timeout(),
            call_deadline: config.call_deadline(),
        }
    }
}

/// Client side of the request/reply pair. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn QueueBackend>,
    codec: PayloadCodec,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    channels: Channels,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        codec: PayloadCodec,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        channels: Channels,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            backend,
            codec,
            ids,
            clock,
            channels,
            settings,
        }
    }

    pub fn settings(&self) -> GatewaySettings {
        self.settings
    }

    /// Send `request` and wait for its reply under the configured deadline.
    pub async fn call<R: Rpc>(&self, request: R) -> Result<R::Reply, CallError> {
        self.call_with(request, CallOptions::default()).await
    }

    pub async fn call_with<R: Rpc>(
        &self,
        request: R,
        options: CallOptions,
    ) -> Result<R::Reply, CallError> {
        let deadline = deadline_after(options.deadline.unwrap_or(self.settings.call_deadline));
        let cancel = options.cancel.unwrap_or_default();

        let correlation_id = self.ids.correlation_id();
        let envelope = self.request_envelope(correlation_id, request.into_request())?;
        self.publish_until(envelope, deadline, &cancel).await?;

        let response = self.wait_for(correlation_id, deadline, &cancel).await?;
        expect_reply::<R>(response)
    }

    /// First half of a call: publish and return the correlation id to wait on.
    pub async fn send(&self, request: impl Into<Request>) -> Result<CorrelationId, CallError> {
        let deadline = deadline_after(self.settings.call_deadline);
        let correlation_id = self.ids.correlation_id();
        let envelope = self.request_envelope(correlation_id, request.into())?;
        self.publish_until(envelope, deadline, &CancellationToken::new())
            .await?;
        Ok(correlation_id)
    }

    /// Second half of a call: wait for the reply to an earlier `send`.
    pub async fn await_response<R: Rpc>(
        &self,
        correlation_id: CorrelationId,
        options: CallOptions,
    ) -> Result<R::Reply, CallError> {
        let deadline = deadline_after(options.deadline.unwrap_or(self.settings.call_deadline));
        let cancel = options.cancel.unwrap_or_default();
        let response = self.wait_for(correlation_id, deadline, &cancel).await?;
        expect_reply::<R>(response)
    }

    fn request_envelope(
        &self,
        correlation_id: CorrelationId,
        request: Request,
    ) -> Result<Envelope, CallError> {
        let encoded = self.codec.encode(&Payload::Request(request))?;
        Ok(Envelope::new(
            self.ids.envelope_id(),
            correlation_id,
            encoded.type_name,
            encoded.content,
            self.clock.now(),
        ))
    }

    async fn publish_until(
        &self,
        envelope: Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), CallError> {
        let correlation_id = envelope.correlation_id();
        loop {
            match self
                .backend
                .publish(&self.channels.requests, envelope.clone())
                .await
            {
                Ok(()) => {
                    debug!(
                        %correlation_id,
                        type_name = envelope.type_name(),
                        channel = %self.channels.requests,
                        "request published"
                    );
                    return Ok(());
                }
                Err(err) if err.is_transient() && Instant::now() + TRANSIENT_BACKOFF < deadline => {
                    warn!(%correlation_id, error = %err, "publish failed, retrying");
                    self.pause(correlation_id, cancel, TRANSIENT_BACKOFF).await?;
                }
                Err(err) => return Err(CallError::Transport(err)),
            }
        }
    }

    async fn wait_for(
        &self,
        correlation_id: CorrelationId,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Response, CallError> {
        let started = Instant::now();
        let filter = ConsumeFilter::Correlation(correlation_id);
        let channel = &self.channels.responses;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(%correlation_id, channel = %channel, "gave up waiting for response");
                return Err(CallError::Timeout {
                    correlation_id,
                    waited: now - started,
                });
            }
            let attempt = self.settings.consume_timeout.min(deadline - now);

            let consumed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CallError::Cancelled { correlation_id });
                }
                consumed = self.backend.consume_one(channel, &filter, attempt) => consumed,
            };

            match consumed {
                Ok(None) => continue,
                Ok(Some(delivery)) => {
                    if delivery.envelope().correlation_id() != correlation_id {
                        // only a backend that ignores the filter gets here
                        warn!(
                            %correlation_id,
                            other = %delivery.envelope().correlation_id(),
                            "handing back a response meant for another call"
                        );
                        if let Err(err) = delivery.reject().await {
                            warn!(error = %err, "failed to hand back foreign response");
                        }
                        continue;
                    }
                    if let Some(envelope) = self.collect(delivery, deadline, cancel).await? {
                        debug!(
                            %correlation_id,
                            type_name = envelope.type_name(),
                            "response received"
                        );
                        return self.decode_response(&envelope);
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(%correlation_id, error = %err, "response channel unavailable, retrying");
                    let nap = TRANSIENT_BACKOFF.min(deadline.saturating_duration_since(Instant::now()));
                    self.pause(correlation_id, cancel, nap).await?;
                }
                Err(err) => return Err(CallError::Transport(err)),
            }
        }
    }

    /// Ack our own response, retrying on the same reservation.
    ///
    /// 届いたレスポンスは手放さない: ack が期限まで失敗し続けても中身は返し、
    /// 行だけが孤児として残る。`None` は予約が失われたので consume からやり直す。
    async fn collect(
        &self,
        mut delivery: Delivery,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, CallError> {
        let correlation_id = delivery.envelope().correlation_id();
        loop {
            match delivery.try_ack().await {
                Ok(()) => return Ok(Some(delivery.into_envelope())),
                Err(QueueError::ReservationLost { channel }) => {
                    warn!(%correlation_id, %channel, "reservation lost before ack, consuming again");
                    return Ok(None);
                }
                Err(err) if err.is_transient() => {
                    if Instant::now() + TRANSIENT_BACKOFF >= deadline {
                        warn!(
                            %correlation_id,
                            error = %err,
                            "ack still failing at the deadline; keeping the response, row stays behind"
                        );
                        return Ok(Some(delivery.into_envelope()));
                    }
                    warn!(%correlation_id, error = %err, "ack failed, retrying");
                    self.pause(correlation_id, cancel, TRANSIENT_BACKOFF).await?;
                }
                Err(err) => return Err(CallError::Transport(err)),
            }
        }
    }

    fn decode_response(&self, envelope: &Envelope) -> Result<Response, CallError> {
        match self.codec.decode(envelope.content(), envelope.type_name()) {
            Ok(Payload::Response(response)) => Ok(response),
            Ok(Payload::Request(request)) => Err(CallError::ResponseTypeMismatch {
                expected: "a response",
                actual: request.type_name().to_string(),
            }),
            Err(err) => Err(CallError::ResponseTypeMismatch {
                expected: "a decodable response",
                actual: format!("{} ({err})", envelope.type_name()),
            }),
        }
    }

    async fn pause(
        &self,
        correlation_id: CorrelationId,
        cancel: &CancellationToken,
        nap: Duration,
    ) -> Result<(), CallError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CallError::Cancelled { correlation_id }),
            _ = tokio::time::sleep(nap) => Ok(()),
        }
    }
}

fn expect_reply<R: Rpc>(response: Response) -> Result<R::Reply, CallError> {
    R::reply_from(response).map_err(|other| match other {
        Response::FaultResponse(fault) => CallError::Remote {
            request_type: fault.request_type,
            message: fault.message,
        },
        other => CallError::ResponseTypeMismatch {
            expected: <R::Reply as Message>::TYPE,
            actual: other.type_name().to_string(),
        },
    })
}
