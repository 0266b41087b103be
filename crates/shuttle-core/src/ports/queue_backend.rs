//! QueueBackend port - durable named channels of envelopes.
//!
//! One contract, several deployments:
//! - `ConsumeFilter::Any`: the envelope is removed before it is handed over
//!   (the dispatch loop owns the request channel).
//! - `ConsumeFilter::Correlation(id)`: the envelope is reserved and stays
//!   invisible to other consumers until the caller acks or rejects it
//!   (many gateway calls share the response channel).
//!
//! Envelopes that do not match a selective filter are never touched, so every
//! waiter keeps seeing its own response.
//!
//! # Implementations
//! - **InMemoryQueueBackend**: in-process, `Notify` wake-ups
//! - **SqliteQueueBackend**: table-backed, survives restarts

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{ChannelName, Classify, CorrelationId, Envelope, ErrorKind, InvalidChannelName};

/// Which envelope a consumer is willing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeFilter {
    Any,
    Correlation(CorrelationId),
}

impl ConsumeFilter {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            ConsumeFilter::Any => true,
            ConsumeFilter::Correlation(id) => envelope.correlation_id() == *id,
        }
    }

    /// Selective consumers get a reservation instead of an auto-ack.
    pub fn is_selective(&self) -> bool {
        matches!(self, ConsumeFilter::Correlation(_))
    }
}

/// Longest wait a single deadline may span; larger timeouts are clamped to it.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// `now + timeout`, clamped so a huge timeout cannot overflow `Instant`.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_WAIT)).unwrap_or(now)
}

/// Settles a reserved envelope. Implemented by each backend.
///
/// A failed call leaves the reservation as it was, so the same handle can
/// be asked again.
#[async_trait]
pub trait Settlement: Send {
    /// Permanently remove the envelope.
    async fn ack(&mut self) -> Result<(), QueueError>;

    /// Put the envelope back, same identity, `status_date` refreshed.
    async fn requeue(&mut self) -> Result<(), QueueError>;
}

/// An envelope handed out by `consume_one`.
///
/// Auto-acked deliveries are already gone from the channel. Reserved ones
/// must be settled with `ack` or `reject`; what happens to an unsettled
/// reservation that is dropped depends on the backend (in-memory requeues it
/// at once, sqlite lets the visibility timeout expire).
pub struct Delivery {
    envelope: Envelope,
    settlement: Option<Box<dyn Settlement>>,
}

impl Delivery {
    pub fn auto_acked(envelope: Envelope) -> Self {
        Self {
            envelope,
            settlement: None,
        }
    }

    pub fn reserved(envelope: Envelope, settlement: Box<dyn Settlement>) -> Self {
        Self {
            envelope,
            settlement: Some(settlement),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn is_reserved(&self) -> bool {
        self.settlement.is_some()
    }

    /// Accept the envelope. For an auto-acked delivery this just unwraps it.
    pub async fn ack(mut self) -> Result<Envelope, QueueError> {
        self.try_ack().await?;
        Ok(self.envelope)
    }

    /// Accept the envelope but keep the delivery.
    ///
    /// 失敗しても予約はそのまま残るので、同じ `Delivery` で `try_ack` を
    /// やり直せる。成功後は `is_reserved()` が false になる。
    pub async fn try_ack(&mut self) -> Result<(), QueueError> {
        if let Some(settlement) = self.settlement.as_mut() {
            settlement.ack().await?;
            self.settlement = None;
        }
        Ok(())
    }

    /// The envelope, giving up any reservation that is still held.
    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// Hand the envelope back to the channel for another consumer.
    pub async fn reject(mut self) -> Result<(), QueueError> {
        match self.settlement.as_mut() {
            Some(settlement) => settlement.requeue().await,
            None => Err(QueueError::AlreadySettled),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("reserved", &self.is_reserved())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed envelope on channel {channel}: {reason}")]
    MalformedEnvelope { channel: String, reason: String },

    #[error(transparent)]
    InvalidChannel(#[from] InvalidChannelName),

    #[error("delivery was already settled")]
    AlreadySettled,

    #[error("reservation on channel {channel} expired before it was settled")]
    ReservationLost { channel: String },

    #[error("queue storage error: {0}")]
    Storage(String),
}

impl Classify for QueueError {
    fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Unavailable(_) | QueueError::Storage(_) => ErrorKind::Transient,
            // the envelope is back in the channel; consuming again works
            QueueError::ReservationLost { .. } => ErrorKind::Transient,
            QueueError::MalformedEnvelope { .. } => ErrorKind::Permanent,
            QueueError::InvalidChannel(_) | QueueError::AlreadySettled => ErrorKind::Misuse,
        }
    }
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the channel if it does not exist. Idempotent.
    async fn declare(&self, channel: &ChannelName) -> Result<(), QueueError>;

    /// Append to the channel, declaring it first if needed.
    ///
    /// Returns an error instead of dropping the envelope when the backend is
    /// unreachable.
    async fn publish(&self, channel: &ChannelName, envelope: Envelope) -> Result<(), QueueError>;

    /// Wait up to `timeout` for an envelope accepted by `filter`.
    ///
    /// `Ok(None)` means nothing matched in time; that is not an error.
    async fn consume_one(
        &self,
        channel: &ChannelName,
        filter: &ConsumeFilter,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Envelopes currently held by the channel, reserved ones included.
    async fn depth(&self, channel: &ChannelName) -> Result<usize, QueueError>;
}
