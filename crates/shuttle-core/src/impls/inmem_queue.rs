//! InMemoryQueueBackend - in-process channels for tests and single-process runs.
//!
//! Each channel keeps its ready envelopes in publish order plus a table of
//! reserved ones. Waiters park on the channel's `Notify`; publish and requeue
//! wake them, so an idle consumer costs nothing until something arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::{ChannelName, Envelope};
use crate::ports::{
    Clock, ConsumeFilter, Delivery, QueueBackend, QueueError, Settlement, SystemClock,
    deadline_after,
};

/// Envelope plus its position in the channel.
#[derive(Debug)]
struct Slot {
    seq: u64,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: VecDeque<Slot>,
    reserved: HashMap<u64, Envelope>,
    notify: Arc<Notify>,
}

impl ChannelState {
    /// Put a slot back where it was, keeping publish order.
    fn restore(&mut self, slot: Slot) {
        let at = self.ready.partition_point(|s| s.seq < slot.seq);
        self.ready.insert(at, slot);
    }
}

#[derive(Debug)]
struct State {
    channels: HashMap<ChannelName, ChannelState>,
    next_seq: u64,
    available: bool,
}

impl State {
    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.available {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory backend switched off".into()))
        }
    }

    fn channel_mut(&mut self, channel: &ChannelName) -> &mut ChannelState {
        self.channels.entry(channel.clone()).or_default()
    }
}

struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    /// Move a reservation back to the ready list. `false` if it was already gone.
    fn release(&self, channel: &ChannelName, seq: u64) -> bool {
        let mut state = self.state.lock();
        let Some(ch) = state.channels.get_mut(channel) else {
            return false;
        };
        let Some(mut envelope) = ch.reserved.remove(&seq) else {
            return false;
        };
        envelope.touch(self.clock.now());
        ch.restore(Slot { seq, envelope });
        ch.notify.notify_waiters();
        true
    }
}

/// In-process queue backend.
///
/// Cloning shares the same channels.
#[derive(Clone)]
pub struct InMemoryQueueBackend {
    shared: Arc<Shared>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    channels: HashMap::new(),
                    next_seq: 0,
                    available: true,
                }),
                clock,
            }),
        }
    }

    /// Simulate losing (or regaining) the connection to the medium.
    pub fn set_available(&self, available: bool) {
        self.shared.state.lock().available = available;
    }

    fn try_take(
        &self,
        channel: &ChannelName,
        filter: &ConsumeFilter,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.shared.state.lock();
        state.ensure_available()?;
        let ch = state.channel_mut(channel);

        let Some(pos) = ch.ready.iter().position(|s| filter.matches(&s.envelope)) else {
            return Ok(None);
        };
        let Some(slot) = ch.ready.remove(pos) else {
            return Ok(None);
        };

        if !filter.is_selective() {
            return Ok(Some(Delivery::auto_acked(slot.envelope)));
        }

        ch.reserved.insert(slot.seq, slot.envelope.clone());
        let reservation = Reservation {
            shared: self.shared.clone(),
            channel: channel.clone(),
            seq: slot.seq,
            settled: false,
        };
        Ok(Some(Delivery::reserved(slot.envelope, Box::new(reservation))))
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn declare(&self, channel: &ChannelName) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        state.ensure_available()?;
        state.channel_mut(channel);
        Ok(())
    }

    async fn publish(&self, channel: &ChannelName, envelope: Envelope) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        state.ensure_available()?;
        let seq = state.next_seq;
        state.next_seq += 1;

        let ch = state.channel_mut(channel);
        ch.ready.push_back(Slot { seq, envelope });
        ch.notify.notify_waiters();
        Ok(())
    }

    async fn consume_one(
        &self,
        channel: &ChannelName,
        filter: &ConsumeFilter,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = deadline_after(timeout);
        loop {
            let notify = {
                let mut state = self.shared.state.lock();
                state.ensure_available()?;
                state.channel_mut(channel).notify.clone()
            };

            // Register interest before looking, so a publish that lands between
            // the check and the await still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(channel, filter)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn depth(&self, channel: &ChannelName) -> Result<usize, QueueError> {
        let state = self.shared.state.lock();
        state.ensure_available()?;
        Ok(state
            .channels
            .get(channel)
            .map(|ch| ch.ready.len() + ch.reserved.len())
            .unwrap_or(0))
    }
}

/// Reservation handle for one selectively consumed envelope.
struct Reservation {
    shared: Arc<Shared>,
    channel: ChannelName,
    seq: u64,
    settled: bool,
}

#[async_trait]
impl Settlement for Reservation {
    async fn ack(&mut self) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        state.ensure_available()?;
        let removed = state
            .channels
            .get_mut(&self.channel)
            .and_then(|ch| ch.reserved.remove(&self.seq));
        drop(state);

        match removed {
            Some(_) => {
                self.settled = true;
                Ok(())
            }
            None => Err(QueueError::ReservationLost {
                channel: self.channel.to_string(),
            }),
        }
    }

    async fn requeue(&mut self) -> Result<(), QueueError> {
        self.shared.state.lock().ensure_available()?;
        self.settled = true;
        if self.shared.release(&self.channel, self.seq) {
            Ok(())
        } else {
            Err(QueueError::ReservationLost {
                channel: self.channel.to_string(),
            })
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled && self.shared.release(&self.channel, self.seq) {
            tracing::debug!(channel = %self.channel, "unsettled reservation returned to channel");
        }
    }
}
