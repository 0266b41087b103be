//! IdGenerator port - id minting.
//!
//! # Implementations
//! - **UlidGenerator**: ULID built from the injected clock plus 80 random bits.

use std::sync::Arc;

use crate::domain::ids::{CorrelationId, EnvelopeId};
use crate::ports::Clock;
use ulid::Ulid;

/// Mints envelope and correlation ids.
///
/// `Send + Sync`: one generator is shared by every gateway call and the
/// dispatch loop.
pub trait IdGenerator: Send + Sync {
    fn envelope_id(&self) -> EnvelopeId;

    /// A fresh id for one logical call; never handed out twice.
    fn correlation_id(&self) -> CorrelationId;
}

/// ULID-based generator.
///
/// The timestamp part comes from the clock, so a `FixedClock` yields ids with
/// a known timestamp (the random part still keeps them unique).
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn envelope_id(&self) -> EnvelopeId {
        EnvelopeId::from_ulid(self.next())
    }

    fn correlation_id(&self) -> CorrelationId {
        CorrelationId::from_ulid(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.correlation_id();
        let id2 = id_gen.correlation_id();
        let id3 = id_gen.correlation_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.envelope_id();
        let id2 = id_gen.envelope_id();
        assert_ne!(id1, id2);

        let ts1 = Ulid::from(id1.as_uuid()).timestamp_ms();
        let ts2 = Ulid::from(id2.as_uuid()).timestamp_ms();
        assert_eq!(ts1, ts2);
        assert_eq!(ts1, fixed_time.timestamp_millis() as u64);
    }
}
