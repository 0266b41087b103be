//! Domain model: identifiers, the envelope, error classification, and the
//! fleet/job shapes carried by the vocabulary.

pub mod envelope;
pub mod errors;
pub mod fleet;
pub mod ids;
pub mod job;

pub use self::envelope::{ChannelName, Channels, Envelope, InvalidChannelName};
pub use self::errors::{Classify, ErrorKind};
pub use self::fleet::{Car, Company};
pub use self::ids::{CorrelationId, EnvelopeId, Id, IdMarker};
pub use self::job::{JobInfo, JobName, JobStatus, UnknownJobName};
