//! Envelope - the record that travels through a channel.
//!
//! The envelope does not know what its payload means. `type_name` tells the
//! type registry how to parse `content`, `correlation_id` tells a waiting
//! gateway whether the envelope is its answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CorrelationId, EnvelopeId};

/// Wire/storage record.
///
/// Serialized with the camelCase keys other processes expect:
/// `{ id, correlationId, typeName, content, created, statusDate }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    id: EnvelopeId,
    correlation_id: CorrelationId,
    type_name: String,
    /// The serialized message, embedded as a string.
    content: String,
    created: DateTime<Utc>,
    /// Last time the envelope was created or requeued.
    status_date: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        id: EnvelopeId,
        correlation_id: CorrelationId,
        type_name: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            type_name: type_name.into(),
            content: content.into(),
            created: now,
            status_date: now,
        }
    }

    /// Rebuild an envelope read back from storage.
    pub fn restore(
        id: EnvelopeId,
        correlation_id: CorrelationId,
        type_name: String,
        content: String,
        created: DateTime<Utc>,
        status_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            type_name,
            content,
            created,
            status_date,
        }
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn status_date(&self) -> DateTime<Utc> {
        self.status_date
    }

    /// Record that the envelope went back to its channel.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.status_date = now;
    }
}

/// A named channel (request channel, response channel, ...).
///
/// Names are configuration, not protocol; the only rule is that they are
/// 1..=200 chars of ASCII alphanumerics, `-`, `_` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

/// Rejected channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel name {name:?}: {reason}")]
pub struct InvalidChannelName {
    pub name: String,
    pub reason: &'static str,
}

impl ChannelName {
    pub const MAX_LEN: usize = 200;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidChannelName> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LEN {
            return Err(InvalidChannelName {
                name,
                reason: "must be 1-200 characters",
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidChannelName {
                name,
                reason: "only ASCII alphanumerics, '-', '_' and '.' are allowed",
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = InvalidChannelName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The two logical channels of one request/reply pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    /// Front-end -> back-end.
    pub requests: ChannelName,
    /// Back-end -> front-end.
    pub responses: ChannelName,
}

impl Channels {
    pub fn new(requests: ChannelName, responses: ChannelName) -> Self {
        Self {
            requests,
            responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn sample(now: DateTime<Utc>) -> Envelope {
        Envelope::new(
            EnvelopeId::from_ulid(Ulid::new()),
            CorrelationId::from_ulid(Ulid::new()),
            "GetCarRequest",
            r#"{"dataId":"00000000-0000-0000-0000-000000000000"}"#,
            now,
        )
    }

    #[test]
    fn wire_format_uses_camel_case_keys() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let envelope = sample(now);

        let value = serde_json::to_value(&envelope).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();

        assert_eq!(
            keys,
            vec!["content", "correlationId", "created", "id", "statusDate", "typeName"]
        );
        assert_eq!(value["typeName"], "GetCarRequest");
        assert_eq!(value["correlationId"], envelope.correlation_id().as_uuid().to_string());
        // content stays an embedded string, not a nested object
        assert!(value["content"].is_string());

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn touch_only_moves_status_date() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let mut envelope = sample(now);
        let id = envelope.id();

        envelope.touch(now + Duration::seconds(5));

        assert_eq!(envelope.id(), id);
        assert_eq!(envelope.created(), now);
        assert_eq!(envelope.status_date(), now + Duration::seconds(5));
    }

    #[test]
    fn channel_name_validation() {
        assert!(ChannelName::new("client-queue").is_ok());
        assert!(ChannelName::new("fleet.responses_v1").is_ok());
        assert!(ChannelName::new("").is_err());
        assert!(ChannelName::new("has space").is_err());
        assert!(ChannelName::new("x".repeat(201)).is_err());

        let err = serde_json::from_str::<ChannelName>("\"bad/name\"").unwrap_err();
        assert!(err.to_string().contains("invalid channel name"));
    }
}
