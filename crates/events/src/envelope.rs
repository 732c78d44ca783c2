use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

/// Envelope for a published message.
///
/// Carries a unique id (for idempotent consumers), the topic and schema
/// version, and the time the envelope was published next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<M> {
    message_id: Uuid,
    topic: String,
    version: u32,
    occurred_at: DateTime<Utc>,
    published_at: DateTime<Utc>,
    payload: M,
}

impl<M: Message> Envelope<M> {
    /// Wrap a message, stamping a fresh id and the publication time.
    pub fn wrap(payload: M) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            topic: payload.topic().to_string(),
            version: payload.version(),
            occurred_at: payload.occurred_at(),
            published_at: Utc::now(),
            payload,
        }
    }
}

impl<M> Envelope<M> {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn into_payload(self) -> M {
        self.payload
    }
}
