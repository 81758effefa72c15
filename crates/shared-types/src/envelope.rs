//! # Delivery Envelope
//!
//! Wrapper added by the routing layer around every delivered [`Message`].
//!
//! The envelope carries what the payload must not: a unique delivery id, the
//! owner that published it and the topic it was routed through.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::ipc::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique delivery id.
    pub id: Uuid,
    /// Owner id of the publisher.
    pub sender: String,
    /// Topic the message was published on.
    pub topic: String,
    /// Milliseconds since the Unix epoch, at publication.
    pub timestamp_ms: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, topic: impl Into<String>, message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            topic: topic.into(),
            timestamp_ms: now_millis(),
            message,
        }
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
