//! Werewolf client wire vocabulary.
//!
//! The game server talks to the client over a bidirectional named-event
//! channel. This crate defines the events the client understands
//! ([`InboundEvent`], [`TransportEvent`]), the events it emits
//! ([`OutboundEvent`]), the roster snapshot ([`GameState`]) and a small
//! line-delimited JSON [`Envelope`] used by bridges that carry those events
//! over a byte stream.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod events;
pub mod game;

pub use events::{AudioChunk, EventError, InboundEvent, OutboundEvent, TransportEvent, names};
pub use game::{GameState, PlayerInfo};

/// Opaque identifier of a participant, stable for a session.
///
/// Player numbers start at 1; the same number identifies the speaker of an
/// audio chunk and the target of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerId(pub u32);

impl SpeakerId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SpeakerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A named event with its JSON payload, one per line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Encode an envelope as a single newline-terminated JSON line.
pub fn encode_line(envelope: &Envelope) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line into an envelope.
///
/// Surrounding whitespace (including the trailing newline) is ignored.
pub fn decode_line(line: &str) -> Result<Envelope, EventError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(EventError::EmptyLine);
    }
    serde_json::from_str(trimmed).map_err(|e| EventError::MalformedEnvelope(e.to_string()))
}
