//! Named events carried by the transport.
//!
//! Inbound events are parsed from `(name, payload)` pairs; outbound events
//! render back to the same shape. Payload field names follow the server's
//! conventions (`playerId`, `audioChunk`, `voice_enabled`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Envelope, GameState, SpeakerId};

/// Event names used on the wire.
pub mod names {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";

    pub const PLAY_AUDIO_CHUNK: &str = "play_audio_chunk";
    pub const GAME_STARTED: &str = "game_started";
    pub const GAME_STATE: &str = "game_state";
    pub const PHASE_UPDATE: &str = "phase_update";
    pub const REQUEST_SPEECH: &str = "request_speech";
    pub const START_DISCUSSION: &str = "start_discussion";
    pub const DISCUSSION_ENDED: &str = "discussion_ended";
    pub const START_VOTING: &str = "start_voting";
    pub const VOTING_ENDED: &str = "voting_ended";
    pub const START_NIGHT_WEREWOLF: &str = "start_night_werewolf";
    pub const START_NIGHT_VILLAGER: &str = "start_night_villager";
    pub const REQUEST_SEER_ACTION: &str = "request_seer_action";
    pub const SEER_RESULT: &str = "seer_result";
    pub const LOG_MESSAGE: &str = "log_message";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const NEW_SPEECH: &str = "new_speech";
    pub const SEER_CHALLENGE_PROMPT: &str = "seer_challenge_prompt";
    pub const GAME_END: &str = "game_end";

    pub const START_GAME: &str = "start_game";
    pub const SEND_SPEECH: &str = "send_speech";
    pub const SEND_DISCUSSION_SPEECH: &str = "send_discussion_speech";
    pub const SKIP_DISCUSSION: &str = "skip_discussion";
    pub const SEND_VOTE: &str = "send_vote";
    pub const SEND_NIGHT_ACTION: &str = "send_night_action";
    pub const SEND_SEER_ACTION: &str = "send_seer_action";
}

/// Errors produced while interpreting wire events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("empty line")]
    EmptyLine,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("malformed payload for '{event}': {reason}")]
    MalformedPayload { event: String, reason: String },
}

/// One encoded unit of synthesized speech for a speaker.
///
/// The payload is base64 text exactly as received; decoding happens later,
/// off the event path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    #[serde(rename = "playerId")]
    pub speaker: SpeakerId,
    #[serde(rename = "audioChunk")]
    pub payload: String,
}

/// Events the server sends during a session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PlayAudioChunk(AudioChunk),
    GameStarted,
    GameState(GameState),
    /// Display-only phase label.
    PhaseUpdate(String),
    RequestSpeech,
    StartDiscussion,
    DiscussionEnded,
    StartVoting,
    VotingEnded,
    StartNightWerewolf,
    StartNightVillager,
    RequestSeerAction { targets: Vec<SpeakerId> },
    SeerResult { target: SpeakerId, role: String },
    LogMessage(String),
    ErrorMessage(String),
    NewSpeech {
        speaker: SpeakerId,
        text: String,
        nickname: Option<String>,
    },
    SeerChallengePrompt {
        message: String,
        image_url: Option<String>,
    },
    GameEnd { winner: String },
}

#[derive(Deserialize)]
struct MessagePayload {
    message: String,
}

#[derive(Deserialize)]
struct SeerRequestPayload {
    #[serde(default)]
    targets: Vec<SpeakerId>,
}

#[derive(Deserialize)]
struct SeerResultPayload {
    target_id: SpeakerId,
    role: String,
}

#[derive(Deserialize)]
struct SpeechPayload {
    #[serde(rename = "playerId")]
    speaker: SpeakerId,
    text: String,
    #[serde(default)]
    nickname: Option<String>,
}

#[derive(Deserialize)]
struct ChallengePayload {
    message: String,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Deserialize)]
struct GameEndPayload {
    winner: String,
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|e| EventError::MalformedPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

impl InboundEvent {
    /// Interpret a named event and its payload.
    pub fn from_wire(name: &str, data: Value) -> Result<Self, EventError> {
        use names::*;

        let event = match name {
            PLAY_AUDIO_CHUNK => InboundEvent::PlayAudioChunk(payload(name, data)?),
            GAME_STARTED => InboundEvent::GameStarted,
            GAME_STATE => InboundEvent::GameState(payload(name, data)?),
            PHASE_UPDATE => InboundEvent::PhaseUpdate(payload(name, data)?),
            REQUEST_SPEECH => InboundEvent::RequestSpeech,
            START_DISCUSSION => InboundEvent::StartDiscussion,
            DISCUSSION_ENDED => InboundEvent::DiscussionEnded,
            START_VOTING => InboundEvent::StartVoting,
            VOTING_ENDED => InboundEvent::VotingEnded,
            START_NIGHT_WEREWOLF => InboundEvent::StartNightWerewolf,
            START_NIGHT_VILLAGER => InboundEvent::StartNightVillager,
            REQUEST_SEER_ACTION => {
                // Older servers send no payload at all.
                let targets = if data.is_null() {
                    Vec::new()
                } else {
                    payload::<SeerRequestPayload>(name, data)?.targets
                };
                InboundEvent::RequestSeerAction { targets }
            }
            SEER_RESULT => {
                let p: SeerResultPayload = payload(name, data)?;
                InboundEvent::SeerResult {
                    target: p.target_id,
                    role: p.role,
                }
            }
            LOG_MESSAGE => InboundEvent::LogMessage(payload(name, data)?),
            ERROR_MESSAGE => {
                InboundEvent::ErrorMessage(payload::<MessagePayload>(name, data)?.message)
            }
            NEW_SPEECH => {
                let p: SpeechPayload = payload(name, data)?;
                InboundEvent::NewSpeech {
                    speaker: p.speaker,
                    text: p.text,
                    nickname: p.nickname,
                }
            }
            SEER_CHALLENGE_PROMPT => {
                let p: ChallengePayload = payload(name, data)?;
                InboundEvent::SeerChallengePrompt {
                    message: p.message,
                    image_url: p.image_url,
                }
            }
            GAME_END => InboundEvent::GameEnd {
                winner: payload::<GameEndPayload>(name, data)?.winner,
            },
            other => return Err(EventError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        use names::*;
        match self {
            InboundEvent::PlayAudioChunk(_) => PLAY_AUDIO_CHUNK,
            InboundEvent::GameStarted => GAME_STARTED,
            InboundEvent::GameState(_) => GAME_STATE,
            InboundEvent::PhaseUpdate(_) => PHASE_UPDATE,
            InboundEvent::RequestSpeech => REQUEST_SPEECH,
            InboundEvent::StartDiscussion => START_DISCUSSION,
            InboundEvent::DiscussionEnded => DISCUSSION_ENDED,
            InboundEvent::StartVoting => START_VOTING,
            InboundEvent::VotingEnded => VOTING_ENDED,
            InboundEvent::StartNightWerewolf => START_NIGHT_WEREWOLF,
            InboundEvent::StartNightVillager => START_NIGHT_VILLAGER,
            InboundEvent::RequestSeerAction { .. } => REQUEST_SEER_ACTION,
            InboundEvent::SeerResult { .. } => SEER_RESULT,
            InboundEvent::LogMessage(_) => LOG_MESSAGE,
            InboundEvent::ErrorMessage(_) => ERROR_MESSAGE,
            InboundEvent::NewSpeech { .. } => NEW_SPEECH,
            InboundEvent::SeerChallengePrompt { .. } => SEER_CHALLENGE_PROMPT,
            InboundEvent::GameEnd { .. } => GAME_END,
        }
    }
}

/// What the transport delivers to the session: link state changes or events.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Event(InboundEvent),
}

impl TransportEvent {
    /// Interpret an envelope, treating `connect`/`disconnect` as link events.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, EventError> {
        match envelope.event.as_str() {
            names::CONNECT => Ok(TransportEvent::Connected),
            names::DISCONNECT => Ok(TransportEvent::Disconnected),
            name => InboundEvent::from_wire(name, envelope.data).map(TransportEvent::Event),
        }
    }
}

/// Events the client emits in response to user actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    StartGame { voice_enabled: bool },
    SendSpeech { text: String },
    SendDiscussionSpeech { text: String },
    SkipDiscussion,
    SendVote { target: SpeakerId },
    SendNightAction { target: SpeakerId },
    SendSeerAction { target: SpeakerId },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        use names::*;
        match self {
            OutboundEvent::StartGame { .. } => START_GAME,
            OutboundEvent::SendSpeech { .. } => SEND_SPEECH,
            OutboundEvent::SendDiscussionSpeech { .. } => SEND_DISCUSSION_SPEECH,
            OutboundEvent::SkipDiscussion => SKIP_DISCUSSION,
            OutboundEvent::SendVote { .. } => SEND_VOTE,
            OutboundEvent::SendNightAction { .. } => SEND_NIGHT_ACTION,
            OutboundEvent::SendSeerAction { .. } => SEND_SEER_ACTION,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::StartGame { voice_enabled } => json!({ "voice_enabled": voice_enabled }),
            OutboundEvent::SendSpeech { text } | OutboundEvent::SendDiscussionSpeech { text } => {
                json!({ "text": text })
            }
            OutboundEvent::SkipDiscussion => Value::Null,
            OutboundEvent::SendVote { target }
            | OutboundEvent::SendNightAction { target }
            | OutboundEvent::SendSeerAction { target } => json!({ "target": target }),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.name(), self.payload())
    }
}
