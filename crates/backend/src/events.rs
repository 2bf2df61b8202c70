//! Session state and commands for UI integration.
//!
//! The UI never talks to the transport or the audio engine directly. It
//! renders a cloned [`State`] and sends [`Command`]s; the session task applies
//! them, updates the state and asks the UI to repaint.

use api::{GameState, SpeakerId};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    audio::AudioDeviceInfo,
    phase::{InputSurface, Phase},
};

/// Transport link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Which top-level screen is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    /// Waiting for the user to start a game.
    #[default]
    PreGame,
    /// A game is running (or just ended and the restart window is open).
    InGame,
}

/// Caption of the start button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartLabel {
    #[default]
    Start,
    /// Shown after a game has finished.
    PlayAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

/// One line of the game log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

/// A line of speech shown in the speech feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechEntry {
    pub speaker: SpeakerId,
    /// Roster nickname, or `Player N` when unknown.
    pub nickname: String,
    pub text: String,
}

/// Verification prompt shown to the seer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeerChallenge {
    pub message: String,
    pub image_url: Option<String>,
}

/// Complete presentation state, cloned by the UI for rendering.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub connection: ConnectionStatus,
    pub screen: Screen,
    /// A `start_game` was sent and no game has started yet.
    pub start_pending: bool,
    pub start_label: StartLabel,

    pub phase: Phase,
    /// Free-form label from `phase_update`, for display only.
    pub phase_label: Option<String>,
    pub surface: InputSurface,
    /// Seconds left in the discussion countdown, while it runs.
    pub discussion_remaining: Option<u32>,

    /// Latest roster snapshot.
    pub game: Option<GameState>,
    /// Human-readable description of the local player's seat.
    pub role_summary: Option<String>,
    /// Players the seer may check, if the server listed them.
    pub seer_candidates: Vec<SpeakerId>,
    pub seer_challenge: Option<SeerChallenge>,

    /// Speakers whose audio is currently playing.
    pub speaking: BTreeSet<SpeakerId>,
    /// Per-speaker target volume.
    pub volumes: BTreeMap<SpeakerId, f32>,
    pub output_devices: Vec<AudioDeviceInfo>,
    pub selected_output: Option<String>,
    /// Whether an output sink is open.
    pub audio_available: bool,

    /// Newest entries last.
    pub log: VecDeque<LogEntry>,
    pub speeches: Vec<SpeechEntry>,
    /// Message that should interrupt the user (server errors, game end).
    pub alert: Option<String>,
}

impl State {
    /// Whether the start action is currently available.
    pub fn can_start(&self) -> bool {
        self.connection.is_connected() && self.screen == Screen::PreGame && !self.start_pending
    }
}

/// Commands the UI sends to the session.
#[derive(Debug, Clone)]
pub enum Command {
    /// Ask the server for a new game.
    StartGame { voice_enabled: bool },
    SubmitSpeech { text: String },
    SubmitDiscussionSpeech { text: String },
    SkipDiscussion,
    SubmitVote { target: i64 },
    SubmitNightAction { target: i64 },
    SubmitSeerAction { target: i64 },
    /// Raw input routed to whichever surface is open.
    Submit { input: String },
    SetSpeakerVolume { speaker: SpeakerId, volume: f32 },
    DismissAlert,
    RefreshAudioDevices,
    /// Switch output device; `None` selects the system default.
    SetOutputDevice { device_id: Option<String> },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_start_requires_connection_and_pregame() {
        let mut state = State::default();
        assert!(!state.can_start());

        state.connection = ConnectionStatus::Connected;
        assert!(state.can_start());

        state.start_pending = true;
        assert!(!state.can_start());

        state.start_pending = false;
        state.screen = Screen::InGame;
        assert!(!state.can_start());
    }
}
