//! Backend library for the werewolf game client.
//!
//! This crate provides the core client functionality:
//! - Decoding and per-speaker sequential playback of streamed speech
//! - Phase-driven gating of user actions
//! - State-driven API for UI integration
//!
//! # Architecture
//!
//! The backend exposes a **state-driven API** to the UI. The UI does not poll for
//! individual events; instead:
//!
//! 1. The backend exposes a `State` object representing the complete session state
//! 2. The UI renders based on this state
//! 3. User actions result in **commands** sent to the backend
//! 4. The backend updates state and notifies the UI via a **repaint callback**
//! 5. The UI re-renders from the new state
//!
//! Internally a [`SessionController`] owns the [`GamePhaseStateMachine`] and
//! the [`PlaybackEngine`] (speaker queues plus the [`PlaybackMixer`]); the
//! session task drives it with transport events, decode completions and
//! timers.
//!
//! # Usage
//!
//! ```ignore
//! use backend::{Command, OutputSelection, SessionConfig, SessionHandle, transport_pair};
//!
//! let (link, peer) = transport_pair();
//! let handle = SessionHandle::new(link, SessionConfig::default(), OutputSelection::Default, || {
//!     // Request UI repaint
//! });
//!
//! handle.send(Command::StartGame { voice_enabled: true });
//!
//! let state = handle.state();
//! if state.can_start() { /* enable the start button */ }
//! ```

// Audio output
pub mod audio;
pub use audio::{
    AudioConfig, AudioDeviceInfo, AudioOutput, AudioSystem, CHANNELS, FRAME_SIZE,
    MAX_PLAYBACK_BUFFER_SAMPLES, SAMPLE_RATE,
};

// Chunk decoding (symphonia + rubato)
pub mod decoder;
pub use decoder::{AudioChunkDecoder, DecodeError, DecodeErrorKind, DecodedBuffer};

// Per-speaker ordering, gain channels and the engine tying them together
pub mod playback_queue;
pub use playback_queue::{ChunkTicket, SpeakerQueues};

pub mod mixer;
pub use mixer::{GainControl, MAX_GAIN, MIN_GAIN, OutputSink, PlaybackMixer};

pub mod engine;
pub use engine::{PlaybackEngine, PlaybackEvent};

// Phase state machine and input validation
pub mod phase;
pub use phase::{
    ActionKind, DiscussionTimer, GamePhaseStateMachine, InputSurface, Phase, PhaseEvent, PhaseState,
    TimerChange, TimerTick, Transition, transition,
};

pub mod validation;

pub mod error;
pub use error::{SessionError, ValidationError};

// State and command types
pub mod events;
pub use events::{
    Command, ConnectionStatus, LogEntry, LogLevel, Screen, SeerChallenge, SpeechEntry, StartLabel,
    State,
};

// Session controller and its driver
pub mod session;
pub use session::{Effect, SessionConfig, SessionController};

mod session_task;

pub mod handle;
pub use handle::{
    OutputSelection, SessionHandle, SinkFactory, TransportLink, TransportPeer, transport_pair,
};

// Re-exports from api crate
pub use api::{GameState, InboundEvent, OutboundEvent, PlayerInfo, SpeakerId, TransportEvent};
