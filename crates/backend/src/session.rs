//! Session controller.
//!
//! [`SessionController`] holds everything the client knows about the session
//! and reacts to three kinds of input: transport events, UI commands and
//! completions of work it asked for (decodes, timer ticks, the restart
//! window). It performs no I/O itself. Each entry point returns the
//! [`Effect`]s the caller must carry out, which keeps every transition
//! synchronous and testable without a runtime.

use api::{AudioChunk, InboundEvent, OutboundEvent, TransportEvent};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioDeviceInfo,
    decoder::{DecodeError, DecodedBuffer},
    engine::{PlaybackEngine, PlaybackEvent},
    error::{SessionError, ValidationError},
    events::{
        Command, ConnectionStatus, LogEntry, LogLevel, Screen, SeerChallenge, SpeechEntry,
        StartLabel, State,
    },
    mixer::{DEFAULT_GAIN_TIME_CONSTANT, OutputSink},
    phase::{
        ActionKind, GamePhaseStateMachine, InputSurface, PhaseEvent, TimerChange, TimerTick,
        Transition,
    },
    playback_queue::ChunkTicket,
    validation::{self, FALLBACK_ROSTER_SIZE},
};

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between game end and the return to the pre-game screen.
    pub restart_delay: Duration,
    /// Discussion length used when the snapshot does not specify one.
    pub discussion_fallback_secs: u32,
    /// Roster size assumed for range checks before the first snapshot.
    pub fallback_roster_size: u32,
    /// Volume of a speaker channel until the user changes it.
    pub default_volume: f32,
    /// Time constant of volume ramps, in seconds.
    pub gain_time_constant: f32,
    /// Maximum number of log entries kept.
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(3000),
            discussion_fallback_secs: 60,
            fallback_roster_size: FALLBACK_ROSTER_SIZE,
            default_volume: 1.0,
            gain_time_constant: DEFAULT_GAIN_TIME_CONSTANT,
            log_capacity: 200,
        }
    }
}

/// Work the controller asks its driver to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send an event to the server.
    Emit(OutboundEvent),
    /// Decode a chunk and report back through
    /// [`SessionController::handle_decoded`].
    Decode { ticket: ChunkTicket, chunk: AudioChunk },
    /// Tick [`SessionController::discussion_tick`] once per second with this
    /// generation, replacing any earlier countdown.
    StartDiscussionTimer { generation: u64 },
    StopDiscussionTimer,
    /// Call [`SessionController::restart_window_elapsed`] after `delay`,
    /// replacing any earlier window.
    ScheduleRestart { generation: u64, delay: Duration },
    CancelRestart,
}

pub struct SessionController {
    config: SessionConfig,
    state: State,
    phase: GamePhaseStateMachine,
    engine: PlaybackEngine,
    /// Generation of the restart window currently scheduled, if any.
    restart_window: Option<u64>,
    restart_generation: u64,
    dirty: bool,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Self {
        let engine = PlaybackEngine::new(config.gain_time_constant, config.default_volume);
        Self {
            config,
            state: State::default(),
            phase: GamePhaseStateMachine::new(),
            engine,
            restart_window: None,
            restart_generation: 0,
            dirty: true,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn phase_machine(&self) -> &GamePhaseStateMachine {
        &self.phase
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    /// Whether the state changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    // -------- transport --------

    pub fn handle_transport(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::Connected => {
                info!("session: connected");
                self.state.connection = ConnectionStatus::Connected;
                self.log(LogLevel::Success, "Connected to the game server");
                Vec::new()
            }
            TransportEvent::Disconnected => {
                self.state.connection = ConnectionStatus::Disconnected;
                self.report(SessionError::ConnectivityLoss);
                Vec::new()
            }
            TransportEvent::Event(event) => self.handle_inbound(event),
        }
    }

    fn handle_inbound(&mut self, event: InboundEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.dirty = true;

        match &event {
            InboundEvent::PlayAudioChunk(chunk) => {
                if !self.engine.has_sink() {
                    debug!(
                        speaker = chunk.speaker.get(),
                        "session: no audio output, dropping chunk"
                    );
                    return effects;
                }
                let ticket = self.engine.reserve(chunk.speaker);
                effects.push(Effect::Decode {
                    ticket,
                    chunk: chunk.clone(),
                });
                return effects;
            }
            InboundEvent::GameStarted => {
                self.state.screen = Screen::InGame;
                self.state.start_pending = false;
                self.state.seer_candidates.clear();
                self.state.seer_challenge = None;
                if self.restart_window.take().is_some() {
                    debug!("session: new game cancels restart window");
                    self.restart_generation += 1;
                    effects.push(Effect::CancelRestart);
                }
                self.log(LogLevel::Success, "New game started! Assigning roles...");
            }
            InboundEvent::GameState(game) => {
                self.state.role_summary = game.role_summary();
                self.state.game = Some(game.clone());
                return effects;
            }
            InboundEvent::PhaseUpdate(label) => {
                self.state.phase_label = Some(label.clone());
                return effects;
            }
            InboundEvent::NewSpeech {
                speaker,
                text,
                nickname,
            } => {
                let nickname = nickname.clone().unwrap_or_else(|| {
                    self.state
                        .game
                        .as_ref()
                        .map(|g| g.nickname_for(*speaker))
                        .unwrap_or_else(|| format!("Player {}", speaker))
                });
                self.state.speeches.push(SpeechEntry {
                    speaker: *speaker,
                    nickname,
                    text: text.clone(),
                });
                return effects;
            }
            InboundEvent::LogMessage(message) => {
                self.log(LogLevel::Info, message.clone());
                return effects;
            }
            InboundEvent::ErrorMessage(message) => {
                // A failed start may be retried.
                self.state.start_pending = false;
                self.report(SessionError::Protocol {
                    message: message.clone(),
                });
                return effects;
            }
            InboundEvent::RequestSeerAction { targets } => {
                self.state.seer_candidates = targets.clone();
                self.log(LogLevel::Info, "Night: seer, choose a player to check.");
            }
            InboundEvent::SeerResult { target, role } => {
                self.log(
                    LogLevel::Success,
                    format!("Seer result: player {} is {}", target, role),
                );
                return effects;
            }
            InboundEvent::SeerChallengePrompt { message, image_url } => {
                self.state.seer_challenge = Some(SeerChallenge {
                    message: message.clone(),
                    image_url: image_url.clone(),
                });
                return effects;
            }
            InboundEvent::GameEnd { winner } => {
                let message = format!("Game over! {} win!", winner);
                self.state.alert = Some(message.clone());
                self.log(LogLevel::Success, message);

                self.restart_generation += 1;
                self.restart_window = Some(self.restart_generation);
                effects.push(Effect::ScheduleRestart {
                    generation: self.restart_generation,
                    delay: self.config.restart_delay,
                });
            }
            _ => {}
        }

        if let Some(phase_event) = PhaseEvent::from_inbound(&event) {
            self.apply_phase(phase_event, &mut effects);
        }
        effects
    }

    fn apply_phase(&mut self, event: PhaseEvent, effects: &mut Vec<Effect>) {
        let discussion_secs = self.discussion_secs();
        let Transition::Applied { state, timer } = self.phase.apply(event, discussion_secs) else {
            return;
        };
        self.state.phase = state.phase;
        self.state.surface = state.surface;

        match timer {
            TimerChange::Started { generation, seconds } => {
                self.state.discussion_remaining = Some(seconds);
                effects.push(Effect::StartDiscussionTimer { generation });
            }
            TimerChange::Stopped => {
                self.state.discussion_remaining = None;
                effects.push(Effect::StopDiscussionTimer);
            }
            TimerChange::Unchanged => {}
        }
    }

    fn discussion_secs(&self) -> u32 {
        self.state
            .game
            .as_ref()
            .and_then(|g| g.discussion_time)
            .filter(|&secs| secs > 0)
            .unwrap_or(self.config.discussion_fallback_secs)
    }

    // -------- completions --------

    /// A decode finished (or failed).
    pub fn handle_decoded(
        &mut self,
        ticket: ChunkTicket,
        result: Result<DecodedBuffer, DecodeError>,
    ) {
        if let Err(e) = self.engine.complete(ticket, result) {
            self.report(SessionError::Decode(e));
        }
        self.sync_speaking();
    }

    /// One second of the discussion countdown elapsed.
    pub fn discussion_tick(&mut self, generation: u64) -> Vec<Effect> {
        match self.phase.tick_timer(generation) {
            TimerTick::Remaining(seconds) => {
                self.state.discussion_remaining = Some(seconds);
                self.dirty = true;
                Vec::new()
            }
            TimerTick::Expired => {
                self.state.discussion_remaining = None;
                self.dirty = true;
                vec![Effect::StopDiscussionTimer]
            }
            TimerTick::Stale => Vec::new(),
        }
    }

    /// The post-game delay elapsed.
    pub fn restart_window_elapsed(&mut self, generation: u64) {
        if self.restart_window != Some(generation) {
            debug!(generation, "session: ignoring stale restart window");
            return;
        }
        self.restart_window = None;
        self.state.screen = Screen::PreGame;
        self.state.speeches.clear();
        self.state.start_label = StartLabel::PlayAgain;
        self.state.start_pending = false;
        self.log(LogLevel::Info, "Start a new game to play again");
        info!("session: back to pre-game screen");
    }

    // -------- audio --------

    /// Mix pending audio into the sink.
    pub fn pump_audio(&mut self) {
        self.engine.pump();
        self.sync_speaking();
    }

    fn sync_speaking(&mut self) {
        for event in self.engine.drain_events() {
            match event {
                PlaybackEvent::Started(speaker) => self.state.speaking.insert(speaker),
                PlaybackEvent::Stopped(speaker) => self.state.speaking.remove(&speaker),
            };
            self.dirty = true;
        }
    }

    pub fn replace_sink(&mut self, sink: Option<Box<dyn OutputSink>>) {
        let available = sink.is_some();
        self.engine.replace_sink(sink);
        self.sync_speaking();
        if available && !self.state.audio_available {
            self.log(LogLevel::Success, "Audio system ready.");
        }
        self.state.audio_available = available;
        self.dirty = true;
    }

    /// Report that no output could be opened.
    pub fn audio_unavailable(&mut self, reason: &str) {
        warn!("session: audio output unavailable: {}", reason);
        self.engine.replace_sink(None);
        self.sync_speaking();
        self.state.audio_available = false;
        self.log(LogLevel::Error, format!("Audio output unavailable: {}", reason));
    }

    pub fn set_output_devices(&mut self, devices: Vec<AudioDeviceInfo>, selected: Option<String>) {
        self.state.output_devices = devices;
        self.state.selected_output = selected;
        self.dirty = true;
    }

    // -------- commands --------

    /// Apply a UI command. Rejected actions are logged for the user.
    pub fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        match self.try_command(command) {
            Ok(effects) => effects,
            Err(e) => {
                self.report(SessionError::Validation(e));
                Vec::new()
            }
        }
    }

    /// Apply a UI command, returning the rejection instead of logging it.
    pub fn try_command(&mut self, command: Command) -> Result<Vec<Effect>, ValidationError> {
        let effects = match command {
            Command::StartGame { voice_enabled } => self.start_game(voice_enabled)?,
            Command::SubmitSpeech { text } => self.submit_speech(&text)?,
            Command::SubmitDiscussionSpeech { text } => self.submit_discussion_speech(&text)?,
            Command::SkipDiscussion => {
                self.phase.require_surface(InputSurface::Discussion)?;
                vec![Effect::Emit(OutboundEvent::SkipDiscussion)]
            }
            Command::SubmitVote { target } => self.submit_target(ActionKind::Vote, target)?,
            Command::SubmitNightAction { target } => self.submit_target(ActionKind::Night, target)?,
            Command::SubmitSeerAction { target } => self.submit_target(ActionKind::Seer, target)?,
            Command::Submit { input } => self.submit_input(&input)?,
            Command::SetSpeakerVolume { speaker, volume } => {
                let volume = self.engine.set_volume(speaker, volume);
                self.state.volumes.insert(speaker, volume);
                Vec::new()
            }
            Command::DismissAlert => {
                self.state.alert = None;
                Vec::new()
            }
            Command::RefreshAudioDevices | Command::SetOutputDevice { .. } | Command::Shutdown => {
                debug!("session: command handled by the session task");
                return Ok(Vec::new());
            }
        };
        self.dirty = true;
        Ok(effects)
    }

    fn start_game(&mut self, voice_enabled: bool) -> Result<Vec<Effect>, ValidationError> {
        if !self.state.connection.is_connected() {
            return Err(ValidationError::NotConnected);
        }
        if !self.state.can_start() {
            return Err(ValidationError::GameInProgress);
        }
        self.state.start_pending = true;
        self.log(
            LogLevel::Success,
            format!(
                "Creating a new game (voice: {})...",
                if voice_enabled { "on" } else { "off" }
            ),
        );
        Ok(vec![Effect::Emit(OutboundEvent::StartGame { voice_enabled })])
    }

    fn submit_speech(&mut self, raw: &str) -> Result<Vec<Effect>, ValidationError> {
        self.phase.require_surface(InputSurface::Speech)?;
        let text = validation::speech_text(raw)?;
        self.close_surface(InputSurface::Speech);
        Ok(vec![Effect::Emit(OutboundEvent::SendSpeech { text })])
    }

    fn submit_discussion_speech(&mut self, raw: &str) -> Result<Vec<Effect>, ValidationError> {
        self.phase.require_surface(InputSurface::Discussion)?;
        let text = validation::speech_text(raw)?;
        Ok(vec![Effect::Emit(OutboundEvent::SendDiscussionSpeech { text })])
    }

    fn submit_target(
        &mut self,
        kind: ActionKind,
        target: i64,
    ) -> Result<Vec<Effect>, ValidationError> {
        self.phase.require_surface(kind.surface())?;
        let target = validation::validate_target(
            kind,
            target,
            self.state.game.as_ref(),
            self.config.fallback_roster_size,
        )?;
        self.close_surface(kind.surface());

        let event = match kind {
            ActionKind::Vote => OutboundEvent::SendVote { target },
            ActionKind::Night => OutboundEvent::SendNightAction { target },
            ActionKind::Seer => OutboundEvent::SendSeerAction { target },
        };
        info!(action = %event.name(), target = target.get(), "session: action accepted");
        Ok(vec![Effect::Emit(event)])
    }

    /// Route raw input to the open surface.
    fn submit_input(&mut self, input: &str) -> Result<Vec<Effect>, ValidationError> {
        let kind = match self.phase.surface() {
            InputSurface::None => return Err(ValidationError::NoActiveSurface),
            InputSurface::Speech => return self.submit_speech(input),
            InputSurface::Discussion => return self.submit_discussion_speech(input),
            InputSurface::Vote => ActionKind::Vote,
            InputSurface::Night => ActionKind::Night,
            InputSurface::Seer => ActionKind::Seer,
        };
        let target = validation::parse_target(
            input,
            self.state.game.as_ref(),
            self.config.fallback_roster_size,
        )?;
        self.submit_target(kind, target)
    }

    fn close_surface(&mut self, surface: InputSurface) {
        if self.phase.close_surface(surface) {
            self.state.surface = self.phase.surface();
        }
    }

    // -------- reporting --------

    fn report(&mut self, error: SessionError) {
        match &error {
            SessionError::Decode(e) => warn!("session: {}", e),
            SessionError::Validation(e) => debug!("session: rejected input: {}", e),
            SessionError::Protocol { message } => {
                warn!("session: server error: {}", message);
                self.state.alert = Some(message.clone());
            }
            SessionError::ConnectivityLoss => warn!("session: disconnected"),
        }
        self.log(LogLevel::Error, error.to_string());
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.state.log.push_back(LogEntry {
            timestamp: chrono::Local::now(),
            level,
            message: message.into(),
        });
        while self.state.log.len() > self.config.log_capacity {
            self.state.log.pop_front();
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use api::{GameState, PlayerInfo, SpeakerId};

    fn ev(event: InboundEvent) -> TransportEvent {
        TransportEvent::Event(event)
    }

    fn connected() -> SessionController {
        let mut session = SessionController::new(SessionConfig::default());
        session.handle_transport(TransportEvent::Connected);
        session
    }

    fn roster() -> GameState {
        GameState {
            players: (1..=7)
                .map(|id| PlayerInfo {
                    id: SpeakerId(id),
                    nickname: format!("P{}", id),
                    is_alive: id != 5,
                    is_human: id == 3,
                    color: None,
                })
                .collect(),
            human_id: Some(SpeakerId(3)),
            human_role: Some("villager".to_string()),
            discussion_time: Some(30),
            ..Default::default()
        }
    }

    fn last_log(session: &SessionController) -> &LogEntry {
        session.state().log.back().unwrap()
    }

    #[test]
    fn test_start_requires_connection() {
        let mut session = SessionController::new(SessionConfig::default());
        assert_eq!(
            session.try_command(Command::StartGame { voice_enabled: true }),
            Err(ValidationError::NotConnected)
        );

        session.handle_transport(TransportEvent::Connected);
        let effects = session
            .try_command(Command::StartGame { voice_enabled: false })
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Emit(OutboundEvent::StartGame { voice_enabled: false })]
        );
        assert!(session.state().start_pending);

        // No double start while pending.
        assert_eq!(
            session.try_command(Command::StartGame { voice_enabled: false }),
            Err(ValidationError::GameInProgress)
        );
    }

    #[test]
    fn test_error_message_rearms_start() {
        let mut session = connected();
        session.handle_command(Command::StartGame { voice_enabled: true });
        session.handle_transport(ev(InboundEvent::ErrorMessage("busy".to_string())));

        assert!(!session.state().start_pending);
        assert!(session.state().can_start());
        assert_eq!(session.state().alert.as_deref(), Some("busy"));
        assert_eq!(last_log(&session).level, LogLevel::Error);
        assert_eq!(last_log(&session).message, "busy");
    }

    #[test]
    fn test_game_started_enters_game() {
        let mut session = connected();
        session.handle_command(Command::StartGame { voice_enabled: true });
        session.handle_transport(ev(InboundEvent::GameStarted));

        let state = session.state();
        assert_eq!(state.screen, Screen::InGame);
        assert!(!state.start_pending);
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.surface, InputSurface::None);
    }

    #[test]
    fn test_game_state_sets_role_summary() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::GameState(roster())));
        assert_eq!(
            session.state().role_summary.as_deref(),
            Some("You are P3 (#3), role: villager")
        );
    }

    #[test]
    fn test_discussion_uses_snapshot_length() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::GameState(roster())));
        let effects = session.handle_transport(ev(InboundEvent::StartDiscussion));

        let [Effect::StartDiscussionTimer { generation }] = effects.as_slice() else {
            panic!("unexpected effects {:?}", effects);
        };
        let generation = *generation;
        assert_eq!(session.state().discussion_remaining, Some(30));
        session.discussion_tick(generation);
        assert_eq!(session.state().discussion_remaining, Some(29));
    }

    #[test]
    fn test_discussion_falls_back_without_snapshot() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::StartDiscussion));
        assert_eq!(session.state().discussion_remaining, Some(60));
    }

    #[test]
    fn test_speech_closes_surface_but_discussion_does_not() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::RequestSpeech));
        assert_eq!(
            session.try_command(Command::SubmitSpeech { text: "   ".to_string() }),
            Err(ValidationError::EmptyText)
        );
        assert_eq!(session.state().surface, InputSurface::Speech);

        let effects = session.handle_command(Command::Submit {
            input: " I am the seer ".to_string(),
        });
        assert_eq!(
            effects,
            vec![Effect::Emit(OutboundEvent::SendSpeech {
                text: "I am the seer".to_string()
            })]
        );
        assert_eq!(session.state().surface, InputSurface::None);

        session.handle_transport(ev(InboundEvent::StartDiscussion));
        session.handle_command(Command::SubmitDiscussionSpeech {
            text: "agreed".to_string(),
        });
        assert_eq!(session.state().surface, InputSurface::Discussion);
        assert_eq!(
            session.handle_command(Command::SkipDiscussion),
            vec![Effect::Emit(OutboundEvent::SkipDiscussion)]
        );
    }

    #[test]
    fn test_skip_requires_discussion() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::StartVoting));
        assert_eq!(
            session.try_command(Command::SkipDiscussion),
            Err(ValidationError::SurfaceInactive {
                expected: InputSurface::Discussion
            })
        );
    }

    #[test]
    fn test_action_on_wrong_surface_is_rejected() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::GameState(roster())));
        session.handle_transport(ev(InboundEvent::StartNightWerewolf));

        assert!(session.handle_command(Command::SubmitVote { target: 4 }).is_empty());
        assert_eq!(
            session.handle_command(Command::SubmitNightAction { target: 4 }),
            vec![Effect::Emit(OutboundEvent::SendNightAction {
                target: SpeakerId(4)
            })]
        );
    }

    #[test]
    fn test_submit_without_surface() {
        let mut session = connected();
        assert_eq!(
            session.try_command(Command::Submit {
                input: "4".to_string()
            }),
            Err(ValidationError::NoActiveSurface)
        );
    }

    #[test]
    fn test_new_speech_resolves_nickname() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::GameState(roster())));
        session.handle_transport(ev(InboundEvent::NewSpeech {
            speaker: SpeakerId(2),
            text: "hi".to_string(),
            nickname: None,
        }));
        session.handle_transport(ev(InboundEvent::NewSpeech {
            speaker: SpeakerId(12),
            text: "who?".to_string(),
            nickname: None,
        }));

        let speeches = &session.state().speeches;
        assert_eq!(speeches[0].nickname, "P2");
        assert_eq!(speeches[1].nickname, "Player 12");
    }

    #[test]
    fn test_chunks_dropped_without_sink() {
        let mut session = connected();
        let effects = session.handle_transport(ev(InboundEvent::PlayAudioChunk(AudioChunk {
            speaker: SpeakerId(1),
            payload: String::new(),
        })));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_disconnect_keeps_phase() {
        let mut session = connected();
        session.handle_transport(ev(InboundEvent::StartVoting));
        session.handle_transport(TransportEvent::Disconnected);

        assert_eq!(session.state().connection, ConnectionStatus::Disconnected);
        assert_eq!(session.state().surface, InputSurface::Vote);
        assert!(!session.state().can_start());
    }

    #[test]
    fn test_log_is_bounded() {
        let mut session = SessionController::new(SessionConfig {
            log_capacity: 3,
            ..Default::default()
        });
        for i in 0..10 {
            session.handle_transport(ev(InboundEvent::LogMessage(format!("line {}", i))));
        }
        let log: Vec<_> = session.state().log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(log, vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_volume_command_updates_state() {
        let mut session = connected();
        session.handle_command(Command::SetSpeakerVolume {
            speaker: SpeakerId(2),
            volume: 2.0,
        });
        assert_eq!(session.state().volumes.get(&SpeakerId(2)), Some(&1.5));
    }
}
