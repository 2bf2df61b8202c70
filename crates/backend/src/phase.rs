//! Phase-driven input gating.
//!
//! The server declares the game's stage through a fixed set of control
//! events. [`transition`] maps the current `(phase, surface)` pair and one
//! event to the next pair; [`GamePhaseStateMachine`] applies it, owns the
//! discussion countdown, and answers whether a user action matches the open
//! input surface. Nothing else mutates the surface except closing it after an
//! accepted submission.

use api::InboundEvent;
use std::fmt;
use tracing::{debug, info};

use crate::error::ValidationError;

/// Stage of the game as declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    Speech,
    Discussion,
    Voting,
    NightWerewolf,
    NightVillager,
    SeerAction,
    Ended,
}

/// The single input affordance that may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputSurface {
    #[default]
    None,
    Speech,
    Discussion,
    Vote,
    Night,
    Seer,
}

impl fmt::Display for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputSurface::None => "none",
            InputSurface::Speech => "speech",
            InputSurface::Discussion => "discussion",
            InputSurface::Vote => "vote",
            InputSurface::Night => "night action",
            InputSurface::Seer => "seer check",
        };
        f.write_str(name)
    }
}

/// Targeted actions the user can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Vote,
    Night,
    Seer,
}

impl ActionKind {
    /// The surface that must be open to submit this action.
    pub fn surface(self) -> InputSurface {
        match self {
            ActionKind::Vote => InputSurface::Vote,
            ActionKind::Night => InputSurface::Night,
            ActionKind::Seer => InputSurface::Seer,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            ActionKind::Vote => "vote for",
            ActionKind::Night => "target",
            ActionKind::Seer => "check",
        };
        f.write_str(verb)
    }
}

/// Server events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    GameStarted,
    RequestSpeech,
    StartDiscussion,
    DiscussionEnded,
    StartVoting,
    VotingEnded,
    StartNightWerewolf,
    StartNightVillager,
    RequestSeerAction,
    GameEnd,
}

impl PhaseEvent {
    /// The phase event carried by an inbound event, if any.
    pub fn from_inbound(event: &InboundEvent) -> Option<Self> {
        let ev = match event {
            InboundEvent::GameStarted => PhaseEvent::GameStarted,
            InboundEvent::RequestSpeech => PhaseEvent::RequestSpeech,
            InboundEvent::StartDiscussion => PhaseEvent::StartDiscussion,
            InboundEvent::DiscussionEnded => PhaseEvent::DiscussionEnded,
            InboundEvent::StartVoting => PhaseEvent::StartVoting,
            InboundEvent::VotingEnded => PhaseEvent::VotingEnded,
            InboundEvent::StartNightWerewolf => PhaseEvent::StartNightWerewolf,
            InboundEvent::StartNightVillager => PhaseEvent::StartNightVillager,
            InboundEvent::RequestSeerAction { .. } => PhaseEvent::RequestSeerAction,
            InboundEvent::GameEnd { .. } => PhaseEvent::GameEnd,
            _ => return None,
        };
        Some(ev)
    }
}

/// Phase and surface together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseState {
    pub phase: Phase,
    pub surface: InputSurface,
}

impl PhaseState {
    pub const IDLE: PhaseState = PhaseState {
        phase: Phase::Idle,
        surface: InputSurface::None,
    };

    fn new(phase: Phase, surface: InputSurface) -> Self {
        Self { phase, surface }
    }
}

/// Next phase and surface after `event`.
///
/// The surface is a function of the event alone, so entering any phase
/// replaces whatever surface was open. `Ended` only leaves on `GameStarted`.
pub fn transition(current: PhaseState, event: PhaseEvent) -> PhaseState {
    use InputSurface as S;

    if current.phase == Phase::Ended && event != PhaseEvent::GameStarted {
        return current;
    }
    match event {
        PhaseEvent::GameStarted => PhaseState::IDLE,
        PhaseEvent::RequestSpeech => PhaseState::new(Phase::Speech, S::Speech),
        PhaseEvent::StartDiscussion => PhaseState::new(Phase::Discussion, S::Discussion),
        // The phase holds until the server announces the next one.
        PhaseEvent::DiscussionEnded | PhaseEvent::VotingEnded => {
            PhaseState::new(current.phase, S::None)
        }
        PhaseEvent::StartVoting => PhaseState::new(Phase::Voting, S::Vote),
        PhaseEvent::StartNightWerewolf => PhaseState::new(Phase::NightWerewolf, S::Night),
        PhaseEvent::StartNightVillager => PhaseState::new(Phase::NightVillager, S::None),
        PhaseEvent::RequestSeerAction => PhaseState::new(Phase::SeerAction, S::Seer),
        PhaseEvent::GameEnd => PhaseState::new(Phase::Ended, S::None),
    }
}

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Seconds left after this tick.
    Remaining(u32),
    /// The countdown ran past zero and is now cleared.
    Expired,
    /// The tick belongs to a countdown that was cancelled or replaced.
    Stale,
}

/// One-second discussion countdown.
///
/// Every start or cancel bumps the generation, so ticks scheduled for an
/// earlier countdown are recognised as stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscussionTimer {
    remaining: Option<u32>,
    generation: u64,
}

impl DiscussionTimer {
    /// Start (or restart) the countdown and return its generation.
    pub fn start(&mut self, seconds: u32) -> u64 {
        self.generation += 1;
        self.remaining = Some(seconds);
        self.generation
    }

    /// Stop the countdown. Safe to call when already stopped.
    ///
    /// Returns whether a countdown was running.
    pub fn cancel(&mut self) -> bool {
        let was_running = self.remaining.take().is_some();
        if was_running {
            self.generation += 1;
        }
        was_running
    }

    pub fn tick(&mut self, generation: u64) -> TimerTick {
        if generation != self.generation {
            return TimerTick::Stale;
        }
        match self.remaining {
            None => TimerTick::Stale,
            Some(0) => {
                self.cancel();
                TimerTick::Expired
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                TimerTick::Remaining(n - 1)
            }
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What the countdown did as part of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerChange {
    Unchanged,
    Started { generation: u64, seconds: u32 },
    Stopped,
}

/// Result of feeding one event to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { state: PhaseState, timer: TimerChange },
    /// The game has ended; only a new game start is accepted.
    Ignored,
}

/// Authoritative phase, surface and discussion countdown.
#[derive(Debug, Clone, Default)]
pub struct GamePhaseStateMachine {
    state: PhaseState,
    timer: DiscussionTimer,
}

impl GamePhaseStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn surface(&self) -> InputSurface {
        self.state.surface
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn timer(&self) -> &DiscussionTimer {
        &self.timer
    }

    /// Apply a server event.
    ///
    /// `discussion_secs` is the countdown length used if the event starts a
    /// discussion.
    pub fn apply(&mut self, event: PhaseEvent, discussion_secs: u32) -> Transition {
        let previous = self.state;
        let next = transition(previous, event);
        if previous.phase == Phase::Ended && event != PhaseEvent::GameStarted {
            debug!(?event, "phase: ignoring event after game end");
            return Transition::Ignored;
        }

        let clears_timer = matches!(
            event,
            PhaseEvent::GameStarted | PhaseEvent::DiscussionEnded | PhaseEvent::GameEnd
        ) || (previous.phase == Phase::Discussion && next.phase != Phase::Discussion);

        let timer = if event == PhaseEvent::StartDiscussion {
            let generation = self.timer.start(discussion_secs);
            TimerChange::Started {
                generation,
                seconds: discussion_secs,
            }
        } else if clears_timer && self.timer.cancel() {
            TimerChange::Stopped
        } else {
            TimerChange::Unchanged
        };

        self.state = next;
        info!(
            ?event,
            phase = ?next.phase,
            surface = %next.surface,
            "phase: transition"
        );
        Transition::Applied { state: next, timer }
    }

    /// Advance the countdown if `generation` is still current.
    pub fn tick_timer(&mut self, generation: u64) -> TimerTick {
        self.timer.tick(generation)
    }

    /// Check that `expected` is the open surface.
    pub fn require_surface(&self, expected: InputSurface) -> Result<(), ValidationError> {
        if self.state.surface == expected && expected != InputSurface::None {
            Ok(())
        } else {
            Err(ValidationError::SurfaceInactive { expected })
        }
    }

    /// Close `surface` after its action was accepted.
    ///
    /// Returns false if it was not the open surface.
    pub fn close_surface(&mut self, surface: InputSurface) -> bool {
        if self.state.surface != surface || surface == InputSurface::None {
            return false;
        }
        self.state.surface = InputSurface::None;
        true
    }
}
