//! Session error taxonomy.
//!
//! None of these are fatal: each is reported at the boundary where it is
//! detected and the session carries on.

use api::SpeakerId;

use crate::{
    decoder::DecodeError,
    phase::{ActionKind, InputSurface},
};

/// A user action rejected before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the {expected} input is not open")]
    SurfaceInactive { expected: InputSurface },
    #[error("nothing is waiting for input right now")]
    NoActiveSurface,
    #[error("please enter something to say")]
    EmptyText,
    #[error("please enter a valid player number (1-{max})")]
    OutOfRange { max: u32 },
    #[error("no game state received yet")]
    NoGameState,
    #[error("you cannot {kind} yourself")]
    SelfTarget { kind: ActionKind },
    #[error("player {target} does not exist or has been eliminated")]
    TargetUnavailable { target: SpeakerId },
    #[error("not connected to the game server")]
    NotConnected,
    #[error("a game is already starting or in progress")]
    GameInProgress,
}

/// Everything that can go wrong during a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Error text sent by the server, shown verbatim.
    #[error("{message}")]
    Protocol { message: String },
    #[error("disconnected from the game server")]
    ConnectivityLoss,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            ValidationError::OutOfRange { max: 7 }.to_string(),
            "please enter a valid player number (1-7)"
        );
        assert_eq!(
            ValidationError::SelfTarget { kind: ActionKind::Vote }.to_string(),
            "you cannot vote for yourself"
        );
        assert_eq!(
            ValidationError::SurfaceInactive {
                expected: InputSurface::Vote
            }
            .to_string(),
            "the vote input is not open"
        );
    }

    #[test]
    fn test_protocol_error_is_verbatim() {
        let err = SessionError::Protocol {
            message: "Game already running".to_string(),
        };
        assert_eq!(err.to_string(), "Game already running");
    }
}
