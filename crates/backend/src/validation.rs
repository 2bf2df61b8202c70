//! Client-side checks on user input before anything is emitted.
//!
//! These mirror the server's rules so obvious mistakes are reported
//! immediately; the server still has the final word.

use api::{GameState, SpeakerId};

use crate::{error::ValidationError, phase::ActionKind};

/// Roster size assumed before the first snapshot arrives.
pub const FALLBACK_ROSTER_SIZE: u32 = 7;

/// Trim speech text, rejecting blank input.
pub fn speech_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(text.to_string())
}

/// Parse a typed player number.
///
/// Anything that is not a positive integer is reported as out of range.
pub fn parse_target(
    raw: &str,
    game: Option<&GameState>,
    fallback_roster: u32,
) -> Result<i64, ValidationError> {
    raw.trim().parse::<i64>().map_err(|_| ValidationError::OutOfRange {
        max: roster_bound(game, fallback_roster),
    })
}

fn roster_bound(game: Option<&GameState>, fallback_roster: u32) -> u32 {
    game.map_or(fallback_roster, GameState::roster_size)
}

/// Validate a target for a vote, night action or seer check.
///
/// Checks run in order: range `[1, roster size]`, snapshot present, not the
/// local player, and finally that the target exists and is alive.
pub fn validate_target(
    kind: ActionKind,
    target: i64,
    game: Option<&GameState>,
    fallback_roster: u32,
) -> Result<SpeakerId, ValidationError> {
    let max = roster_bound(game, fallback_roster);
    if target < 1 || target > max as i64 {
        return Err(ValidationError::OutOfRange { max });
    }
    let game = game.ok_or(ValidationError::NoGameState)?;
    let target = SpeakerId(target as u32);

    if game.human().is_some_and(|h| h.id == target) {
        return Err(ValidationError::SelfTarget { kind });
    }
    match game.player(target) {
        Some(player) if player.is_alive => Ok(target),
        _ => Err(ValidationError::TargetUnavailable { target }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::PlayerInfo;

    fn roster(size: u32, human: u32, dead: &[u32]) -> GameState {
        GameState {
            players: (1..=size)
                .map(|id| PlayerInfo {
                    id: SpeakerId(id),
                    nickname: format!("P{}", id),
                    is_alive: !dead.contains(&id),
                    is_human: id == human,
                    color: None,
                })
                .collect(),
            human_id: Some(SpeakerId(human)),
            ..Default::default()
        }
    }

    #[test]
    fn test_vote_rules() {
        let game = roster(7, 3, &[5]);
        let check = |t| validate_target(ActionKind::Vote, t, Some(&game), FALLBACK_ROSTER_SIZE);

        assert_eq!(check(3), Err(ValidationError::SelfTarget { kind: ActionKind::Vote }));
        assert_eq!(check(9), Err(ValidationError::OutOfRange { max: 7 }));
        assert_eq!(check(0), Err(ValidationError::OutOfRange { max: 7 }));
        assert_eq!(
            check(5),
            Err(ValidationError::TargetUnavailable { target: SpeakerId(5) })
        );
        assert_eq!(check(4), Ok(SpeakerId(4)));
    }

    #[test]
    fn test_range_uses_fallback_before_snapshot() {
        assert_eq!(
            validate_target(ActionKind::Night, 8, None, FALLBACK_ROSTER_SIZE),
            Err(ValidationError::OutOfRange { max: 7 })
        );
        assert_eq!(
            validate_target(ActionKind::Night, 2, None, FALLBACK_ROSTER_SIZE),
            Err(ValidationError::NoGameState)
        );
    }

    #[test]
    fn test_missing_player_is_unavailable() {
        // Ids are not guaranteed to be contiguous.
        let mut game = roster(4, 1, &[]);
        game.players.retain(|p| p.id != SpeakerId(3));
        game.players.push(PlayerInfo {
            id: SpeakerId(9),
            nickname: "late".to_string(),
            is_alive: true,
            is_human: false,
            color: None,
        });
        assert_eq!(
            validate_target(ActionKind::Seer, 3, Some(&game), FALLBACK_ROSTER_SIZE),
            Err(ValidationError::TargetUnavailable { target: SpeakerId(3) })
        );
    }

    #[test]
    fn test_parse_and_trim() {
        assert_eq!(parse_target(" 4 ", None, 7), Ok(4));
        assert_eq!(
            parse_target("four", None, 7),
            Err(ValidationError::OutOfRange { max: 7 })
        );
        assert_eq!(speech_text("  hello \n"), Ok("hello".to_string()));
        assert_eq!(speech_text("   "), Err(ValidationError::EmptyText));
    }
}
