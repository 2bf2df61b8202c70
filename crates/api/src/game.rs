//! Roster snapshot sent by the server.
//!
//! The snapshot is replaced wholesale on every `game_state` event; nothing
//! here diffs or merges snapshots.

use serde::{Deserialize, Serialize};

use crate::SpeakerId;

/// One seat at the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: SpeakerId,
    #[serde(default)]
    pub nickname: String,
    pub is_alive: bool,
    #[serde(default)]
    pub is_human: bool,
    #[serde(default)]
    pub color: Option<String>,
}

/// Latest roster and session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub players: Vec<PlayerInfo>,
    #[serde(default)]
    pub day: u32,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub human_role: Option<String>,
    #[serde(default)]
    pub human_id: Option<SpeakerId>,
    /// Length of the free discussion in seconds.
    #[serde(default, rename = "discussion_time")]
    pub discussion_time: Option<u32>,
}

impl GameState {
    /// Number of seats; valid targets are `1..=roster_size()`.
    pub fn roster_size(&self) -> u32 {
        self.players.len() as u32
    }

    pub fn player(&self, id: SpeakerId) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.id == id)
    }

    /// The seat controlled by the local user.
    pub fn human(&self) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.is_human)
    }

    /// Display name for a speaker, falling back to `Player N`.
    pub fn nickname_for(&self, id: SpeakerId) -> String {
        self.player(id)
            .filter(|p| !p.nickname.is_empty())
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| format!("Player {}", id))
    }

    /// One-line description of the local user's seat and role.
    pub fn role_summary(&self) -> Option<String> {
        let human_id = self.human_id?;
        let human = self.human()?;
        let role = self.human_role.as_deref().unwrap_or("unknown");
        Some(format!("You are {} (#{}), role: {}", human.nickname, human_id, role))
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.iter().filter(|p| p.is_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> GameState {
        serde_json::from_value(json!({
            "players": [
                {
                    "id": 1, "nickname": "Ann", "isAlive": true, "isHuman": false,
                    "color": "#ffb3ba"
                },
                { "id": 2, "nickname": "Bo", "isAlive": false, "isHuman": false },
                { "id": 3, "nickname": "Cy", "isAlive": true, "isHuman": true }
            ],
            "day": 2,
            "phase": "day",
            "humanRole": "seer",
            "humanId": 3,
            "discussion_time": 45
        }))
        .unwrap()
    }

    #[test]
    fn test_snapshot_fields() {
        let state = sample();
        assert_eq!(state.roster_size(), 3);
        assert_eq!(state.discussion_time, Some(45));
        assert_eq!(state.human().map(|p| p.id), Some(SpeakerId(3)));
        assert_eq!(state.alive_players().count(), 2);
    }

    #[test]
    fn test_nickname_fallback() {
        let state = sample();
        assert_eq!(state.nickname_for(SpeakerId(1)), "Ann");
        assert_eq!(state.nickname_for(SpeakerId(9)), "Player 9");
    }

    #[test]
    fn test_role_summary() {
        let state = sample();
        assert_eq!(
            state.role_summary().as_deref(),
            Some("You are Cy (#3), role: seer")
        );
        assert_eq!(GameState::default().role_summary(), None);
    }
}
