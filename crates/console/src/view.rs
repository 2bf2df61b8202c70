//! Text rendering of the session state.
//!
//! The session publishes whole `State` snapshots. [`ConsoleView`] remembers
//! what it already printed and turns each new snapshot into the lines that
//! changed: new log entries, new speeches, status changes and alerts.

use backend::{
    ConnectionStatus, InputSurface, LogEntry, LogLevel, Phase, Screen, SpeakerId, StartLabel, State,
};

/// Everything shown on the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusKey {
    connection: ConnectionStatus,
    screen: Screen,
    can_start: bool,
    phase: Phase,
    phase_label: Option<String>,
    surface: InputSurface,
    remaining: Option<u32>,
    speaking: Vec<SpeakerId>,
    audio_available: bool,
}

impl StatusKey {
    fn of(state: &State) -> Self {
        Self {
            connection: state.connection,
            screen: state.screen,
            can_start: state.can_start(),
            phase: state.phase,
            phase_label: state.phase_label.clone(),
            surface: state.surface,
            remaining: state.discussion_remaining,
            speaking: state.speaking.iter().copied().collect(),
            audio_available: state.audio_available,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsoleView {
    last_log: Option<LogEntry>,
    speeches_shown: usize,
    status: Option<StatusKey>,
    role_summary: Option<String>,
    seer_prompt: Option<String>,
    devices_shown: usize,
    devices_requested: bool,
}

impl ConsoleView {
    /// Lines to print for `state`, given what was printed before.
    ///
    /// Alerts are returned separately so the caller can acknowledge them.
    pub fn render(&mut self, state: &State) -> (Vec<String>, Option<String>) {
        let mut lines = Vec::new();

        self.render_log(state, &mut lines);

        if state.speeches.len() < self.speeches_shown {
            // Feed was cleared for a new game.
            self.speeches_shown = 0;
        }
        for speech in &state.speeches[self.speeches_shown..] {
            lines.push(format!("  {} ({}): {}", speech.nickname, speech.speaker, speech.text));
        }
        self.speeches_shown = state.speeches.len();

        if state.role_summary != self.role_summary {
            if let Some(summary) = &state.role_summary {
                lines.push(format!("* {}", summary));
            }
            self.role_summary = state.role_summary.clone();
        }

        let seer_prompt = state.seer_challenge.as_ref().map(|c| match &c.image_url {
            Some(url) => format!("{} ({})", c.message, url),
            None => c.message.clone(),
        });
        if seer_prompt != self.seer_prompt {
            if let Some(prompt) = &seer_prompt {
                lines.push(format!("? {}", prompt));
            }
            self.seer_prompt = seer_prompt;
        }

        let status = StatusKey::of(state);
        if self.status.as_ref() != Some(&status) {
            lines.push(status_line(state));
            if let Some(prompt) = input_prompt(state) {
                lines.push(prompt);
            }
            self.status = Some(status);
        }

        if self.devices_requested || state.output_devices.len() != self.devices_shown {
            lines.extend(device_lines(state));
            self.devices_shown = state.output_devices.len();
            self.devices_requested = false;
        }

        (lines, state.alert.clone())
    }

    /// Print the device list on the next render even if it did not change.
    pub fn request_devices(&mut self) {
        self.devices_requested = true;
    }

    fn render_log(&mut self, state: &State, lines: &mut Vec<String>) {
        // The log is bounded, so find where the last printed entry sits now.
        let start = match &self.last_log {
            Some(last) => state
                .log
                .iter()
                .rposition(|entry| entry == last)
                .map_or(0, |i| i + 1),
            None => 0,
        };
        for entry in state.log.iter().skip(start) {
            lines.push(log_line(entry));
        }
        if let Some(last) = state.log.back() {
            self.last_log = Some(last.clone());
        }
    }
}

fn log_line(entry: &LogEntry) -> String {
    let marker = match entry.level {
        LogLevel::Info => " ",
        LogLevel::Success => "+",
        LogLevel::Error => "!",
    };
    format!("{} [{}] {}", marker, entry.timestamp.format("%H:%M:%S"), entry.message)
}

/// One-line summary of connection, phase and playback.
pub fn status_line(state: &State) -> String {
    let mut parts = Vec::new();

    parts.push(match state.connection {
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Disconnected => "disconnected".to_string(),
    });

    match state.screen {
        Screen::PreGame => {
            let label = match state.start_label {
                StartLabel::Start => "start",
                StartLabel::PlayAgain => "play again",
            };
            if state.can_start() {
                parts.push(format!("lobby, /start to {}", label));
            } else if state.start_pending {
                parts.push("lobby, waiting for game".to_string());
            } else {
                parts.push("lobby".to_string());
            }
        }
        Screen::InGame => {
            let phase = state
                .phase_label
                .clone()
                .unwrap_or_else(|| format!("{:?}", state.phase));
            parts.push(format!("phase: {}", phase));
        }
    }

    if let Some(remaining) = state.discussion_remaining {
        parts.push(format!("{}s left", remaining));
    }

    if !state.speaking.is_empty() {
        let speakers: Vec<String> = state.speaking.iter().map(|s| s.to_string()).collect();
        parts.push(format!("speaking: {}", speakers.join(", ")));
    }

    if !state.audio_available {
        parts.push("no audio".to_string());
    }

    format!("-- {} --", parts.join(" | "))
}

/// What the user is expected to type, when an input is open.
fn input_prompt(state: &State) -> Option<String> {
    let prompt = match state.surface {
        InputSurface::None => return None,
        InputSurface::Speech => "> your turn to speak: type your speech".to_string(),
        InputSurface::Discussion => "> discussion: type to speak, /skip to pass".to_string(),
        InputSurface::Vote => with_choices("> vote: type a player number", alive(state)),
        InputSurface::Night => with_choices("> night: type a player number", alive(state)),
        InputSurface::Seer => with_choices(
            "> seer: type a player number to check",
            state.seer_candidates.clone(),
        ),
    };
    Some(prompt)
}

/// Living players from the last roster, empty before one arrives.
fn alive(state: &State) -> Vec<SpeakerId> {
    state
        .game
        .as_ref()
        .map(|game| game.alive_players().map(|p| p.id).collect())
        .unwrap_or_default()
}

fn with_choices(prompt: &str, choices: Vec<SpeakerId>) -> String {
    if choices.is_empty() {
        return prompt.to_string();
    }
    let choices: Vec<String> = choices.iter().map(|s| s.to_string()).collect();
    format!("{} ({})", prompt, choices.join(", "))
}

/// Output devices, one per line, marking the selected one.
pub fn device_lines(state: &State) -> Vec<String> {
    if state.output_devices.is_empty() {
        return vec!["no output devices found".to_string()];
    }
    state
        .output_devices
        .iter()
        .map(|device| {
            let selected = match &state.selected_output {
                Some(id) => *id == device.id,
                None => device.is_default,
            };
            format!(
                "{} {}{}",
                if selected { "*" } else { " " },
                device.name,
                if device.is_default { " (default)" } else { "" }
            )
        })
        .collect()
}
