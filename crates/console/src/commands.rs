//! Parsing of lines typed at the console.
//!
//! Lines starting with `/` are commands. Anything else goes to the session as
//! raw input, which routes it to whatever input is open (speech text, or a
//! player number while voting or acting at night).

use backend::{Command, InputSurface, SpeakerId};

pub const HELP: &str = "\
commands:
  /start [voice|novoice]   start a new game
  /say <text>              speak (speech turn or discussion)
  /skip                    skip the rest of the discussion
  /vote <n>                vote for player n
  /night <n>               choose player n for the night action
  /seer <n>                check player n
  /volume <n> <0-1.5>      set playback volume for player n
  /devices                 list audio output devices
  /output [name]           switch output device (no name = default)
  /status                  show the current status line
  /help                    show this help
  /quit                    exit
anything else is sent to the open input";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command /{0}, try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("nothing to say right now (open input: {0})")]
    NotSpeaking(InputSurface),
}

/// What a typed line asks for.
#[derive(Debug)]
pub enum ConsoleAction {
    Send(Command),
    /// Speech text; where it goes depends on the open input.
    Say(String),
    ShowStatus,
    ShowDevices,
    Help,
    Quit,
    Nothing,
}

/// Parse one line of input.
pub fn parse_line(line: &str, voice_default: bool) -> Result<ConsoleAction, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleAction::Nothing);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ConsoleAction::Send(Command::Submit {
            input: line.to_string(),
        }));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let action = match name.to_ascii_lowercase().as_str() {
        "start" => {
            let voice_enabled = match args {
                "" => voice_default,
                "voice" => true,
                "novoice" => false,
                _ => return Err(ParseError::Usage("/start [voice|novoice]")),
            };
            Command::StartGame { voice_enabled }
        }
        "say" if args.is_empty() => return Err(ParseError::Usage("/say <text>")),
        "say" => return Ok(ConsoleAction::Say(args.to_string())),
        "skip" => Command::SkipDiscussion,
        "vote" => Command::SubmitVote {
            target: target_arg(args, "/vote <player number>")?,
        },
        "night" => Command::SubmitNightAction {
            target: target_arg(args, "/night <player number>")?,
        },
        "seer" => Command::SubmitSeerAction {
            target: target_arg(args, "/seer <player number>")?,
        },
        "volume" => {
            const USAGE: &str = "/volume <player number> <0-1.5>";
            let mut parts = args.split_whitespace();
            let speaker = parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or(ParseError::Usage(USAGE))?;
            let volume = parts
                .next()
                .and_then(|s| s.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .ok_or(ParseError::Usage(USAGE))?;
            if parts.next().is_some() {
                return Err(ParseError::Usage(USAGE));
            }
            Command::SetSpeakerVolume {
                speaker: SpeakerId(speaker),
                volume,
            }
        }
        "output" => Command::SetOutputDevice {
            device_id: match args {
                "" | "default" => None,
                name => Some(name.to_string()),
            },
        },
        "devices" => return Ok(ConsoleAction::ShowDevices),
        "status" => return Ok(ConsoleAction::ShowStatus),
        "help" | "?" => return Ok(ConsoleAction::Help),
        "quit" | "exit" => return Ok(ConsoleAction::Quit),
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(ConsoleAction::Send(action))
}

/// Turn `/say` text into the speech command for the open input.
///
/// Only speech turns and discussions take text. Anything else is refused here
/// rather than handed to the session as raw input, where it would be read as
/// a player number.
pub fn say_command(text: String, surface: InputSurface) -> Result<Command, ParseError> {
    match surface {
        InputSurface::Speech => Ok(Command::SubmitSpeech { text }),
        InputSurface::Discussion => Ok(Command::SubmitDiscussionSpeech { text }),
        other => Err(ParseError::NotSpeaking(other)),
    }
}

/// Player numbers are checked by the session; only the syntax is checked here.
fn target_arg(args: &str, usage: &'static str) -> Result<i64, ParseError> {
    args.parse::<i64>().map_err(|_| ParseError::Usage(usage))
}
