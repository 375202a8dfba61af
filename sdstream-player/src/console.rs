//! Operator console command parsing

use crate::audio::is_playable_name;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  play <name> [slot]   start streaming a file (a bare file name also works)
  stop [slot]          stop one player (default 0)
  stop all             stop every player
  list                 list playable files
  status [slot]        show player status (alias: info)
  volume <0-100>       set the global output gain
  help                 show this help
  quit                 stop everything and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { name: String, slot: Option<usize> },
    Stop { slot: Option<usize> },
    StopAll,
    List,
    Status { slot: Option<usize> },
    Volume(u8),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Volume {0} out of range 0-100")]
    VolumeOutOfRange(u32),
}

/// Parse one console line
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Err(CommandError::Empty);
    };
    let args: Vec<&str> = words.collect();

    match first.to_ascii_lowercase().as_str() {
        "play" => parse_play(&args),
        "stop" => match args.as_slice() {
            [] => Ok(Command::Stop { slot: None }),
            [all] if all.eq_ignore_ascii_case("all") => Ok(Command::StopAll),
            [slot] => Ok(Command::Stop { slot: Some(parse_number(slot)?) }),
            [_, extra, ..] => Err(CommandError::Unknown(extra.to_string())),
        },
        "list" | "ls" => Ok(Command::List),
        "status" | "info" => match args.first() {
            Some(slot) => Ok(Command::Status { slot: Some(parse_number(slot)?) }),
            None => Ok(Command::Status { slot: None }),
        },
        "volume" | "vol" => {
            let value = args.first().ok_or(CommandError::MissingArgument("volume level"))?;
            let level: u32 = parse_number(value)?;
            if level > 100 {
                return Err(CommandError::VolumeOutOfRange(level));
            }
            Ok(Command::Volume(level as u8))
        }
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        _ if is_playable_name(line) => Ok(Command::Play {
            name: line.to_string(),
            slot: None,
        }),
        _ => Err(CommandError::Unknown(first.to_string())),
    }
}

/// `play <name> [slot]`; a trailing number selects the slot when a name precedes it
fn parse_play(args: &[&str]) -> Result<Command, CommandError> {
    match args {
        [] => Err(CommandError::MissingArgument("file name")),
        [name] => Ok(Command::Play {
            name: name.to_string(),
            slot: None,
        }),
        [name_parts @ .., last] => match last.parse::<usize>() {
            Ok(slot) => Ok(Command::Play {
                name: name_parts.join(" "),
                slot: Some(slot),
            }),
            Err(_) => Ok(Command::Play {
                name: args.join(" "),
                slot: None,
            }),
        },
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::InvalidNumber(value.to_string()))
}
