//! Line commands accepted on stdin while a session runs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Mic(bool),
    Mute(bool),
    /// Toggle forms without an explicit `on`/`off`.
    ToggleMic,
    ToggleMute,
    Status,
    /// Reset the cipher game.
    Restart,
    Quit,
    Help,
}

pub const HELP: &str = "\
commands:
  mic [on|off]    enable or disable the microphone
  mute [on|off]   silence or restore the playmate's voice
  status          show session and game state
  restart         restart the cipher game
  quit            end the session";

fn switch(arg: Option<&str>) -> Result<Option<bool>, String> {
    match arg {
        None => Ok(None),
        Some("on" | "1" | "true") => Ok(Some(true)),
        Some("off" | "0" | "false") => Ok(Some(false)),
        Some(other) => Err(format!("expected on or off, got `{other}`")),
    }
}

impl ConsoleCommand {
    /// `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let lowered = line.trim().to_lowercase();
        let mut words = lowered.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(format!("unexpected `{extra}`"));
        }

        let cmd = match head {
            "mic" => switch(arg)?.map_or(Self::ToggleMic, Self::Mic),
            "mute" => switch(arg)?.map_or(Self::ToggleMute, Self::Mute),
            "unmute" if arg.is_none() => Self::Mute(false),
            "status" | "s" if arg.is_none() => Self::Status,
            "restart" if arg.is_none() => Self::Restart,
            "quit" | "exit" | "q" if arg.is_none() => Self::Quit,
            "help" | "?" | "h" => Self::Help,
            other => return Err(format!("unknown command `{other}`; try `help`")),
        };
        Ok(Some(cmd))
    }
}
