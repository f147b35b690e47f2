//! Typed actions for the interactive front end.

use crate::session::ActionGates;

/// One line of input in interactive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Select(usize),
    Capture,
    Preview,
    Stop,
    Reset,
    Status,
    Help,
    Quit,
}

impl ReplCommand {
    /// Parse a line of input. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" | "devices" => ReplCommand::List,
            "select" | "use" => {
                let index = words
                    .next()
                    .ok_or_else(|| "Usage: select <index>".to_string())?;
                let index = index
                    .parse()
                    .map_err(|_| format!("'{}' is not a device index", index))?;
                ReplCommand::Select(index)
            }
            "capture" | "start" => ReplCommand::Capture,
            "preview" | "play" => ReplCommand::Preview,
            "stop" | "pause" => ReplCommand::Stop,
            "reset" => ReplCommand::Reset,
            "status" => ReplCommand::Status,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => return Err(format!("Unknown command '{}'. Type 'help' for commands.", other)),
        };

        if words.next().is_some() {
            return Err(format!("Too many arguments for '{}'", verb));
        }
        Ok(Some(command))
    }

    /// Whether the gates allow this command right now. Commands that are
    /// not session actions are always allowed.
    pub fn is_enabled(&self, gates: &ActionGates) -> bool {
        match self {
            ReplCommand::Capture => gates.start_capture,
            ReplCommand::Preview => gates.start_preview,
            ReplCommand::Stop => gates.stop_preview,
            ReplCommand::Reset => gates.reset,
            _ => true,
        }
    }
}

pub const HELP: &str = "Commands:
  list            show devices (* marks the selection)
  select <n>      select device n
  capture         initialize capture of the selected device
  preview         start the live preview
  stop            pause the preview
  reset           release everything and re-scan devices
  status          show session state
  quit            exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("list"), Ok(Some(ReplCommand::List)));
        assert_eq!(ReplCommand::parse("  select 2 "), Ok(Some(ReplCommand::Select(2))));
        assert_eq!(ReplCommand::parse("CAPTURE"), Ok(Some(ReplCommand::Capture)));
        assert_eq!(ReplCommand::parse("preview"), Ok(Some(ReplCommand::Preview)));
        assert_eq!(ReplCommand::parse("stop"), Ok(Some(ReplCommand::Stop)));
        assert_eq!(ReplCommand::parse("reset"), Ok(Some(ReplCommand::Reset)));
        assert_eq!(ReplCommand::parse("q"), Ok(Some(ReplCommand::Quit)));
        assert_eq!(ReplCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ReplCommand::parse("select").is_err());
        assert!(ReplCommand::parse("select -1").is_err());
        assert!(ReplCommand::parse("reset now").is_err());
        assert!(ReplCommand::parse("dance")
            .unwrap_err()
            .contains("Unknown command 'dance'"));
    }

    #[test]
    fn test_gating() {
        let gates = ActionGates {
            start_capture: true,
            start_preview: false,
            stop_preview: false,
            reset: true,
        };
        assert!(ReplCommand::Capture.is_enabled(&gates));
        assert!(!ReplCommand::Preview.is_enabled(&gates));
        assert!(!ReplCommand::Stop.is_enabled(&gates));
        assert!(ReplCommand::Reset.is_enabled(&gates));
        assert!(ReplCommand::Select(0).is_enabled(&gates));
        assert!(ReplCommand::Quit.is_enabled(&ActionGates::default()));
    }
}
