//! Line commands typed into the emulator's terminal.

use crate::error::{EmulatorError, Result};
use attractap_core::{CardUid, ServerConfig};
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  tap <uid-hex>          tap a factory-fresh NTAG 424 card
  present <uid-hex>      place a card on the reader until `remove`
  remove                 take the card off the reader
  cancel                 press the cancel button
  select <id>            answer the open selection dialog
  server <host> <port>   switch to another server
  wifi join <ssid> [pw]  save Wi-Fi credentials and bring the link up
  wifi down              drop the Wi-Fi link
  wifi forget            delete the saved credentials
  status                 print the session status
  help                   show this text
  quit                   stop the terminal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Tap(CardUid),
    Present(CardUid),
    Remove,
    Cancel,
    Select(String),
    Server(ServerConfig),
    WifiJoin { ssid: String, password: String },
    WifiDown,
    WifiForget,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = EmulatorError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err(EmulatorError::UnknownCommand(String::new()));
        };
        let args: Vec<&str> = words.collect();

        let command = command.to_ascii_lowercase();
        let parsed = match (command.as_str(), args.as_slice()) {
            ("tap", [uid]) => ConsoleCommand::Tap(parse_uid("tap", uid)?),
            ("present", [uid]) => ConsoleCommand::Present(parse_uid("present", uid)?),
            ("remove", []) => ConsoleCommand::Remove,
            ("cancel", []) => ConsoleCommand::Cancel,
            ("select", [id]) => ConsoleCommand::Select((*id).to_string()),
            ("server", [host, port]) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| EmulatorError::invalid_argument("server", e.to_string()))?;
                ConsoleCommand::Server(ServerConfig::new(*host, port))
            }
            ("wifi", ["join", ssid]) => ConsoleCommand::WifiJoin {
                ssid: (*ssid).to_string(),
                password: String::new(),
            },
            ("wifi", ["join", ssid, password]) => ConsoleCommand::WifiJoin {
                ssid: (*ssid).to_string(),
                password: (*password).to_string(),
            },
            ("wifi", ["down"]) => ConsoleCommand::WifiDown,
            ("wifi", ["forget"]) => ConsoleCommand::WifiForget,
            ("wifi", _) => {
                return Err(EmulatorError::invalid_argument(
                    "wifi",
                    "expected join <ssid> [password], down or forget",
                ));
            }
            ("status", []) => ConsoleCommand::Status,
            ("help" | "?", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            ("tap" | "present" | "select", _) => {
                return Err(EmulatorError::invalid_argument(command.as_str(), "expected one argument"));
            }
            ("server", _) => {
                return Err(EmulatorError::invalid_argument(
                    "server",
                    "expected <host> <port>",
                ));
            }
            _ => return Err(EmulatorError::UnknownCommand(line.trim().to_string())),
        };
        Ok(parsed)
    }
}

fn parse_uid(command: &str, text: &str) -> Result<CardUid> {
    let cleaned: String = text.chars().filter(|c| *c != ':').collect();
    let bytes =
        hex::decode(cleaned).map_err(|e| EmulatorError::invalid_argument(command, e.to_string()))?;
    CardUid::new(bytes).map_err(|e| EmulatorError::invalid_argument(command, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cancel", ConsoleCommand::Cancel)]
    #[case("  REMOVE ", ConsoleCommand::Remove)]
    #[case("select pine", ConsoleCommand::Select("pine".into()))]
    #[case("status", ConsoleCommand::Status)]
    #[case("?", ConsoleCommand::Help)]
    #[case("wifi down", ConsoleCommand::WifiDown)]
    #[case("wifi forget", ConsoleCommand::WifiForget)]
    #[case(
        "wifi join makerspace hunter2",
        ConsoleCommand::WifiJoin { ssid: "makerspace".into(), password: "hunter2".into() }
    )]
    #[case(
        "wifi join guest",
        ConsoleCommand::WifiJoin { ssid: "guest".into(), password: String::new() }
    )]
    #[case("exit", ConsoleCommand::Quit)]
    #[case(
        "server attraccess.local 3000",
        ConsoleCommand::Server(ServerConfig::new("attraccess.local", 3000))
    )]
    fn test_parse(#[case] line: &str, #[case] expected: ConsoleCommand) {
        assert_eq!(line.parse::<ConsoleCommand>().unwrap(), expected);
    }

    #[rstest]
    #[case("tap 04A1B2C3D4E5F6")]
    #[case("tap 04:a1:b2:c3:d4:e5:f6")]
    fn test_parse_uid(#[case] line: &str) {
        let expected = CardUid::from([0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
        assert_eq!(line.parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Tap(expected));
    }

    #[rstest]
    #[case("tap")]
    #[case("tap zz")]
    #[case("present 0102")]
    #[case("server host")]
    #[case("server host 99999")]
    #[case("wifi")]
    #[case("wifi up")]
    fn test_invalid_arguments(#[case] line: &str) {
        assert!(matches!(
            line.parse::<ConsoleCommand>(),
            Err(EmulatorError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        match "open sesame".parse::<ConsoleCommand>() {
            Err(EmulatorError::UnknownCommand(line)) => assert_eq!(line, "open sesame"),
            other => panic!("expected UnknownCommand, got {other:?}"),
        }
    }
}
