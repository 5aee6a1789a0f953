use std::str::FromStr;

pub const HELP: &str = "\
Commands:
  scan                  search for feeders
  cancel                stop searching without selecting a feeder
  peers                 list the feeders found by the last scan
  select <n|address>    select a feeder and connect to it
  connect               connect to the selected feeder again
  disconnect            close the connection
  ack                   acknowledge a failed connection attempt
  status                ask the feeder for its food level
  feed                  dispense food
  state                 show the connection state
  help                  show this text
  quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChoice {
    // 1-based position in the last scan result
    Index(usize),
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Scan,
    Cancel,
    Peers,
    Select(PeerChoice),
    Connect,
    Disconnect,
    Acknowledge,
    Status,
    Feed,
    State,
    Help,
    Quit,
}

impl FromStr for ShellCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();

        let command = match verb.as_str() {
            "scan" => ShellCommand::Scan,
            "cancel" => ShellCommand::Cancel,
            "peers" => ShellCommand::Peers,
            "select" => {
                let Some(choice) = words.next() else {
                    return Err("Usage: select <n|address>".to_string());
                };
                match choice.parse::<usize>() {
                    Ok(0) => return Err("Devices are numbered from 1".to_string()),
                    Ok(index) => ShellCommand::Select(PeerChoice::Index(index)),
                    Err(_) => ShellCommand::Select(PeerChoice::Address(choice.to_string())),
                }
            },
            "connect" => ShellCommand::Connect,
            "disconnect" => ShellCommand::Disconnect,
            "ack" => ShellCommand::Acknowledge,
            "status" => ShellCommand::Status,
            "feed" => ShellCommand::Feed,
            "state" => ShellCommand::State,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" => ShellCommand::Quit,
            _ => return Err(format!("Unknown command '{}', type 'help' for a list", verb)),
        };

        if words.next().is_some() {
            return Err(format!("Too many arguments for '{}'", verb));
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("scan".parse(), Ok(ShellCommand::Scan));
        assert_eq!("  FEED ".parse(), Ok(ShellCommand::Feed));
        assert_eq!("select 2".parse(), Ok(ShellCommand::Select(PeerChoice::Index(2))));
        assert_eq!(
            "select AA:BB:CC:DD:EE:FF".parse(),
            Ok(ShellCommand::Select(PeerChoice::Address("AA:BB:CC:DD:EE:FF".to_string())))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("select".parse::<ShellCommand>().is_err());
        assert!("select 0".parse::<ShellCommand>().is_err());
        assert!("feed now".parse::<ShellCommand>().is_err());
        assert_eq!(
            "launch".parse::<ShellCommand>(),
            Err("Unknown command 'launch', type 'help' for a list".to_string())
        );
    }
}
