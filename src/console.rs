//! Line console on the controller's primary serial port

use heapless::String;
use log::{info, warn};

use crate::protocol::Command;

const LINE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Status,
    /// Queue a relay command right away
    Run(Command),
    NextView,
    ToggleDisplay,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let cmd = line.split_whitespace().next()?;
        let parsed = match cmd {
            "help" | "?" => ConsoleCommand::Help,
            "status" => ConsoleCommand::Status,
            "time" | "ntp" => ConsoleCommand::Run(Command::SyncTime),
            "weather" => ConsoleCommand::Run(Command::FetchWeather),
            "uv" => ConsoleCommand::Run(Command::FetchUv),
            "post" => ConsoleCommand::Run(Command::PostSensors),
            "wifi" => ConsoleCommand::Run(Command::CheckWifi),
            "url" => ConsoleCommand::Run(Command::RelayUrl),
            "next" => ConsoleCommand::NextView,
            "display" => ConsoleCommand::ToggleDisplay,
            _ => {
                warn!("[CONSOLE] unknown command '{}' (type 'help')", cmd);
                return None;
            }
        };
        Some(parsed)
    }
}

pub fn print_help() {
    info!("[CONSOLE] commands:");
    info!("  status    - show status registers");
    info!("  time      - sync the clock from the relay");
    info!("  weather   - fetch the latest observation");
    info!("  uv        - fetch the UV index");
    info!("  post      - post sensor readings");
    info!("  wifi      - check relay WiFi");
    info!("  url       - dump the relay page to this console");
    info!("  next      - next screen");
    info!("  display   - toggle display power");
}

/// Assembles console bytes into lines
#[derive(Debug, Default)]
pub struct Console {
    line: String<LINE_LEN>,
    in_escape: bool,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; a finished line is parsed into a command
    pub fn feed(&mut self, byte: u8) -> Option<ConsoleCommand> {
        if self.in_escape {
            if byte.is_ascii_alphabetic() || byte == b'~' {
                self.in_escape = false;
            }
            return None;
        }

        match byte {
            0x1b => {
                self.in_escape = true;
                None
            }
            b'\n' | b'\r' => {
                if self.line.is_empty() {
                    return None;
                }
                info!("> {}", self.line);
                let command = ConsoleCommand::parse(&self.line);
                self.line.clear();
                command
            }
            0x7f | 0x08 => {
                self.line.pop();
                None
            }
            0x20..=0x7e => {
                if self.line.push(char::from(byte)).is_err() {
                    warn!("[CONSOLE] line too long, dropped");
                    self.line.clear();
                }
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(console: &mut Console, bytes: &[u8]) -> Option<ConsoleCommand> {
        let mut last = None;
        for &b in bytes {
            if let Some(cmd) = console.feed(b) {
                last = Some(cmd);
            }
        }
        last
    }

    #[test]
    fn commands_parse() {
        assert_eq!(ConsoleCommand::parse("uv"), Some(ConsoleCommand::Run(Command::FetchUv)));
        assert_eq!(ConsoleCommand::parse("  status "), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("reboot"), None);
    }

    #[test]
    fn lines_end_on_cr_or_lf() {
        let mut console = Console::new();
        assert_eq!(
            feed_all(&mut console, b"post\r\n"),
            Some(ConsoleCommand::Run(Command::PostSensors))
        );
        assert_eq!(feed_all(&mut console, b"next\n"), Some(ConsoleCommand::NextView));
    }

    #[test]
    fn backspace_and_escape_sequences() {
        let mut console = Console::new();
        // "wifx", backspace, "i", cursor-up escape
        assert_eq!(
            feed_all(&mut console, b"wifx\x7fi\x1b[A\n"),
            Some(ConsoleCommand::Run(Command::CheckWifi))
        );
    }

    #[test]
    fn overlong_line_is_dropped() {
        let mut console = Console::new();
        let long = [b'a'; LINE_LEN + 1];
        assert_eq!(feed_all(&mut console, &long), None);
        assert_eq!(feed_all(&mut console, b"help\n"), Some(ConsoleCommand::Help));
    }
}
