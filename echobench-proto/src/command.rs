//! Controller-to-client commands: one line each, `\n`-terminated, ASCII.

use std::fmt;
use std::net::Ipv4Addr;

/// Errors produced parsing or formatting a [`Command`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The line had no recognizable command token.
    #[error("empty or unreadable command line")]
    Empty,
    /// The command token is not one of the seven known commands.
    #[error("unrecognized command: {0}")]
    Unknown(String),
    /// The command was recognized but its arguments did not parse.
    #[error("malformed arguments for {command}: {line}")]
    Malformed {
        /// The command token.
        command: &'static str,
        /// The full line that failed to parse.
        line: String,
    },
}

/// A single controller-to-client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `TARGET <ipv4-dotted> <port>` — set the server under test.
    Target { addr: Ipv4Addr, port: u16 },
    /// `SIZE <n>` — set the payload length in bytes.
    Size(u32),
    /// `COUNT <n>` — grow the socket pool to `n` connections.
    Count(u32),
    /// `CYCLES <n>` — set the iteration count per `TEST`.
    Cycles(u32),
    /// `TEST` — run one full test and reply with one `RESULT` line.
    Test,
    /// `DONE` — end the session; the client returns to discovery.
    Done,
    /// `KILL` — end the session; the client process exits.
    Kill,
}

impl Command {
    /// Parse one command line, without its trailing `\n`.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if the line is empty, names an unrecognized
    /// command, or the recognized command's arguments fail to parse.
    pub fn parse(line: &str) -> Result<Command, Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(Error::Empty)?;

        match command {
            "TARGET" => {
                let addr = words.next();
                let port = words.next();
                match (addr, port) {
                    (Some(addr), Some(port)) => {
                        let addr: Ipv4Addr = addr.parse().map_err(|_| Error::Malformed {
                            command: "TARGET",
                            line: line.to_string(),
                        })?;
                        let port: u16 = port.parse().map_err(|_| Error::Malformed {
                            command: "TARGET",
                            line: line.to_string(),
                        })?;
                        Ok(Command::Target { addr, port })
                    }
                    _ => Err(Error::Malformed {
                        command: "TARGET",
                        line: line.to_string(),
                    }),
                }
            }
            "SIZE" => parse_u32_arg(words.next(), "SIZE", line).map(Command::Size),
            "COUNT" => parse_u32_arg(words.next(), "COUNT", line).map(Command::Count),
            "CYCLES" => parse_u32_arg(words.next(), "CYCLES", line).map(Command::Cycles),
            "TEST" => Ok(Command::Test),
            "DONE" => Ok(Command::Done),
            "KILL" => Ok(Command::Kill),
            other => Err(Error::Unknown(other.to_string())),
        }
    }

    /// Render this command as a `\n`-terminated line ready to write to the
    /// control channel.
    #[must_use]
    pub fn to_line(self) -> String {
        format!("{self}\n")
    }
}

fn parse_u32_arg(arg: Option<&str>, command: &'static str, line: &str) -> Result<u32, Error> {
    arg.and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Malformed {
            command,
            line: line.to_string(),
        })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Target { addr, port } => write!(f, "TARGET {addr} {port}"),
            Command::Size(n) => write!(f, "SIZE {n}"),
            Command::Count(n) => write!(f, "COUNT {n}"),
            Command::Cycles(n) => write!(f, "CYCLES {n}"),
            Command::Test => f.write_str("TEST"),
            Command::Done => f.write_str("DONE"),
            Command::Kill => f.write_str("KILL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_target() {
        let cmd = Command::Target {
            addr: Ipv4Addr::new(127, 0, 0, 1),
            port: 7000,
        };
        let line = cmd.to_line();
        assert_eq!(line, "TARGET 127.0.0.1 7000\n");
        assert_eq!(Command::parse(line.trim_end()).unwrap(), cmd);
    }

    #[test]
    fn round_trips_simple_commands() {
        for (cmd, text) in [
            (Command::Size(1024), "SIZE 1024"),
            (Command::Count(5), "COUNT 5"),
            (Command::Cycles(3), "CYCLES 3"),
            (Command::Test, "TEST"),
            (Command::Done, "DONE"),
            (Command::Kill, "KILL"),
        ] {
            assert_eq!(cmd.to_string(), text);
            assert_eq!(Command::parse(text).unwrap(), cmd);
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert_eq!(
            Command::parse("FROBNICATE 1"),
            Err(Error::Unknown("FROBNICATE".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(matches!(
            Command::parse("SIZE not-a-number"),
            Err(Error::Malformed { command: "SIZE", .. })
        ));
        assert!(matches!(
            Command::parse("TARGET 999.0.0.1 7000"),
            Err(Error::Malformed {
                command: "TARGET",
                ..
            })
        ));
    }

    #[test]
    fn rejects_empty_line() {
        assert_eq!(Command::parse(""), Err(Error::Empty));
        assert_eq!(Command::parse("   "), Err(Error::Empty));
    }

    #[test]
    fn tolerates_trailing_newline_and_carriage_return() {
        assert_eq!(Command::parse("TEST\n").unwrap(), Command::Test);
        assert_eq!(Command::parse("TEST\r\n").unwrap(), Command::Test);
    }
}
