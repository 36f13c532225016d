//! Client-to-controller replies.

use std::fmt;

use crate::code::TestCode;

/// Errors parsing a [`Reply`] line.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// The line had no recognizable reply token.
    #[error("empty or unreadable reply line")]
    Empty,
    /// The line started with `RESULT` but its fields did not parse.
    #[error("malformed RESULT line: {0}")]
    MalformedResult(String),
    /// The reply token was neither `RESULT` nor `ERR`.
    #[error("unrecognized reply: {0}")]
    Unknown(String),
}

/// A single client-to-controller reply line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `RESULT <code> <min_ms> <max_ms> <sum_ms>` — the outcome of one `TEST`.
    Result {
        code: TestCode,
        min_ms: f64,
        max_ms: f64,
        sum_ms: f64,
    },
    /// `ERR <text>` — a soft error, e.g. a `TEST` issued before the plan was ready.
    Err(String),
}

impl Reply {
    /// Parse one reply line, without its trailing `\n`.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if the line is empty, names neither `RESULT` nor
    /// `ERR`, or `RESULT`'s fields fail to parse.
    pub fn parse(line: &str) -> Result<Reply, Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut words = line.split_whitespace();
        let tag = words.next().ok_or(Error::Empty)?;

        match tag {
            "RESULT" => {
                let fields: Vec<&str> = words.collect();
                let [code, min_ms, max_ms, sum_ms] = fields.as_slice() else {
                    return Err(Error::MalformedResult(line.to_string()));
                };
                let code: u16 = code
                    .parse()
                    .map_err(|_| Error::MalformedResult(line.to_string()))?;
                let min_ms: f64 = min_ms
                    .parse()
                    .map_err(|_| Error::MalformedResult(line.to_string()))?;
                let max_ms: f64 = max_ms
                    .parse()
                    .map_err(|_| Error::MalformedResult(line.to_string()))?;
                let sum_ms: f64 = sum_ms
                    .parse()
                    .map_err(|_| Error::MalformedResult(line.to_string()))?;
                Ok(Reply::Result {
                    code: TestCode::from(code),
                    min_ms,
                    max_ms,
                    sum_ms,
                })
            }
            "ERR" => {
                let text = line.strip_prefix("ERR").unwrap_or("").trim();
                Ok(Reply::Err(text.to_string()))
            }
            other => Err(Error::Unknown(other.to_string())),
        }
    }

    /// Render this reply as a `\n`-terminated line ready to write to the
    /// control channel.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Result {
                code,
                min_ms,
                max_ms,
                sum_ms,
            } => write!(
                f,
                "RESULT {} {:10.3} {:10.3} {:10.3}",
                code.as_u16(),
                min_ms,
                max_ms,
                sum_ms
            ),
            Reply::Err(text) => write!(f, "ERR {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_result() {
        let reply = Reply::Result {
            code: TestCode::Success,
            min_ms: 1.5,
            max_ms: 12.25,
            sum_ms: 48.0,
        };
        let line = reply.to_line();
        assert_eq!(Reply::parse(line.trim_end()).unwrap(), reply);
    }

    #[test]
    fn result_line_carries_three_fractional_digits() {
        let reply = Reply::Result {
            code: TestCode::Success,
            min_ms: 1.0,
            max_ms: 1.0,
            sum_ms: 1.0,
        };
        assert_eq!(reply.to_string(), "RESULT 0      1.000      1.000      1.000");
    }

    #[test]
    fn preserves_nonzero_codes() {
        let reply = Reply::Result {
            code: TestCode::ConnectRefused,
            min_ms: 0.0,
            max_ms: 0.0,
            sum_ms: 0.0,
        };
        match Reply::parse(&reply.to_line()).unwrap() {
            Reply::Result { code, .. } => assert_eq!(code, TestCode::ConnectRefused),
            Reply::Err(_) => panic!("expected a RESULT reply"),
        }
    }

    #[test]
    fn rejects_malformed_result() {
        assert!(matches!(
            Reply::parse("RESULT 0 1.0 2.0"),
            Err(Error::MalformedResult(_))
        ));
    }

    #[test]
    fn rejects_unknown_reply() {
        assert_eq!(
            Reply::parse("WAT"),
            Err(Error::Unknown("WAT".to_string()))
        );
    }

    #[test]
    fn err_parse_preserves_wire_text() {
        assert_eq!(
            Reply::parse("ERR Server disconnected").unwrap(),
            Reply::Err("Server disconnected".to_string())
        );
    }

    #[test]
    fn err_round_trips_through_to_line() {
        let reply = Reply::Err("Not Ready to test".to_string());
        assert_eq!(Reply::parse(reply.to_line().trim_end()).unwrap(), reply);
    }
}
