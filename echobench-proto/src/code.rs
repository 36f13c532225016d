//! The client-side result codes carried in a `RESULT` line.
//!
//! See the error handling design: each non-zero value is a specific failure
//! class, not a generic "something went wrong" signal, so the controller can
//! print a human-readable reason without re-deriving it from client logs.

use std::fmt;

/// A typed view of the `code` field of a `RESULT` line.
///
/// `TryFrom`/`Into` round-trip through `u16` so the wire representation and
/// the typed representation can never drift apart: adding a new code means
/// updating exactly one match arm in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCode {
    /// The test ran to completion with no errors.
    Success,
    /// A later connect attempt timed out while opening sockets for a volley.
    ConnectTimeout,
    /// A later connect attempt was refused while opening sockets for a volley.
    ConnectRefused,
    /// The 10-second reply-await budget was exceeded.
    AwaitTimeout,
    /// A socket reported hangup while awaiting replies.
    Hangup,
    /// The echoed reply was not `buf_len` bytes.
    SizeMismatch,
    /// A socket reported an error event while awaiting replies.
    ReadError,
    /// A code this build does not recognize. Carried through unchanged so a
    /// newer client talking to an older controller degrades to "some
    /// failure" rather than panicking.
    Unknown(u16),
}

impl TestCode {
    /// Whether this code represents a successful test run.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, TestCode::Success)
    }

    /// The stable wire value for this code.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            TestCode::Success => 0,
            TestCode::ConnectTimeout => 2,
            TestCode::ConnectRefused => 3,
            TestCode::AwaitTimeout => 101,
            TestCode::Hangup => 104,
            TestCode::SizeMismatch => 105,
            TestCode::ReadError => 201,
            TestCode::Unknown(v) => v,
        }
    }
}

impl From<u16> for TestCode {
    fn from(value: u16) -> Self {
        match value {
            0 => TestCode::Success,
            2 => TestCode::ConnectTimeout,
            3 => TestCode::ConnectRefused,
            101 => TestCode::AwaitTimeout,
            104 => TestCode::Hangup,
            105 => TestCode::SizeMismatch,
            201 => TestCode::ReadError,
            other => TestCode::Unknown(other),
        }
    }
}

impl From<TestCode> for u16 {
    fn from(code: TestCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for TestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TestCode::Success => "success",
            TestCode::ConnectTimeout => "connect timed out",
            TestCode::ConnectRefused => "connect refused",
            TestCode::AwaitTimeout => "reply-await timed out",
            TestCode::Hangup => "socket hangup during reply-await",
            TestCode::SizeMismatch => "echo reply size mismatch",
            TestCode::ReadError => "socket error during reply-await",
            TestCode::Unknown(v) => return write!(f, "unrecognized code {v}"),
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_known_codes() {
        for raw in [0u16, 2, 3, 101, 104, 105, 201] {
            let code = TestCode::from(raw);
            assert_eq!(code.as_u16(), raw);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let code = TestCode::from(42);
        assert_eq!(code, TestCode::Unknown(42));
        assert_eq!(code.as_u16(), 42);
    }

    #[test]
    fn only_zero_is_success() {
        assert!(TestCode::from(0).is_success());
        assert!(!TestCode::from(2).is_success());
    }
}
