//! Line protocol spoken by clients.
//!
//! ```text
//! terminate\n        first line only: ask the server to stop
//! [-]DDDDDDDDD\n     exactly nine digits, optional leading minus
//! ```
//!
//! Nothing is ever written back to the client.

use crate::defs::{NUMBER_DIGITS, TERMINATE_TOKEN};
use crate::errors::ProtocolError;

/// A decoded protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Server-wide stop request.
    Terminate,
    /// A numeric report.
    Number(i32),
}

/// Position of a line inside its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has been consumed yet; `terminate` is still allowed.
    AwaitingFirstLine,
    /// At least one number has been accepted.
    AwaitingLine,
}

/// Parses one line, already stripped of its terminator.
pub fn parse_line(line: &str) -> Result<Command, ProtocolError> {
    if line == TERMINATE_TOKEN {
        return Ok(Command::Terminate);
    }
    parse_number(line)
        .map(Command::Number)
        .ok_or_else(|| ProtocolError::Malformed(line.to_string()))
}

/// Decodes `^-?[0-9]{9}$` into an integer.
///
/// `i32::from_str` alone is not enough: it also accepts `+`, shorter and
/// longer digit runs.
pub fn parse_number(token: &str) -> Option<i32> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.len() != NUMBER_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Removes the line terminator (`\n`, optionally preceded by `\r`).
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Applies one line to a session.
///
/// Returns the command to execute and the next state; `terminate` is only
/// honoured in [`SessionState::AwaitingFirstLine`].
pub fn advance(
    state: SessionState,
    line: &str,
) -> Result<(Command, SessionState), ProtocolError> {
    match (parse_line(line)?, state) {
        (Command::Terminate, SessionState::AwaitingFirstLine) => {
            Ok((Command::Terminate, SessionState::AwaitingFirstLine))
        }
        (Command::Terminate, SessionState::AwaitingLine) => Err(ProtocolError::LateTerminate),
        (cmd @ Command::Number(_), _) => Ok((cmd, SessionState::AwaitingLine)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_numbers() {
        assert_eq!(parse_line("000000001"), Ok(Command::Number(1)));
        assert_eq!(parse_line("123456789"), Ok(Command::Number(123456789)));
        assert_eq!(parse_line("-000000042"), Ok(Command::Number(-42)));
        assert_eq!(parse_line("999999999"), Ok(Command::Number(999_999_999)));
        assert_eq!(parse_line("-999999999"), Ok(Command::Number(-999_999_999)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "1",
            "00000001",
            "0000000001",
            "+00000001",
            "+000000001",
            "--00000001",
            "12345678a",
            " 123456789",
            "123456789 ",
            "abc",
            "",
            "TERMINATE",
            "terminate ",
        ] {
            assert!(
                matches!(parse_line(bad), Err(ProtocolError::Malformed(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_unicode_digits() {
        // Non-ASCII digits have more than one byte each.
        assert_eq!(parse_number("١٢٣٤٥٦٧٨٩"), None);
    }

    #[test]
    fn test_parse_terminate() {
        assert_eq!(parse_line("terminate"), Ok(Command::Terminate));
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator(b"123456789\n"), b"123456789");
        assert_eq!(strip_terminator(b"123456789\r\n"), b"123456789");
        assert_eq!(strip_terminator(b"123456789"), b"123456789");
        assert_eq!(strip_terminator(b"\n"), b"");
    }

    #[test]
    fn test_advance_session() {
        let (cmd, state) = advance(SessionState::AwaitingFirstLine, "terminate").unwrap();
        assert_eq!(cmd, Command::Terminate);
        assert_eq!(state, SessionState::AwaitingFirstLine);

        let (cmd, state) = advance(SessionState::AwaitingFirstLine, "000000005").unwrap();
        assert_eq!(cmd, Command::Number(5));
        assert_eq!(state, SessionState::AwaitingLine);

        assert_eq!(
            advance(SessionState::AwaitingLine, "terminate"),
            Err(ProtocolError::LateTerminate)
        );
        assert!(advance(SessionState::AwaitingLine, "xyz").is_err());
    }
}
