//! SCP sink control messages.
//!
//! The sender announces each file with a control line of the form
//! `C<mode> <size> <name>\n`, where the mode is octal and the size decimal.
//! The receiver answers every message with a single [`SCP_OK`] byte.

use crate::error::{ProtocolError, Result};

/// Acknowledgement byte sent after every received message.
pub const SCP_OK: u8 = 0;

const CONTROL_FIELDS: usize = 3;

/// A parsed `C` control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpControl {
    /// Permission bits.
    pub mode: u32,
    /// Declared payload size in bytes.
    pub size: u64,
    /// File name as sent by the client.
    pub name: String,
}

impl ScpControl {
    /// Parse a control line, with or without its trailing newline.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let invalid = |reason: String| ProtocolError::InvalidControlMessage {
            line: trimmed.to_owned(),
            reason,
        };
        let body = trimmed
            .strip_prefix('C')
            .ok_or_else(|| invalid("expected a C message".into()))?;

        let fields: Vec<&str> = body.split(' ').collect();
        if fields.len() != CONTROL_FIELDS {
            return Err(invalid(format!(
                "invalid number of space-separated tokens: got {}, want {}",
                fields.len(),
                CONTROL_FIELDS
            )));
        }

        let mode = u32::from_str_radix(fields[0], 8)
            .map_err(|_| ProtocolError::InvalidMode(fields[0].to_owned()))?;
        let size = fields[1]
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidSize(fields[1].to_owned()))?;

        Ok(Self {
            mode,
            size,
            name: fields[2].to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_line() {
        let ctl = ScpControl::parse("C0644 13 hello.txt\n").unwrap();
        assert_eq!(
            ctl,
            ScpControl {
                mode: 0o644,
                size: 13,
                name: "hello.txt".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let err = ScpControl::parse("C0644 13").unwrap_err();
        match err {
            ProtocolError::InvalidControlMessage { line, reason } => {
                assert_eq!(line, "C0644 13");
                assert!(reason.contains("got 2, want 3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_names_with_spaces() {
        assert!(ScpControl::parse("C0644 13 two words").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        assert_eq!(
            ScpControl::parse("C0644 thirteen hello.txt"),
            Err(ProtocolError::InvalidSize("thirteen".into()))
        );
    }

    #[test]
    fn test_parse_rejects_non_octal_mode() {
        assert_eq!(
            ScpControl::parse("C0689 1 a"),
            Err(ProtocolError::InvalidMode("0689".into()))
        );
    }

    #[test]
    fn test_parse_requires_c_prefix() {
        assert!(matches!(
            ScpControl::parse("D0755 0 dir"),
            Err(ProtocolError::InvalidControlMessage { .. })
        ));
    }
}
