//! Channel-open and channel request payloads (RFC4254).
//!
//! Each payload type implements [`Payload`] so it can be decoded from and
//! encoded to the raw bytes carried by the transport. Session requests are
//! folded into the closed [`SessionRequest`] enum, one variant per request
//! kind plus [`SessionRequest::Unsupported`] for anything else.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::wire::{WireReader, WireWriter};

/// Channel type for interactive sessions and command execution.
pub const CHANNEL_SESSION: &str = "session";

/// Channel type for client-initiated TCP forwarding.
pub const CHANNEL_DIRECT_TCPIP: &str = "direct-tcpip";

/// Request name used to report a process exit code.
pub const REQUEST_EXIT_STATUS: &str = "exit-status";

/// A typed channel payload.
pub trait Payload: Sized {
    /// Decode the payload, rejecting truncated input and trailing bytes.
    fn decode(payload: &[u8]) -> Result<Self>;

    /// Encode the payload in wire format.
    fn encode(&self) -> Bytes;
}

/// Reasons for refusing a channel open (RFC4254 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RejectReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl RejectReason {
    /// Numeric reason code as sent on the wire.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// `pty-req` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for the `TERM` environment variable.
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
    /// Encoded terminal modes, kept opaque.
    pub modes: Bytes,
}

impl Payload for PtyRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let request = Self {
            term: r.read_string()?,
            cols: r.read_u32()?,
            rows: r.read_u32()?,
            width_px: r.read_u32()?,
            height_px: r.read_u32()?,
            modes: Bytes::copy_from_slice(r.read_bytes()?),
        };
        r.finish()?;
        Ok(request)
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_str(&self.term)
            .put_u32(self.cols)
            .put_u32(self.rows)
            .put_u32(self.width_px)
            .put_u32(self.height_px)
            .put_bytes(&self.modes);
        w.finish()
    }
}

/// `window-change` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl Payload for WindowChange {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let change = Self {
            cols: r.read_u32()?,
            rows: r.read_u32()?,
            width_px: r.read_u32()?,
            height_px: r.read_u32()?,
        };
        r.finish()?;
        Ok(change)
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_u32(self.cols)
            .put_u32(self.rows)
            .put_u32(self.width_px)
            .put_u32(self.height_px);
        w.finish()
    }
}

/// `env` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl Payload for EnvVar {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let var = Self {
            name: r.read_string()?,
            value: r.read_string()?,
        };
        r.finish()?;
        Ok(var)
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_str(&self.name).put_str(&self.value);
        w.finish()
    }
}

/// `exec` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommand {
    pub command: String,
}

impl Payload for ExecCommand {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let command = r.read_string()?;
        r.finish()?;
        Ok(Self { command })
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_str(&self.command);
        w.finish()
    }
}

/// `subsystem` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRequest {
    pub name: String,
}

impl Payload for SubsystemRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let name = r.read_string()?;
        r.finish()?;
        Ok(Self { name })
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_str(&self.name);
        w.finish()
    }
}

/// `exit-status` payload: a single big-endian `uint32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
}

impl Payload for ExitStatus {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let code = r.read_u32()?;
        r.finish()?;
        Ok(Self { code })
    }

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.code.to_be_bytes())
    }
}

/// `direct-tcpip` channel-open payload (RFC4254 §7.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTcpip {
    /// Host the client wants to reach.
    pub host: String,
    pub port: u16,
    /// Address the connection originated from on the client side.
    pub originator_host: String,
    pub originator_port: u16,
}

fn read_port(r: &mut WireReader<'_>) -> Result<u16> {
    let raw = r.read_u32()?;
    u16::try_from(raw).map_err(|_| ProtocolError::InvalidPort(raw))
}

impl Payload for DirectTcpip {
    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let host = r.read_string()?;
        let port = read_port(&mut r)?;
        let originator_host = r.read_string()?;
        let originator_port = read_port(&mut r)?;
        r.finish()?;
        Ok(Self {
            host,
            port,
            originator_host,
            originator_port,
        })
    }

    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_str(&self.host)
            .put_u32(u32::from(self.port))
            .put_str(&self.originator_host)
            .put_u32(u32::from(self.originator_port));
        w.finish()
    }
}

/// A decoded session channel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    PtyReq(PtyRequest),
    WindowChange(WindowChange),
    Env(EnvVar),
    Shell,
    Exec(ExecCommand),
    Subsystem(SubsystemRequest),
    /// Any request type this server does not implement.
    Unsupported(String),
}

impl SessionRequest {
    /// Decode a request from its type name and payload.
    ///
    /// Unknown names decode successfully to [`SessionRequest::Unsupported`];
    /// known names with a malformed payload are an error.
    pub fn decode(name: &str, payload: &[u8]) -> Result<Self> {
        Ok(match name {
            "pty-req" => Self::PtyReq(PtyRequest::decode(payload)?),
            "window-change" => Self::WindowChange(WindowChange::decode(payload)?),
            "env" => Self::Env(EnvVar::decode(payload)?),
            "shell" => Self::Shell,
            "exec" => Self::Exec(ExecCommand::decode(payload)?),
            "subsystem" => Self::Subsystem(SubsystemRequest::decode(payload)?),
            other => Self::Unsupported(other.to_owned()),
        })
    }

    /// Request type name as it appears on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::PtyReq(_) => "pty-req",
            Self::WindowChange(_) => "window-change",
            Self::Env(_) => "env",
            Self::Shell => "shell",
            Self::Exec(_) => "exec",
            Self::Subsystem(_) => "subsystem",
            Self::Unsupported(name) => name,
        }
    }

    /// Encoded payload for this request.
    pub fn payload(&self) -> Bytes {
        match self {
            Self::PtyReq(p) => p.encode(),
            Self::WindowChange(p) => p.encode(),
            Self::Env(p) => p.encode(),
            Self::Exec(p) => p.encode(),
            Self::Subsystem(p) => p.encode(),
            Self::Shell | Self::Unsupported(_) => Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pty() -> PtyRequest {
        PtyRequest {
            term: "xterm-256color".into(),
            cols: 80,
            rows: 24,
            width_px: 640,
            height_px: 480,
            modes: Bytes::from_static(&[0]),
        }
    }

    #[test]
    fn test_pty_request_decode() {
        let encoded = sample_pty().encode();
        let decoded = PtyRequest::decode(&encoded).unwrap();
        assert_eq!(decoded.term, "xterm-256color");
        assert_eq!((decoded.cols, decoded.rows), (80, 24));
        assert_eq!(&decoded.modes[..], &[0]);
    }

    #[test]
    fn test_exit_status_is_four_bytes_big_endian() {
        let encoded = ExitStatus { code: 0x0102_0304 }.encode();
        assert_eq!(&encoded[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_exec_short_payload_is_truncated() {
        let err = SessionRequest::decode("exec", &[0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_exec_declared_length_longer_than_payload() {
        let err = SessionRequest::decode("exec", &[0, 0, 0, 5, b'l', b's']).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 5, remaining: 2 }));
    }

    #[test]
    fn test_window_change_with_trailing_bytes() {
        let mut raw = WindowChange {
            cols: 1,
            rows: 2,
            width_px: 0,
            height_px: 0,
        }
        .encode()
        .to_vec();
        raw.push(0);
        assert_eq!(
            WindowChange::decode(&raw),
            Err(ProtocolError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_shell_ignores_payload() {
        assert_eq!(SessionRequest::decode("shell", &[]).unwrap(), SessionRequest::Shell);
    }

    #[test]
    fn test_unknown_request_is_unsupported() {
        let req = SessionRequest::decode("x11-req", &[1, 2, 3]).unwrap();
        assert_eq!(req, SessionRequest::Unsupported("x11-req".into()));
        assert_eq!(req.name(), "x11-req");
    }

    #[test]
    fn test_request_name_and_payload_agree_with_decode() {
        let req = SessionRequest::Env(EnvVar {
            name: "FOO".into(),
            value: "bar".into(),
        });
        let again = SessionRequest::decode(req.name(), &req.payload()).unwrap();
        assert_eq!(again, req);
    }

    #[test]
    fn test_direct_tcpip_decode() {
        let mut w = WireWriter::new();
        w.put_str("localhost")
            .put_u32(8080)
            .put_str("10.0.0.2")
            .put_u32(51000);
        let fwd = DirectTcpip::decode(&w.finish()).unwrap();
        assert_eq!(fwd.host, "localhost");
        assert_eq!(fwd.port, 8080);
        assert_eq!(fwd.originator_port, 51000);
    }

    #[test]
    fn test_direct_tcpip_port_out_of_range() {
        let mut w = WireWriter::new();
        w.put_str("localhost")
            .put_u32(70000)
            .put_str("10.0.0.2")
            .put_u32(1);
        assert_eq!(
            DirectTcpip::decode(&w.finish()),
            Err(ProtocolError::InvalidPort(70000))
        );
    }

    #[test]
    fn test_reject_reason_codes() {
        assert_eq!(RejectReason::AdministrativelyProhibited.code(), 1);
        assert_eq!(RejectReason::ConnectFailed.code(), 2);
        assert_eq!(RejectReason::UnknownChannelType.code(), 3);
        assert_eq!(RejectReason::ResourceShortage.code(), 4);
    }
}
