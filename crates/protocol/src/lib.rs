//! # Hatch Protocol Library
//!
//! Wire formats spoken by the Hatch debug-access server once a connection
//! has been authenticated.
//!
//! ## Overview
//!
//! This crate has no I/O. It provides:
//!
//! - **Wire primitives**: RFC4251 `uint32`, `string` and `boolean` encoding
//! - **Channel payloads**: typed RFC4254 request and channel-open payloads
//! - **SCP sink protocol**: parsing of `C<mode> <size> <name>` control lines
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     SessionRequest / DirectTcpip        │  messages
//! ├─────────────────────────────────────────┤
//! │      WireReader / WireWriter            │  wire
//! ├─────────────────────────────────────────┤
//! │   Channel transport (RFC4254 framing)   │  provided by the daemon
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Payload, SessionRequest, ExecCommand};
//!
//! let payload = ExecCommand { command: "uname -a".into() }.encode();
//! let request = SessionRequest::decode("exec", &payload).unwrap();
//! assert_eq!(request.name(), "exec");
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: Primitive encoding and decoding
//! - [`messages`]: Channel-open and session request payloads
//! - [`scp`]: SCP control messages
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod scp;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use messages::{
    DirectTcpip, EnvVar, ExecCommand, ExitStatus, Payload, PtyRequest, RejectReason,
    SessionRequest, SubsystemRequest, WindowChange, CHANNEL_DIRECT_TCPIP, CHANNEL_SESSION,
    REQUEST_EXIT_STATUS,
};
pub use scp::{ScpControl, SCP_OK};
pub use wire::{WireReader, WireWriter};
