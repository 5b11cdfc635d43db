//! Errors raised while handling session requests.

use std::io;

use protocol::ProtocolError;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::scp::ScpError;

/// Broad class of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Undecodable payload or command line.
    ProtocolViolation,
    /// Unknown request type or subsystem.
    UnsupportedRequest,
    /// A PTY or process could not be created.
    Resource,
    /// Stream failure while talking to the client.
    Io,
    /// Request is valid but not applicable in the current state.
    InvalidState,
}

/// Errors that can occur while processing a session request.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The request payload could not be decoded.
    #[error("malformed {request} request: {source}")]
    Protocol {
        request: String,
        #[source]
        source: ProtocolError,
    },

    /// The command line could not be tokenized.
    #[error("invalid command line {0:?}")]
    InvalidCommand(String),

    /// The request type is not implemented.
    #[error("unknown request type: {0:?}")]
    UnsupportedRequest(String),

    /// The subsystem is not implemented.
    #[error("unsupported subsystem: {0:?}")]
    UnsupportedSubsystem(String),

    /// A window-change arrived before any pty-req.
    #[error("window-change without an allocated PTY")]
    NoPty,

    /// A second pty-req on the same channel.
    #[error("PTY already allocated for this session")]
    PtyAlreadyAllocated,

    /// Channel input already belongs to a running process or transfer.
    #[error("channel input is already attached to a running command")]
    InputInUse,

    /// Opening or configuring the PTY failed.
    #[error("PTY error: {0}")]
    Pty(String),

    /// Starting the process failed.
    #[error("starting {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The SCP sink failed.
    #[error(transparent)]
    Scp(#[from] ScpError),

    /// Writing to the channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { .. } | Self::InvalidCommand(_) => ErrorKind::ProtocolViolation,
            Self::UnsupportedRequest(_) | Self::UnsupportedSubsystem(_) => {
                ErrorKind::UnsupportedRequest
            }
            Self::NoPty | Self::PtyAlreadyAllocated | Self::InputInUse => ErrorKind::InvalidState,
            Self::Pty(_) | Self::Spawn { .. } => ErrorKind::Resource,
            Self::Scp(e) if e.is_protocol_violation() => ErrorKind::ProtocolViolation,
            Self::Scp(_) | Self::Channel(_) | Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the error aborts the session.
    ///
    /// Non-fatal errors only fail the triggering request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoPty | Self::PtyAlreadyAllocated)
    }

    /// Error text as written to the client, always newline-terminated.
    pub fn client_message(&self) -> String {
        let mut text = self.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }
}
