//! SCP sink.
//!
//! Implements the receiving side of the legacy `scp -t` protocol. Each file
//! announced with a `C<mode> <size> <name>` control line carries a tar
//! archive, which is extracted below the working directory:
//!
//! ```text
//!   server                         client
//!     0x00  ───────────────────▶             ready
//!           ◀───────────────────  C0644 N x  control line
//!     0x00  ───────────────────▶
//!           ◀───────────────────  N bytes    tar stream
//!           ◀───────────────────  0x00       status
//!     0x00  ───────────────────▶
//!           ◀───────────────────  EOF
//!   exit-status 0, close
//! ```

mod args;

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use protocol::{ProtocolError, ScpControl, SCP_OK};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

use crate::channel::{ChannelError, ChannelHandle, ChannelReader};
use crate::files::{unpack, Extracted, UnpackError};

pub use args::ScpArgs;

/// Longest control line accepted.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while receiving files.
#[derive(Debug, Error)]
pub enum ScpError {
    #[error("expected -t")]
    NotSink,

    #[error("unknown scp flag: -{0}")]
    UnknownFlag(char),

    #[error("control message too long (over {MAX_LINE_LENGTH} bytes)")]
    LineTooLong,

    #[error(transparent)]
    Control(#[from] ProtocolError),

    /// The client stopped sending before the declared size was reached.
    #[error("transfer ended after {received} of {expected} bytes")]
    ShortTransfer { expected: u64, received: u64 },

    #[error(transparent)]
    Unpack(#[from] UnpackError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ScpError {
    /// Whether the client sent something that violates the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::NotSink | Self::UnknownFlag(_) | Self::LineTooLong | Self::Control(_)
        )
    }
}

/// Receives `scp -t` uploads on one channel.
#[derive(Debug)]
pub struct ScpSink {
    handle: ChannelHandle,
    dest: PathBuf,
}

impl ScpSink {
    /// Sink extracting below `dest`.
    pub fn new(handle: ChannelHandle, dest: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            dest: dest.into(),
        }
    }

    async fn ack(&self) -> Result<(), ScpError> {
        self.handle.data(Bytes::from_static(&[SCP_OK])).await?;
        Ok(())
    }

    /// Run the protocol until the client closes its input.
    ///
    /// `words` are the arguments after `scp`. On success `exit-status 0` has
    /// been sent and the channel is closed.
    pub async fn run(
        self,
        input: ChannelReader,
        words: &[String],
    ) -> Result<Vec<Extracted>, ScpError> {
        let args = ScpArgs::parse(words)?;
        debug!(
            channel_id = self.handle.id(),
            target = ?args.target,
            dest = %self.dest.display(),
            "scp sink started"
        );

        let mut reader = BufReader::new(input);
        let mut extracted = Vec::new();
        let mut line = Vec::new();

        self.ack().await?;
        loop {
            line.clear();
            let limit = MAX_LINE_LENGTH as u64 + 1;
            let n = (&mut reader).take(limit).read_until(b'\n', &mut line).await?;
            if n == 0 {
                break;
            }
            if line.len() > MAX_LINE_LENGTH {
                return Err(ScpError::LineTooLong);
            }
            self.ack().await?;

            if line[0] != b'C' {
                debug!(message = %String::from_utf8_lossy(&line).trim_end(), "ignoring scp message");
                continue;
            }

            let control = ScpControl::parse(&String::from_utf8_lossy(&line))?;
            info!(name = %control.name, size = control.size, mode = %format!("{:o}", control.mode), "receiving");
            let (rest, files) = self.receive(reader, &control).await?;
            reader = rest;
            extracted.extend(files);
        }

        self.handle.finish(Some(0)).await;
        Ok(extracted)
    }

    /// Extract one `C` payload and consume its trailing status byte.
    async fn receive<R>(
        &self,
        reader: R,
        control: &ScpControl,
    ) -> Result<(R, Vec<Extracted>), ScpError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bridge = SyncIoBridge::new(reader.take(control.size));
        let dest = self.dest.clone();
        let (bridge, result) = tokio::task::spawn_blocking(move || {
            let mut bridge = bridge;
            let result = unpack(&mut bridge, &dest);
            (bridge, result)
        })
        .await
        .map_err(io::Error::other)?;
        let files = result?;

        // Whatever the archive did not consume still belongs to this file.
        let mut limited = bridge.into_inner();
        let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if limited.limit() > 0 {
            return Err(ScpError::ShortTransfer {
                expected: control.size,
                received: control.size - limited.limit(),
            });
        }
        if drained > 0 {
            debug!(bytes = drained, "discarded bytes after tar archive");
        }

        let mut reader = limited.into_inner();
        let mut status = [0u8; 1];
        match reader.read_exact(&mut status).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ScpError::ShortTransfer {
                    expected: control.size + 1,
                    received: control.size,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.ack().await?;

        Ok((reader, files))
    }
}
