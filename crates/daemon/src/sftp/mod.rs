//! SFTP subsystem bridge.
//!
//! The SFTP protocol itself is served by a [`FileTransferServer`]; the
//! default implementation runs the system's `sftp-server` binary with its
//! stdio bridged to the channel. When the server finishes, `.tar` files at
//! the top level of the working directory are unpacked in place, so an
//! archive uploaded over SFTP ends up extracted exactly like one sent
//! through the SCP sink.

mod external;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::{ChannelHandle, ChannelReader};
use crate::config::ServerConfig;
use crate::files::{find_tarballs, unpack_file, UnpackError};

pub use external::{ExternalSftpServer, WELL_KNOWN_SFTP_SERVERS};

/// Errors that can occur while bridging an SFTP session.
#[derive(Debug, Error)]
pub enum SftpError {
    /// No SFTP server executable was found.
    #[error("no sftp-server executable found")]
    ServerNotFound,

    /// The server could not be started.
    #[error("starting {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server exited unsuccessfully.
    #[error("sftp-server exited with status {0}")]
    ServerFailed(u32),

    /// Unpacking an uploaded archive failed.
    #[error("unpacking {path}: {source}")]
    Unpack {
        path: PathBuf,
        #[source]
        source: UnpackError,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Boxed future returned by [`FileTransferServer::serve`].
pub type ServeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SftpError>> + Send + 'a>>;

/// A file-transfer protocol server bound to one channel.
pub trait FileTransferServer: Send + Sync {
    /// Serve the client until it finishes.
    ///
    /// End of `input` is normal completion. `cancel` fires when the session
    /// is torn down. Implementations must not close the channel.
    fn serve<'a>(
        &'a self,
        input: ChannelReader,
        handle: ChannelHandle,
        working_dir: &'a Path,
        cancel: CancellationToken,
    ) -> ServeFuture<'a>;
}

/// Runs one SFTP subsystem request to completion.
pub struct SftpBridge {
    server: Arc<dyn FileTransferServer>,
    config: Arc<ServerConfig>,
    handle: ChannelHandle,
}

impl SftpBridge {
    pub fn new(
        server: Arc<dyn FileTransferServer>,
        config: Arc<ServerConfig>,
        handle: ChannelHandle,
    ) -> Self {
        Self {
            server,
            config,
            handle,
        }
    }

    /// Serve, unpack uploads, then report exit status 0 on success or 1.
    pub async fn run(self, input: ChannelReader, cancel: CancellationToken) {
        let channel_id = self.handle.id();
        let working_dir = self.config.working_dir.clone();

        let served = self
            .server
            .serve(input, self.handle.clone(), &working_dir, cancel)
            .await;
        if let Err(e) = &served {
            warn!(channel_id, error = %e, "sftp session failed");
        }

        let unpacked = if self.config.sftp.auto_unpack {
            unpack_uploads(working_dir).await
        } else {
            Ok(0)
        };
        match &unpacked {
            Ok(count) => info!(channel_id, archives = count, "sftp session finished"),
            Err(e) => warn!(channel_id, error = %e, "unpacking sftp uploads failed"),
        }

        let status = if served.is_ok() && unpacked.is_ok() { 0 } else { 1 };
        self.handle.finish(Some(status)).await;
    }
}

/// Unpack every top-level `.tar` in `dir` into `dir`, in name order.
pub async fn unpack_uploads(dir: PathBuf) -> Result<usize, SftpError> {
    tokio::task::spawn_blocking(move || -> Result<usize, SftpError> {
        let archives = find_tarballs(&dir)?;
        for archive in &archives {
            info!(archive = %archive.display(), "unpacking uploaded archive");
            unpack_file(archive, &dir).map_err(|source| SftpError::Unpack {
                path: archive.clone(),
                source,
            })?;
        }
        Ok(archives.len())
    })
    .await
    .map_err(io::Error::other)?
}
