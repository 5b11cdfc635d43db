//! System `sftp-server` run as a child process.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FileTransferServer, ServeFuture, SftpError};
use crate::channel::{copy_to_channel, ChannelHandle, ChannelReader, Stream};
use crate::process::exit_code;

/// Install locations of OpenSSH's `sftp-server`, searched in order.
pub const WELL_KNOWN_SFTP_SERVERS: &[&str] = &[
    "/usr/lib/openssh/sftp-server",
    "/usr/libexec/openssh/sftp-server",
    "/usr/lib/ssh/sftp-server",
    "/usr/libexec/sftp-server",
];

/// Speaks SFTP by running an external `sftp-server` binary.
#[derive(Debug, Clone, Default)]
pub struct ExternalSftpServer {
    explicit: Option<PathBuf>,
}

impl ExternalSftpServer {
    /// `explicit` overrides the well-known locations.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }

    /// The executable that will be run, if any.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            return path.exists().then(|| path.clone());
        }
        WELL_KNOWN_SFTP_SERVERS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .or_else(|| which::which("sftp-server").ok())
    }

    async fn run(
        &self,
        mut input: ChannelReader,
        handle: ChannelHandle,
        working_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<(), SftpError> {
        let path = self.locate().ok_or(SftpError::ServerNotFound)?;
        let mut child = Command::new(&path)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SftpError::Spawn {
                path: path.clone(),
                source,
            })?;
        debug!(channel_id = handle.id(), pid = child.id(), path = %path.display(), "spawned sftp-server");

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(io::Error::other("sftp-server stdio was not captured").into());
        };

        // Client input may still be open when the server exits; the feed
        // is abandoned then.
        let channel_id = handle.id();
        let feed = tokio::spawn(async move {
            match tokio::io::copy(&mut input, &mut stdin).await {
                Ok(n) => debug!(channel_id, bytes = n, "sftp client input finished"),
                Err(e) => debug!(channel_id, error = %e, "copy to sftp-server failed"),
            }
            let _ = stdin.shutdown().await;
        });
        let exchange = async {
            let (out, err) = tokio::join!(
                copy_to_channel(stdout, &handle, Stream::Stdout),
                copy_to_channel(stderr, &handle, Stream::Stderr),
            );
            out.and(err)?;
            child.wait().await
        };

        let status = tokio::select! {
            status = exchange => status,
            () = cancel.cancelled() => {
                debug!(channel_id, "sftp session cancelled");
                feed.abort();
                return Ok(());
            }
        };
        feed.abort();
        match exit_code(status?) {
            0 => Ok(()),
            code => Err(SftpError::ServerFailed(code)),
        }
    }
}

impl FileTransferServer for ExternalSftpServer {
    fn serve<'a>(
        &'a self,
        input: ChannelReader,
        handle: ChannelHandle,
        working_dir: &'a Path,
        cancel: CancellationToken,
    ) -> ServeFuture<'a> {
        Box::pin(self.run(input, handle, working_dir, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{connection, Channel, ChannelEvent, PeerChannel};
    use crate::config::ServerConfig;
    use crate::files::unpack::tests::tarball;
    use crate::sftp::SftpBridge;
    use bytes::Bytes;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open() -> (Channel, PeerChannel) {
        let (peer, mut conn) = connection();
        let opener = tokio::spawn(async move { peer.open_channel("session", Bytes::new()).await });
        let channel = conn.channels.recv().await.unwrap().accept();
        (channel, opener.await.unwrap().unwrap())
    }

    /// A shell script installed as `sftp-server` in `bin`.
    fn scripted_server(bin: &TempDir, body: &str) -> ExternalSftpServer {
        let path = bin.path().join("sftp-server");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        ExternalSftpServer::new(Some(path))
    }

    #[tokio::test]
    async fn test_server_stdio_is_bridged() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let server = scripted_server(&bin, "cat; echo done >&2");
        let (Channel { handle, input, .. }, mut peer) = open().await;

        assert!(peer.send(&b"sftp packet"[..]).await);
        peer.send_eof();
        let served = tokio::time::timeout(
            Duration::from_secs(10),
            server.serve(input, handle.clone(), work.path(), CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(served.is_ok());

        // The server leaves closing to the bridge.
        handle.close().await;
        let transcript = peer.drain().await;
        assert_eq!(transcript.stdout_text(), "sftp packet");
        assert_eq!(transcript.stderr_text(), "done\n");
        assert!(transcript.exit_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_server_exit_ends_session_while_client_input_open() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let server = scripted_server(&bin, "echo bye; exit 3");
        // The client keeps its input open throughout.
        let (Channel { handle, input, .. }, mut peer) = open().await;

        let served = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve(input, handle.clone(), work.path(), CancellationToken::new()),
        )
        .await
        .expect("serve must return once the server exits");
        assert!(matches!(served, Err(SftpError::ServerFailed(3))));
        assert_eq!(
            peer.next_event().await,
            Some(ChannelEvent::Data(Bytes::from_static(b"bye\n")))
        );
        drop(peer);
    }

    #[tokio::test]
    async fn test_cancel_stops_server() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let server = scripted_server(&bin, "exec sleep 30");
        let (Channel { handle, input, .. }, _peer) = open().await;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        };
        let served = tokio::time::timeout(
            Duration::from_secs(10),
            server.serve(input, handle, work.path(), cancel),
        )
        .await
        .unwrap();
        assert!(served.is_ok());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_unpacks_upload_from_server() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let server = scripted_server(&bin, "cat > upload.tar");
        let (Channel { handle, input, .. }, mut peer) = open().await;

        let bridge = SftpBridge::new(
            Arc::new(server),
            Arc::new(ServerConfig::new(work.path())),
            handle,
        );
        let task = tokio::spawn(bridge.run(input, CancellationToken::new()));
        assert!(peer.send(tarball(&[("bin/tool", 0o755, b"#!/bin/sh\n")])).await);
        peer.send_eof();

        let transcript = tokio::time::timeout(Duration::from_secs(10), peer.drain())
            .await
            .unwrap();
        task.await.unwrap();
        assert!(transcript.closed);
        assert_eq!(transcript.exit_statuses(), vec![0]);
        let mode = fs::metadata(work.path().join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_bridge_reports_failed_server_without_client_eof() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let server = scripted_server(&bin, "exit 2");
        let (Channel { handle, input, .. }, mut peer) = open().await;

        let bridge = SftpBridge::new(
            Arc::new(server),
            Arc::new(ServerConfig::new(work.path())),
            handle,
        );
        tokio::spawn(bridge.run(input, CancellationToken::new()));

        let transcript = tokio::time::timeout(Duration::from_secs(5), peer.drain())
            .await
            .expect("bridge must close the channel once the server exits");
        assert!(transcript.closed);
        assert_eq!(transcript.exit_statuses(), vec![1]);
    }

    #[test]
    fn test_locate_explicit_path() {
        let dir = TempDir::new().unwrap();
        let server = dir.path().join("sftp-server");
        std::fs::write(&server, b"").unwrap();

        assert_eq!(ExternalSftpServer::new(Some(server.clone())).locate(), Some(server));
    }

    #[test]
    fn test_locate_missing_explicit_path() {
        let missing = ExternalSftpServer::new(Some(PathBuf::from("/nonexistent/sftp-server")));
        assert_eq!(missing.locate(), None);
    }
}
