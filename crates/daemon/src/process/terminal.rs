//! PTY-attached launch.
//!
//! The child gets the session's PTY slave as stdin, stdout, stderr and
//! controlling terminal. Two copy loops connect the channel to the master;
//! whichever ends first, or the process exiting, closes the channel and
//! kills what is left of the process. PTY file descriptors are blocking, so each read and write runs on the
//! blocking pool; the reader and writer are moved into the blocking task
//! and handed back when it finishes.

use std::io::{self, Read, Write};

use nix::errno::Errno;
use portable_pty::CommandBuilder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{kill_process_group, supervise, LaunchSpec, Supervision};
use crate::channel::{ChannelHandle, ChannelReader};
use crate::session::{PtyPair, SessionError};

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

fn pty_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Pty(e.to_string())
}

/// Start `launch` on the session's PTY.
pub fn spawn(
    launch: &LaunchSpec,
    pty: &mut PtyPair,
    handle: ChannelHandle,
    input: ChannelReader,
    cancel: CancellationToken,
) -> Result<Supervision, SessionError> {
    let slave = pty
        .take_slave()
        .ok_or_else(|| SessionError::Pty("terminal is already attached to a command".into()))?;

    let mut command = CommandBuilder::new(launch.program());
    command.args(launch.args());
    command.env_clear();
    for (key, value) in &launch.env {
        command.env(key, value);
    }
    command.cwd(&launch.cwd);

    let mut child = slave
        .spawn_command(command)
        .map_err(|e| SessionError::Spawn {
            program: launch.program().to_string(),
            source: io::Error::other(e.to_string()),
        })?;
    // Our copy of the slave must be gone for master reads to end at exit.
    drop(slave);

    let reader = pty.master().try_clone_reader().map_err(pty_error)?;
    let writer = pty.master().take_writer().map_err(pty_error)?;

    let pid = child.process_id();
    let channel_id = handle.id();
    debug!(channel_id, pid, "spawned terminal process");

    let mut killer = child.clone_killer();
    let kill = CancellationToken::new();
    // Either copy direction ending tears the session down.
    let output = {
        let handle = handle.clone();
        async move {
            tokio::select! {
                result = pump_terminal(reader, handle) => result,
                () = feed_terminal(input, writer, channel_id) => {
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "client input closed"))
                }
            }
        }
    };

    let wait = {
        let kill = kill.clone();
        async move {
            let mut waiter = tokio::task::spawn_blocking(move || child.wait());
            let joined = tokio::select! {
                joined = &mut waiter => joined,
                () = kill.cancelled() => {
                    kill_process_group(pid);
                    let _ = killer.kill();
                    waiter.await
                }
            };
            match joined {
                Ok(status) => status.map(|s| s.exit_code()),
                Err(e) => Err(io::Error::other(e)),
            }
        }
    };

    Ok(Box::pin(supervise(handle, pid, wait, output, kill, cancel)))
}

/// Copy PTY output to the channel until the terminal hangs up.
async fn pump_terminal(mut reader: Box<dyn Read + Send>, handle: ChannelHandle) -> io::Result<()> {
    loop {
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            let result = reader.read(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            });
            (reader, result)
        })
        .await
        .map_err(io::Error::other)?;
        reader = returned;

        match result {
            Ok(buf) if buf.is_empty() => return Ok(()),
            Ok(buf) => handle.data(buf).await?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the last slave descriptor is closed.
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Copy channel input to the PTY master.
async fn feed_terminal(mut input: ChannelReader, mut writer: Box<dyn Write + Send>, channel_id: u32) {
    while let Some(chunk) = input.read_chunk().await {
        let written = tokio::task::spawn_blocking(move || {
            let result = writer.write_all(&chunk).and_then(|()| writer.flush());
            (writer, result)
        })
        .await;

        match written {
            Ok((returned, Ok(()))) => writer = returned,
            Ok((_, Err(e))) => {
                debug!(channel_id, error = %e, "write to terminal failed");
                return;
            }
            Err(e) => {
                debug!(channel_id, error = %e, "terminal writer task failed");
                return;
            }
        }
    }
    debug!(channel_id, "client input finished");
}
