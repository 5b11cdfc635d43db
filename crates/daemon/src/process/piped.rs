//! Piped-stdio launch for sessions without a PTY.
//!
//! Child stdout goes to the channel's primary stream and stderr to the
//! secondary stream. Channel input is copied to stdin, which is closed when
//! the client sends EOF.

use std::io;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{exit_code, kill_process_group, supervise, LaunchSpec, Supervision};
use crate::channel::{copy_to_channel, ChannelHandle, ChannelReader, Stream};
use crate::session::SessionError;

fn missing(stream: &str) -> io::Error {
    io::Error::other(format!("child {stream} was not captured"))
}

/// Start `launch` with piped stdio.
pub fn spawn(
    launch: &LaunchSpec,
    handle: ChannelHandle,
    input: ChannelReader,
    cancel: CancellationToken,
) -> Result<Supervision, SessionError> {
    let program = launch.program().to_string();
    let spawn_error = |source: io::Error| SessionError::Spawn {
        program: program.clone(),
        source,
    };

    let mut command = Command::new(&program);
    command
        .args(launch.args())
        .env_clear()
        .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&launch.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| nix::unistd::setsid().map(drop).map_err(io::Error::from));
    }

    let mut child = command.spawn().map_err(spawn_error)?;
    let stdin = child.stdin.take().ok_or_else(|| spawn_error(missing("stdin")))?;
    let stdout = child.stdout.take().ok_or_else(|| spawn_error(missing("stdout")))?;
    let stderr = child.stderr.take().ok_or_else(|| spawn_error(missing("stderr")))?;

    let pid = child.id();
    let channel_id = handle.id();
    debug!(channel_id, pid, "spawned piped process");

    let kill = CancellationToken::new();
    let stdin_task = tokio::spawn(feed_stdin(input, stdin, channel_id));

    let output = {
        let handle = handle.clone();
        async move {
            let (out, err) = tokio::join!(
                copy_to_channel(stdout, &handle, Stream::Stdout),
                copy_to_channel(stderr, &handle, Stream::Stderr),
            );
            out.and(err).map(drop)
        }
    };

    let wait = {
        let kill = kill.clone();
        async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = kill.cancelled() => {
                    kill_process_group(pid);
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            status.map(exit_code)
        }
    };

    Ok(Box::pin(async move {
        supervise(handle, pid, wait, output, kill, cancel).await;
        stdin_task.abort();
    }))
}

async fn feed_stdin(mut input: ChannelReader, mut stdin: ChildStdin, channel_id: u32) {
    match tokio::io::copy(&mut input, &mut stdin).await {
        Ok(n) => debug!(channel_id, bytes = n, "client input finished"),
        Err(e) => debug!(channel_id, error = %e, "copy to stdin failed"),
    }
    let _ = stdin.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{connection, Channel, PeerChannel};
    use bytes::Bytes;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn open() -> (Channel, PeerChannel) {
        let (peer, mut conn) = connection();
        let opener = tokio::spawn(async move { peer.open_channel("session", Bytes::new()).await });
        let channel = conn.channels.recv().await.unwrap().accept();
        (channel, opener.await.unwrap().unwrap())
    }

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
            env: vec![("PATH".into(), "/usr/bin:/bin".into())],
            cwd: PathBuf::from("/"),
        }
    }

    #[tokio::test]
    async fn test_stdout_stderr_and_exit_status() {
        let (channel, mut peer) = open().await;
        let run = spawn(
            &sh("echo out; echo err >&2; exit 7"),
            channel.handle.clone(),
            channel.input,
            CancellationToken::new(),
        )
        .unwrap();
        tokio::spawn(run);

        let transcript = tokio::time::timeout(Duration::from_secs(10), peer.drain())
            .await
            .unwrap();
        assert_eq!(transcript.stdout_text(), "out\n");
        assert_eq!(transcript.stderr_text(), "err\n");
        assert_eq!(transcript.exit_statuses(), vec![7]);
        assert!(transcript.closed);
    }

    #[tokio::test]
    async fn test_stdin_is_closed_on_client_eof() {
        let (channel, mut peer) = open().await;
        let run = spawn(
            &sh("cat"),
            channel.handle.clone(),
            channel.input,
            CancellationToken::new(),
        )
        .unwrap();
        tokio::spawn(run);

        assert!(peer.send(&b"ping\n"[..]).await);
        peer.send_eof();

        let transcript = tokio::time::timeout(Duration::from_secs(10), peer.drain())
            .await
            .unwrap();
        assert_eq!(transcript.stdout_text(), "ping\n");
        assert_eq!(transcript.exit_status(), Some(0));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let (channel, mut peer) = open().await;
        let cancel = CancellationToken::new();
        let run = spawn(
            &sh("sleep 30"),
            channel.handle.clone(),
            channel.input,
            cancel.clone(),
        )
        .unwrap();
        let task = tokio::spawn(run);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        let transcript = peer.drain().await;
        assert!(transcript.closed);
        assert_eq!(transcript.exit_statuses().len(), 1);
    }

    /// Whether `pid` is gone or a zombie.
    fn is_dead(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn test_background_child_holding_output_is_killed() {
        let (channel, mut peer) = open().await;
        let run = spawn(
            &sh("sleep 30 & echo $!; exit 0"),
            channel.handle.clone(),
            channel.input,
            CancellationToken::new(),
        )
        .unwrap();
        tokio::spawn(run);

        let transcript = tokio::time::timeout(Duration::from_secs(10), peer.drain())
            .await
            .unwrap();
        assert!(transcript.closed);
        assert_eq!(transcript.exit_statuses(), vec![0]);

        let sleeper: u32 = transcript.stdout_text().trim().parse().unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !is_dead(sleeper) {
            assert!(tokio::time::Instant::now() < deadline, "background sleep {sleeper} survived");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_environment_is_replaced() {
        let (channel, mut peer) = open().await;
        let mut launch = sh("env");
        launch.env.push(("FOO".into(), "bar".into()));
        let run = spawn(&launch, channel.handle.clone(), channel.input, CancellationToken::new())
            .unwrap();
        tokio::spawn(run);

        let transcript = peer.drain().await;
        let stdout = transcript.stdout_text();
        assert!(stdout.lines().any(|l| l == "FOO=bar"));
        assert!(!stdout.lines().any(|l| l.starts_with("CARGO_")));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_program() {
        let (channel, _peer) = open().await;
        let launch = LaunchSpec {
            argv: vec!["/nonexistent/tool".into()],
            env: Vec::new(),
            cwd: PathBuf::from("/"),
        };
        let err = match spawn(&launch, channel.handle.clone(), channel.input, CancellationToken::new()) {
            Err(e) => e,
            Ok(_) => panic!("spawn of a missing program succeeded"),
        };
        assert!(err.to_string().starts_with("starting /nonexistent/tool"));
    }
}
