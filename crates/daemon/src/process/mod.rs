//! Process execution for session channels.
//!
//! A command is launched either with piped stdio ([`piped`]) or attached to
//! the session's PTY ([`terminal`]). Both variants make the child a session
//! leader and return a [`Supervision`] future that owns the child until it
//! exits, then reports `exit-status` and closes the channel through the
//! channel's close barrier.
//!
//! # Teardown
//!
//! ```text
//!   process exit ──┐
//!                  ├──> ChannelHandle::finish(exit code)   (fires once)
//!   output EOF ────┤
//!   cancellation ──┘ (kill process group first)
//!
//!   output still open 1s after exit ──> kill process group, then finish
//! ```

pub mod env;
pub mod piped;
pub mod shell;
pub mod terminal;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelHandle;

pub use env::{expand_path, launch_env};
pub use shell::{launch_argv, resolve_shell};

/// How long output may keep flowing after the process exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

/// A running process, driven to completion by awaiting it.
pub type Supervision = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// Numeric exit code; 0 when the process was killed by a signal.
pub fn exit_code(status: std::process::ExitStatus) -> u32 {
    status.code().map(|c| c as u32).unwrap_or(0)
}

/// SIGKILL the process group led by `pid`.
pub(crate) fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, error = %e, "killpg failed");
    }
}

/// Drive a launched process to completion.
///
/// `wait` resolves with the exit code and must kill the child when `kill`
/// is cancelled. `output` runs the channel copies; an error from it means
/// the client side is done and the process is killed. Output still open one
/// drain period after exit is held by leftover members of the process group
/// led by `pid`, which are killed.
pub(crate) async fn supervise<W, O>(
    handle: ChannelHandle,
    pid: Option<u32>,
    wait: W,
    output: O,
    kill: CancellationToken,
    cancel: CancellationToken,
) where
    W: Future<Output = io::Result<u32>> + Send,
    O: Future<Output = io::Result<()>> + Send,
{
    let channel_id = handle.id();
    tokio::pin!(wait);
    tokio::pin!(output);

    let status = tokio::select! {
        status = &mut wait => {
            if tokio::time::timeout(OUTPUT_DRAIN, &mut output).await.is_err() {
                debug!(channel_id, "output still open after process exit, killing group");
                kill_process_group(pid);
            }
            status
        }
        result = &mut output => {
            if let Err(e) = result {
                debug!(channel_id, error = %e, "channel I/O ended, killing process");
                kill.cancel();
            }
            tokio::select! {
                status = &mut wait => status,
                () = cancel.cancelled() => {
                    kill.cancel();
                    wait.await
                }
            }
        }
        () = cancel.cancelled() => {
            debug!(channel_id, "session torn down, killing process");
            kill.cancel();
            wait.await
        }
    };

    let code = match status {
        Ok(code) => code,
        Err(e) => {
            warn!(channel_id, error = %e, "waiting for process failed");
            0
        }
    };
    info!(channel_id, code, "process exited");
    handle.finish(Some(code)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_from_status() {
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
    }

    #[test]
    fn test_exit_code_for_signal_is_zero() {
        // Raw wait status 9: terminated by SIGKILL.
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 0);
    }

    #[test]
    fn test_launch_spec_program_and_args() {
        let launch = LaunchSpec {
            argv: vec!["/bin/sh".into(), "-c".into(), "true".into()],
            env: Vec::new(),
            cwd: PathBuf::from("/"),
        };
        assert_eq!(launch.program(), "/bin/sh");
        assert_eq!(launch.args(), &["-c".to_string(), "true".to_string()]);

        let empty = LaunchSpec {
            argv: Vec::new(),
            ..launch
        };
        assert_eq!(empty.program(), "");
        assert!(empty.args().is_empty());
    }
}
