//! Per-channel request loop for `session` channels.
//!
//! Requests are handled strictly in arrival order. `pty-req` and `env`
//! only shape session state; `shell`, `exec` and `subsystem` start the
//! single activity that owns the channel's input. A fatal error fails the
//! request, writes the error text to the client and closes the channel.
//! When the loop ends, everything it started is cancelled and awaited.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{EnvVar, ExecCommand, PtyRequest, SessionRequest, SubsystemRequest, WindowChange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{Phase, PtyPair, SessionError, SessionState};
use crate::channel::{ChannelHandle, ChannelReader, ChannelRequest};
use crate::config::ServerConfig;
use crate::process::{self, launch_argv, launch_env, resolve_shell, LaunchSpec};
use crate::scp::ScpSink;
use crate::sftp::{FileTransferServer, SftpBridge};

/// Command line used for a `shell` request.
pub const LOGIN_COMMAND: &str = "sh";

/// Subsystem name served by the SFTP bridge.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// Drives one session channel from accept to teardown.
pub struct SessionController {
    config: Arc<ServerConfig>,
    sftp: Arc<dyn FileTransferServer>,
    handle: ChannelHandle,
    input: Option<ChannelReader>,
    state: SessionState,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SessionController {
    pub fn new(
        config: Arc<ServerConfig>,
        sftp: Arc<dyn FileTransferServer>,
        handle: ChannelHandle,
        input: ChannelReader,
    ) -> Self {
        Self {
            config,
            sftp,
            handle,
            input: Some(input),
            state: SessionState::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Process requests until the client stops sending them or the channel
    /// closes, then tear the session down.
    pub async fn run(mut self, mut requests: mpsc::Receiver<ChannelRequest>) {
        let channel_id = self.handle.id();
        self.state.advance(Phase::ReceivingRequests);

        loop {
            let mut request = tokio::select! {
                biased;
                () = self.handle.closed() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            match self.handle_request(&request.name, request.payload.clone()).await {
                Ok(()) => request.reply(true),
                Err(e) if e.is_fatal() => {
                    warn!(channel_id, kind = ?e.kind(), "request({:?}): {}", request.name, e);
                    let message = e.client_message();
                    request.reply(false);
                    let _ = self.handle.data(Bytes::from(message)).await;
                    self.handle.close().await;
                    break;
                }
                Err(e) => {
                    warn!(channel_id, kind = ?e.kind(), "request({:?}): {}", request.name, e);
                    request.reply(false);
                }
            }
        }

        info!(channel_id, "requests exhausted");
        self.state.advance(Phase::Closed);
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!(channel_id, "session torn down");
    }

    async fn handle_request(&mut self, name: &str, payload: Bytes) -> Result<(), SessionError> {
        let request = SessionRequest::decode(name, &payload).map_err(|source| SessionError::Protocol {
            request: name.to_string(),
            source,
        })?;

        match request {
            SessionRequest::PtyReq(req) => self.allocate_pty(&req),
            SessionRequest::WindowChange(change) => self.resize(&change),
            SessionRequest::Env(EnvVar { name, value }) => {
                debug!(channel_id = self.handle.id(), %name, "env");
                self.state.push_env(name, value);
                Ok(())
            }
            SessionRequest::Shell => {
                if let Some(banner) = &self.config.banner {
                    self.handle.extended_data(Bytes::from(banner.clone())).await?;
                }
                self.exec(LOGIN_COMMAND).await
            }
            SessionRequest::Exec(ExecCommand { command }) => self.exec(&command).await,
            SessionRequest::Subsystem(SubsystemRequest { name }) => self.subsystem(&name),
            SessionRequest::Unsupported(name) => Err(SessionError::UnsupportedRequest(name)),
        }
    }

    fn allocate_pty(&mut self, req: &PtyRequest) -> Result<(), SessionError> {
        if self.state.has_pty() {
            return Err(SessionError::PtyAlreadyAllocated);
        }
        let pty = PtyPair::open(req)?;
        info!(
            channel_id = self.handle.id(),
            term = %req.term,
            cols = req.cols,
            rows = req.rows,
            "PTY allocated"
        );
        self.state.attach_pty(pty)
    }

    fn resize(&mut self, change: &WindowChange) -> Result<(), SessionError> {
        self.state.require_pty()?.resize(change)
    }

    fn take_input(&mut self) -> Result<ChannelReader, SessionError> {
        self.input.take().ok_or(SessionError::InputInUse)
    }

    async fn exec(&mut self, command: &str) -> Result<(), SessionError> {
        let words = match shlex::split(command) {
            Some(words) if !words.is_empty() => words,
            _ => return Err(SessionError::InvalidCommand(command.to_string())),
        };

        if words[0] == "scp" {
            let input = self.take_input()?;
            self.state.advance(Phase::Running);
            let sink = ScpSink::new(self.handle.clone(), &self.config.working_dir);
            sink.run(input, &words[1..]).await?;
            return Ok(());
        }

        let shell = resolve_shell(&self.config.shell.fallback_shell);
        let working_dir = self.config.working_dir.clone();
        let launch = LaunchSpec {
            argv: launch_argv(shell.as_deref(), command, words),
            env: launch_env(
                self.state.env(),
                &working_dir,
                &self.config.shell,
                self.state.pty().map(PtyPair::term),
            ),
            cwd: working_dir,
        };
        info!(channel_id = self.handle.id(), "Starting cmd {:?}", launch.argv);

        let input = self.take_input()?;
        let cancel = self.cancel.child_token();
        let supervision = match self.state.pty_mut() {
            Some(pty) => process::terminal::spawn(&launch, pty, self.handle.clone(), input, cancel)?,
            None => process::piped::spawn(&launch, self.handle.clone(), input, cancel)?,
        };
        self.state.advance(Phase::Running);
        self.tasks.spawn(supervision);
        Ok(())
    }

    fn subsystem(&mut self, name: &str) -> Result<(), SessionError> {
        if name != SFTP_SUBSYSTEM {
            return Err(SessionError::UnsupportedSubsystem(name.to_string()));
        }
        let input = self.take_input()?;
        self.state.advance(Phase::Running);
        info!(channel_id = self.handle.id(), dir = %self.config.working_dir.display(), "sftp subsystem started");

        let bridge = SftpBridge::new(self.sftp.clone(), self.config.clone(), self.handle.clone());
        self.tasks.spawn(bridge.run(input, self.cancel.child_token()));
        Ok(())
    }
}
