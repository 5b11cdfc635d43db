//! Per-channel session state.

use super::pty::PtyPair;
use super::SessionError;

/// Lifecycle of a session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Accepted, no request seen yet.
    Created,
    /// Processing requests; nothing launched.
    ReceivingRequests,
    /// A command, transfer or subsystem owns the channel input.
    Running,
    /// Channel closed; no further requests are processed.
    Closed,
}

/// Environment and terminal accumulated from a channel's requests.
#[derive(Debug)]
pub struct SessionState {
    env: Vec<(String, String)>,
    pty: Option<PtyPair>,
    phase: Phase,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            env: Vec::new(),
            pty: None,
            phase: Phase::Created,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move forward to `phase`. Phases never go backwards.
    pub fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "session phase");
            self.phase = phase;
        }
    }

    /// Append an environment entry. Duplicates are kept in order.
    pub fn push_env(&mut self, name: String, value: String) {
        self.env.push((name, value));
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Store a freshly opened PTY.
    pub fn attach_pty(&mut self, pty: PtyPair) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Err(SessionError::PtyAlreadyAllocated);
        }
        self.pty = Some(pty);
        Ok(())
    }

    pub fn has_pty(&self) -> bool {
        self.pty.is_some()
    }

    pub fn pty(&self) -> Option<&PtyPair> {
        self.pty.as_ref()
    }

    pub fn pty_mut(&mut self) -> Option<&mut PtyPair> {
        self.pty.as_mut()
    }

    /// The allocated PTY, or [`SessionError::NoPty`].
    pub fn require_pty(&mut self) -> Result<&mut PtyPair, SessionError> {
        self.pty.as_mut().ok_or(SessionError::NoPty)
    }
}
