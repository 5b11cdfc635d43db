//! Session channels.
//!
//! A session channel carries a sequence of requests (`pty-req`, `env`,
//! `shell`, `exec`, `subsystem`, `window-change`) that the
//! [`SessionController`] applies to a [`SessionState`] until one of them
//! starts the process or transfer that owns the channel.

pub mod controller;
pub mod error;
pub mod pty;
pub mod state;

pub use controller::SessionController;
pub use error::{ErrorKind, SessionError};
pub use pty::PtyPair;
pub use state::{Phase, SessionState};
