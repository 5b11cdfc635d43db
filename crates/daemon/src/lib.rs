//! # Hatch Daemon Library
//!
//! The channel-handling core of Hatch, a debug-access shell server for
//! ephemeral appliances. It takes over once a client connection has been
//! authenticated and provides:
//!
//! - **Sessions**: interactive shells and commands, with or without a PTY
//! - **File Upload**: `scp -t` uploads carrying tar archives, plus SFTP
//!   with automatic unpacking of uploaded `.tar` files
//! - **Forwarding**: `direct-tcpip` channels restricted by policy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Authenticated Connection                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                  Channel Dispatcher                        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │          │ session                         │ direct-tcpip       │
//! │  ┌──────────────────────┐        ┌──────────────────────────┐   │
//! │  │  Session Controller  │        │      Forward Guard       │   │
//! │  └──────────────────────┘        └──────────────────────────┘   │
//! │     │ exec      │ scp       │ sftp                              │
//! │  ┌─────────┐ ┌──────────┐ ┌─────────────┐                       │
//! │  │ Process │ │ SCP Sink │ │ SFTP Bridge │                       │
//! │  │ Runner  │ └──────────┘ └─────────────┘                       │
//! │  └─────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{channel, Config, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     daemon::logging::init(&config.server.log_level);
//!
//!     // The transport layer feeds authenticated connections in here.
//!     let (_peer, connection) = channel::connection();
//!     Dispatcher::new(config.resolve()?).serve(connection).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Channel handles shared by every handler
//! - [`config`]: Configuration loading and defaults
//! - [`dispatcher`]: Channel-open classification
//! - [`session`]: Session request state machine
//! - [`process`]: Process launch in pipe or PTY mode
//! - [`scp`]: SCP sink
//! - [`sftp`]: SFTP subsystem bridge
//! - [`files`]: Tar extraction
//! - [`forward`]: `direct-tcpip` policy and proxying
//! - [`logging`]: Tracing subscriber setup

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod files;
pub mod forward;
pub mod logging;
pub mod process;
pub mod scp;
pub mod session;
pub mod sftp;

pub use config::{Config, ConfigError, ServerConfig};
pub use dispatcher::Dispatcher;
pub use forward::{ForwardError, ForwardGuard, ForwardPolicy};
pub use scp::{ScpError, ScpSink};
pub use session::{SessionController, SessionError};
pub use sftp::{ExternalSftpServer, FileTransferServer, SftpBridge, SftpError};
