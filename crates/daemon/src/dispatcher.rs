//! Channel dispatcher for an authenticated connection.
//!
//! Each channel-open notification is classified by its channel type and
//! handed to the matching handler on its own task:
//!
//! - `session`: accepted, then driven by a [`SessionController`]
//! - `direct-tcpip`: decoded and passed to the [`ForwardGuard`], which
//!   accepts only once the destination is connected
//! - anything else: rejected with `UnknownChannelType`
//!
//! Global requests are refused.

use std::sync::Arc;

use protocol::{DirectTcpip, Payload, RejectReason, CHANNEL_DIRECT_TCPIP, CHANNEL_SESSION};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{discard_requests, Connection, NewChannel};
use crate::config::ServerConfig;
use crate::forward::{ForwardError, ForwardGuard};
use crate::session::SessionController;
use crate::sftp::{ExternalSftpServer, FileTransferServer};

/// Routes the channels of one connection to their handlers.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    sftp: Arc<dyn FileTransferServer>,
}

impl Dispatcher {
    /// Dispatcher serving SFTP with the system `sftp-server`.
    pub fn new(config: ServerConfig) -> Self {
        let sftp = ExternalSftpServer::new(config.sftp.server_path.clone());
        Self {
            config: config.into_shared(),
            sftp: Arc::new(sftp),
        }
    }

    /// Replace the SFTP implementation.
    pub fn with_file_transfer_server(mut self, server: Arc<dyn FileTransferServer>) -> Self {
        self.sftp = server;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve `connection` until the client stops opening channels.
    ///
    /// Channel handlers run on their own tasks and may outlive this call.
    pub async fn serve(&self, connection: Connection) {
        let Connection {
            mut channels,
            global_requests,
        } = connection;
        let conn_id = Uuid::new_v4();
        info!(%conn_id, "connection established");

        let refuser = tokio::spawn(discard_requests(global_requests));
        while let Some(new_channel) = channels.recv().await {
            self.dispatch(new_channel);
        }
        refuser.abort();
        info!(%conn_id, "connection closed");
    }

    /// Classify one channel-open notification and start its handler.
    pub fn dispatch(&self, new_channel: NewChannel) {
        let channel_id = new_channel.id();
        let channel_type = new_channel.channel_type().to_owned();
        debug!(channel_id, %channel_type, "channel open");

        match channel_type.as_str() {
            CHANNEL_SESSION => {
                let channel = new_channel.accept();
                let controller = SessionController::new(
                    self.config.clone(),
                    self.sftp.clone(),
                    channel.handle,
                    channel.input,
                );
                tokio::spawn(controller.run(channel.requests));
            }
            CHANNEL_DIRECT_TCPIP => {
                let target = match DirectTcpip::decode(new_channel.payload()) {
                    Ok(target) => target,
                    Err(e) => {
                        let e = ForwardError::from(e);
                        warn!(channel_id, error = %e, "rejecting forward");
                        new_channel.reject(e.reject_reason(), e.to_string());
                        return;
                    }
                };
                let guard = ForwardGuard::from_config(&self.config);
                tokio::spawn(guard.handle(new_channel, target));
            }
            other => {
                let message = format!("unknown channel type: {other:?}");
                warn!(channel_id, "{}", message);
                new_channel.reject(RejectReason::UnknownChannelType, message);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
