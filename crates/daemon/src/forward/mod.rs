//! `direct-tcpip` channels.
//!
//! A forward is authorized before the channel is accepted: the destination
//! is resolved, checked against the [`ForwardPolicy`] and dialed. Only a
//! connected stream turns into an accepted channel; every failure becomes a
//! channel-open rejection with the matching reason code.

pub mod policy;
mod proxy;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use protocol::{DirectTcpip, ProtocolError, RejectReason};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::channel::NewChannel;
use crate::config::ServerConfig;

pub use policy::ForwardPolicy;
pub use proxy::proxy;

/// Reasons a forward is refused.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("error parsing forward data: {0}")]
    Parse(#[from] ProtocolError),

    #[error("port forwarding is disabled")]
    Disabled,

    #[error("forwarding to {addr} is not permitted by policy {policy}")]
    Denied { addr: IpAddr, policy: ForwardPolicy },

    #[error("no addresses found for {0}")]
    Unresolvable(String),

    #[error("resolving {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {0} timed out")]
    DialTimeout(SocketAddr),
}

impl ForwardError {
    /// Channel-open failure code reported to the client.
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            Self::Disabled | Self::Denied { .. } => RejectReason::AdministrativelyProhibited,
            _ => RejectReason::ConnectFailed,
        }
    }
}

/// Authorizes and dials forward destinations.
#[derive(Debug, Clone, Copy)]
pub struct ForwardGuard {
    policy: ForwardPolicy,
    dial_timeout: Duration,
}

impl ForwardGuard {
    pub fn new(policy: ForwardPolicy, dial_timeout: Duration) -> Self {
        Self {
            policy,
            dial_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.forward_policy, config.dial_timeout)
    }

    pub fn policy(&self) -> ForwardPolicy {
        self.policy
    }

    /// Resolve the destination and check it against the policy.
    ///
    /// A disabled policy refuses before any name lookup.
    pub async fn authorize(&self, target: &DirectTcpip) -> Result<SocketAddr, ForwardError> {
        if self.policy == ForwardPolicy::Disabled {
            return Err(ForwardError::Disabled);
        }

        let addr = match target.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, target.port),
            Err(_) => tokio::net::lookup_host((target.host.as_str(), target.port))
                .await
                .map_err(|source| ForwardError::Resolve {
                    host: target.host.clone(),
                    source,
                })?
                .next()
                .ok_or_else(|| ForwardError::Unresolvable(target.host.clone()))?,
        };

        if !self.policy.permits(addr.ip()) {
            return Err(ForwardError::Denied {
                addr: addr.ip(),
                policy: self.policy,
            });
        }
        Ok(addr)
    }

    /// Authorize, then connect within the dial timeout.
    pub async fn dial(&self, target: &DirectTcpip) -> Result<TcpStream, ForwardError> {
        let addr = self.authorize(target).await?;
        match tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ForwardError::Dial { addr, source }),
            Err(_) => Err(ForwardError::DialTimeout(addr)),
        }
    }

    /// Answer a `direct-tcpip` open and proxy it until either side is done.
    pub async fn handle(self, new_channel: NewChannel, target: DirectTcpip) {
        let channel_id = new_channel.id();
        let stream = match self.dial(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    channel_id,
                    host = %target.host,
                    port = target.port,
                    originator = %format!("{}:{}", target.originator_host, target.originator_port),
                    error = %e,
                    "forward refused"
                );
                new_channel.reject(e.reject_reason(), e.to_string());
                return;
            }
        };

        info!(channel_id, host = %target.host, port = target.port, "forward established");
        proxy(new_channel.accept(), stream).await;
        info!(channel_id, "forward finished");
    }
}
