//! Client side of an in-memory connection.
//!
//! [`connection`] returns a [`Peer`] that plays the role of the remote
//! client and the [`Connection`] the server consumes. Transport adapters
//! drive the peer from decoded packets; tests drive it directly.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use protocol::{ExitStatus, Payload, RejectReason, REQUEST_EXIT_STATUS};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::{ChannelEvent, ChannelRequest, Connection, NewChannel, CHANNEL_BUFFER};

/// A refused channel open as seen by the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("channel open failed ({reason:?}): {message}")]
pub struct OpenFailure {
    pub reason: RejectReason,
    pub message: String,
}

/// Create a connected client/server pair.
pub fn connection() -> (Peer, Connection) {
    let (channel_tx, channel_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (global_tx, global_rx) = mpsc::channel(CHANNEL_BUFFER);
    let peer = Peer {
        channels: channel_tx,
        global: global_tx,
        next_id: AtomicU32::new(0),
    };
    let conn = Connection {
        channels: channel_rx,
        global_requests: global_rx,
    };
    (peer, conn)
}

fn reply_slot(want_reply: bool) -> (Option<oneshot::Sender<bool>>, PendingReply) {
    if want_reply {
        let (tx, rx) = oneshot::channel();
        (Some(tx), PendingReply(Some(rx)))
    } else {
        (None, PendingReply(None))
    }
}

/// Client end of a connection.
#[derive(Debug)]
pub struct Peer {
    channels: mpsc::Sender<NewChannel>,
    global: mpsc::Sender<ChannelRequest>,
    next_id: AtomicU32,
}

impl Peer {
    /// Open a channel and wait for the server to accept or reject it.
    pub async fn open_channel(
        &self,
        channel_type: &str,
        payload: Bytes,
    ) -> Result<PeerChannel, OpenFailure> {
        let (tx, rx) = oneshot::channel();
        let new_channel = NewChannel {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            channel_type: channel_type.to_owned(),
            payload,
            answer: Some(tx),
        };
        // A failed send drops the notification, which answers it as abandoned.
        let _ = self.channels.send(new_channel).await;
        rx.await.unwrap_or_else(|_| {
            Err(OpenFailure {
                reason: RejectReason::ConnectFailed,
                message: "connection closed".to_owned(),
            })
        })
    }

    /// Send a connection-level request.
    pub async fn global_request(&self, name: &str, payload: Bytes, want_reply: bool) -> Option<bool> {
        let (tx, pending) = reply_slot(want_reply);
        let _ = self
            .global
            .send(ChannelRequest::new(name.to_owned(), payload, tx))
            .await;
        pending.wait().await
    }
}

/// Reply to a request that may still be in flight.
#[derive(Debug)]
pub struct PendingReply(Option<oneshot::Receiver<bool>>);

impl PendingReply {
    /// Wait for the answer. `None` when no reply was requested.
    pub async fn wait(self) -> Option<bool> {
        match self.0 {
            Some(rx) => Some(rx.await.unwrap_or(false)),
            None => None,
        }
    }
}

/// Client end of an accepted channel.
#[derive(Debug)]
pub struct PeerChannel {
    id: u32,
    events: mpsc::Receiver<ChannelEvent>,
    input: Option<mpsc::Sender<Bytes>>,
    requests: mpsc::Sender<ChannelRequest>,
}

impl PeerChannel {
    pub(super) fn new(
        id: u32,
        events: mpsc::Receiver<ChannelEvent>,
        input: mpsc::Sender<Bytes>,
        requests: mpsc::Sender<ChannelRequest>,
    ) -> Self {
        Self {
            id,
            events,
            input: Some(input),
            requests,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send data to the server. Returns `false` once the server stopped reading.
    pub async fn send(&self, data: impl Into<Bytes>) -> bool {
        match &self.input {
            Some(input) => input.send(data.into()).await.is_ok(),
            None => false,
        }
    }

    /// Signal end of input.
    pub fn send_eof(&mut self) {
        self.input = None;
    }

    /// Send a request without waiting for its reply.
    pub async fn send_request(&self, name: &str, payload: Bytes, want_reply: bool) -> PendingReply {
        let (tx, pending) = reply_slot(want_reply);
        let _ = self
            .requests
            .send(ChannelRequest::new(name.to_owned(), payload, tx))
            .await;
        pending
    }

    /// Send a request and wait for its reply.
    pub async fn request(&self, name: &str, payload: Bytes, want_reply: bool) -> Option<bool> {
        self.send_request(name, payload, want_reply).await.wait().await
    }

    /// Next event from the server, `None` once the server dropped the channel.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Collect everything the server sends until the channel closes.
    pub async fn drain(&mut self) -> Transcript {
        let mut transcript = Transcript::default();
        while let Some(event) = self.next_event().await {
            match event {
                ChannelEvent::Data(data) => transcript.stdout.extend_from_slice(&data),
                ChannelEvent::ExtendedData(data) => transcript.stderr.extend_from_slice(&data),
                ChannelEvent::Request { name, payload } => transcript.requests.push((name, payload)),
                ChannelEvent::Close => {
                    transcript.closed = true;
                    break;
                }
            }
        }
        transcript
    }
}

/// Everything received on a channel up to its close.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub requests: Vec<(String, Bytes)>,
    pub closed: bool,
}

impl Transcript {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Every `exit-status` code received, in order.
    pub fn exit_statuses(&self) -> Vec<u32> {
        self.requests
            .iter()
            .filter(|(name, _)| name == REQUEST_EXIT_STATUS)
            .filter_map(|(_, payload)| ExitStatus::decode(payload).ok())
            .map(|status| status.code)
            .collect()
    }

    /// The last reported exit status.
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_statuses().last().copied()
    }
}
