//! Channel primitives shared by every handler.
//!
//! A transport delivers each channel-open as a [`NewChannel`]. Accepting it
//! yields a [`Channel`]: a cloneable [`ChannelHandle`] for output and
//! out-of-band requests, a [`ChannelReader`] for input, and the ordered
//! stream of [`ChannelRequest`]s sent by the client.
//!
//! Closing goes through [`ChannelHandle::finish`], a single-fire barrier:
//! whichever task calls it first sends the optional `exit-status` followed
//! by the close, every later call is a no-op.

mod peer;

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use protocol::{ExitStatus, Payload, RejectReason, REQUEST_EXIT_STATUS};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use peer::{connection, OpenFailure, Peer, PeerChannel, PendingReply, Transcript};

/// Per-direction queue depth for channel traffic.
pub const CHANNEL_BUFFER: usize = 64;

/// Read size used when pumping a byte stream into a channel.
const COPY_CHUNK: usize = 32 * 1024;

/// Errors raised when writing to a channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed locally or the peer went away.
    #[error("channel {0} is closed")]
    Closed(u32),
}

impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        io::Error::new(io::ErrorKind::BrokenPipe, err)
    }
}

/// Traffic sent from the server to the client on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Primary stream data.
    Data(Bytes),
    /// Secondary ("stderr") stream data.
    ExtendedData(Bytes),
    /// Out-of-band request; server-initiated requests never want a reply.
    Request { name: String, payload: Bytes },
    /// The channel is closed. Always the last event.
    Close,
}

/// Output stream selector for [`copy_to_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

struct HandleInner {
    events: mpsc::Sender<ChannelEvent>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

/// Cloneable write half of a channel.
#[derive(Clone)]
pub struct ChannelHandle {
    id: u32,
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChannelHandle {
    fn new(id: u32, events: mpsc::Sender<ChannelEvent>) -> Self {
        Self {
            id,
            inner: Arc::new(HandleInner {
                events,
                closed: AtomicBool::new(false),
                close_token: CancellationToken::new(),
            }),
        }
    }

    /// Channel identifier, unique within its connection.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether [`finish`](Self::finish) has fired.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        self.inner.close_token.cancelled().await
    }

    async fn send(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.id));
        }
        self.send_raw(event).await
    }

    async fn send_raw(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        self.inner
            .events
            .send(event)
            .await
            .map_err(|_| ChannelError::Closed(self.id))
    }

    /// Write to the primary stream.
    pub async fn data(&self, bytes: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.send(ChannelEvent::Data(bytes.into())).await
    }

    /// Write to the secondary stream.
    pub async fn extended_data(&self, bytes: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.send(ChannelEvent::ExtendedData(bytes.into())).await
    }

    /// Send an out-of-band request that expects no reply.
    pub async fn send_request(&self, name: &str, payload: Bytes) -> Result<(), ChannelError> {
        self.send(ChannelEvent::Request {
            name: name.to_owned(),
            payload,
        })
        .await
    }

    /// Close the channel without reporting an exit status.
    pub async fn close(&self) -> bool {
        self.finish(None).await
    }

    /// Single-fire close barrier.
    ///
    /// The first caller sends `exit-status` (when given) and then the close,
    /// and gets `true`. Every other caller gets `false` and sends nothing.
    pub async fn finish(&self, exit_status: Option<u32>) -> bool {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Some(code) = exit_status {
            let payload = ExitStatus { code }.encode();
            if let Err(e) = self
                .send_raw(ChannelEvent::Request {
                    name: REQUEST_EXIT_STATUS.to_owned(),
                    payload,
                })
                .await
            {
                tracing::debug!(channel_id = self.id, error = %e, "exit-status not delivered");
            }
        }
        let _ = self.send_raw(ChannelEvent::Close).await;
        self.inner.close_token.cancel();
        true
    }
}

/// Read half of a channel.
///
/// Implements [`AsyncRead`]; end of input (client EOF) reads as zero bytes.
#[derive(Debug)]
pub struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }

    /// Next chunk of input as sent by the client, or `None` at EOF.
    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        self.rx.recv().await
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        while self.pending.is_empty() {
            match ready!(self.rx.poll_recv(cx)) {
                Some(chunk) => self.pending = chunk,
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(self.pending.len());
        let chunk = self.pending.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

/// An out-of-band request received on a channel or connection.
///
/// Dropping a request that wanted a reply without calling
/// [`reply`](Self::reply) answers it with failure.
#[derive(Debug)]
pub struct ChannelRequest {
    pub name: String,
    pub want_reply: bool,
    pub payload: Bytes,
    reply: Option<oneshot::Sender<bool>>,
}

impl ChannelRequest {
    /// Build a request; `reply` is present when the sender wants an answer.
    pub fn new(
        name: String,
        payload: Bytes,
        reply: Option<oneshot::Sender<bool>>,
    ) -> Self {
        Self {
            name,
            want_reply: reply.is_some(),
            payload,
            reply,
        }
    }

    /// Answer the request. Only the first call has any effect.
    pub fn reply(&mut self, ok: bool) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(ok);
        }
    }
}

impl Drop for ChannelRequest {
    fn drop(&mut self) {
        self.reply(false);
    }
}

/// An accepted channel.
#[derive(Debug)]
pub struct Channel {
    pub handle: ChannelHandle,
    pub input: ChannelReader,
    pub requests: mpsc::Receiver<ChannelRequest>,
}

/// A channel-open notification awaiting accept or reject.
#[derive(Debug)]
pub struct NewChannel {
    id: u32,
    channel_type: String,
    payload: Bytes,
    answer: Option<oneshot::Sender<Result<PeerChannel, OpenFailure>>>,
}

impl NewChannel {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Channel type string, e.g. `session`.
    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    /// Type-specific channel-open payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Accept the channel.
    pub fn accept(mut self) -> Channel {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_BUFFER);

        let peer = PeerChannel::new(self.id, event_rx, input_tx, request_tx);
        if let Some(answer) = self.answer.take() {
            let _ = answer.send(Ok(peer));
        }

        Channel {
            handle: ChannelHandle::new(self.id, event_tx),
            input: ChannelReader::new(input_rx),
            requests: request_rx,
        }
    }

    /// Refuse the channel with an RFC4254 reason code and message.
    pub fn reject(mut self, reason: RejectReason, message: impl Into<String>) {
        if let Some(answer) = self.answer.take() {
            let _ = answer.send(Err(OpenFailure {
                reason,
                message: message.into(),
            }));
        }
    }
}

impl Drop for NewChannel {
    fn drop(&mut self) {
        if let Some(answer) = self.answer.take() {
            let _ = answer.send(Err(OpenFailure {
                reason: RejectReason::ResourceShortage,
                message: "channel open abandoned".to_owned(),
            }));
        }
    }
}

/// Incoming side of one authenticated connection.
#[derive(Debug)]
pub struct Connection {
    pub channels: mpsc::Receiver<NewChannel>,
    pub global_requests: mpsc::Receiver<ChannelRequest>,
}

/// Copy `reader` into the channel until EOF, returning the bytes copied.
pub async fn copy_to_channel<R>(
    mut reader: R,
    handle: &ChannelHandle,
    stream: Stream,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        match stream {
            Stream::Stdout => handle.data(chunk).await?,
            Stream::Stderr => handle.extended_data(chunk).await?,
        }
        total += n as u64;
    }
}

/// Refuse every request arriving on `rx` until the sender is gone.
pub async fn discard_requests(mut rx: mpsc::Receiver<ChannelRequest>) {
    while let Some(mut request) = rx.recv().await {
        tracing::debug!(request = %request.name, "refusing request");
        request.reply(false);
    }
}
