//! Byte pump between a forward channel and its TCP stream.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::{copy_to_channel, discard_requests, Channel, Stream};

/// Copy both directions until either one ends, then close the channel.
pub async fn proxy(channel: Channel, stream: TcpStream) {
    let Channel {
        handle,
        mut input,
        requests,
    } = channel;
    let channel_id = handle.id();
    let refuser = tokio::spawn(discard_requests(requests));

    let (mut read_half, mut write_half) = stream.into_split();
    let upstream = async {
        let copied = tokio::io::copy(&mut input, &mut write_half).await;
        let _ = write_half.shutdown().await;
        copied
    };
    let downstream = copy_to_channel(&mut read_half, &handle, Stream::Stdout);

    tokio::select! {
        result = upstream => debug!(channel_id, ?result, "client side of forward ended"),
        result = downstream => debug!(channel_id, ?result, "remote side of forward ended"),
    }

    handle.close().await;
    refuser.abort();
}
