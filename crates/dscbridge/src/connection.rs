//! The read-dispatch-write loop that owns the host connection.
//!
//! States: waiting for a request, dispatching it, writing the response, then
//! back to waiting. A clean end-of-stream while waiting ends the loop
//! normally; any transport or decode error ends it with that error. Either
//! way the connection is shut down exactly once on the way out.

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::FramedWrite;

use crate::bridge::{ByteOrder, FrameReader, ProtocolError, ResponseEncoder, decode_request};
use crate::dispatch::Dispatcher;

/// How a connection that ended gracefully went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub requests_served: u64,
}

/// Serves requests on `stream` until the host closes it or a fatal error
/// occurs.
///
/// Requests are handled strictly one at a time: the next request is not read
/// until the previous response has been flushed.
pub async fn serve_connection<S>(
    stream: S,
    dispatcher: &Dispatcher,
    order: ByteOrder,
) -> Result<ConnectionSummary, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, order);
    let mut writer = FramedWrite::new(write_half, ResponseEncoder::new(order));
    let mut summary = ConnectionSummary::default();

    tracing::info!(
        byte_order = %order,
        resources = dispatcher.registry().len(),
        "Serving connection"
    );
    let result = request_loop(&mut reader, &mut writer, dispatcher, &mut summary).await;

    // Every response was flushed when it was sent; whatever is left in the
    // buffer belongs to a failed write and is discarded.
    let mut write_half = writer.into_inner();
    if let Err(e) = write_half.shutdown().await {
        tracing::warn!(error = %e, "Failed to shut down connection");
    }
    tracing::info!(requests_served = summary.requests_served, "Connection closed");

    match result {
        Ok(()) => Ok(summary),
        Err(e) => {
            tracing::error!(
                error = %e,
                requests_served = summary.requests_served,
                "Connection failed"
            );
            Err(e)
        }
    }
}

async fn request_loop<S>(
    reader: &mut FrameReader<ReadHalf<S>>,
    writer: &mut FramedWrite<WriteHalf<S>, ResponseEncoder>,
    dispatcher: &Dispatcher,
    summary: &mut ConnectionSummary,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    loop {
        let Some(request) = decode_request(reader).await? else {
            tracing::debug!("Peer closed connection");
            return Ok(());
        };

        tracing::trace!(%request, "Request received");
        let response = dispatcher.dispatch(request).await;

        tracing::trace!(code = response.code(), "Writing response");
        writer.send(response).await?;
        summary.requests_served += 1;
    }
}
