use std::sync::Arc;

use futures::{stream::SplitStream, StreamExt};
use tokio::{net::TcpStream, sync::mpsc::UnboundedSender};
use tokio_util::codec::Framed;

use crate::communication::{
    codec::RequestCodec,
    data_plane::{DataPlaneMessage, OutstandingRequests},
    CommunicationError, RequestHandler,
};
use crate::graph::VertexId;

/// Listens on a framed TCP stream and feeds inbound requests into the
/// worker's receive path.
///
/// Each request is acknowledged back to its sender after the handler has
/// applied it, so that the sender's
/// [`wait_all_requests`](crate::communication::WorkerClient::wait_all_requests)
/// barrier implies remote visibility.
pub(crate) struct RequestReceiver<I: VertexId> {
    /// The task id of the worker the TCP stream is receiving data from.
    peer_id: usize,
    /// The stream half of the framed TCP stream for the peer connection.
    tcp_stream: SplitStream<Framed<TcpStream, RequestCodec<DataPlaneMessage<I>>>>,
    /// The worker-side receive path.
    handler: Arc<dyn RequestHandler<I>>,
    /// Channel towards this peer's sender task, used for acknowledgements.
    ack_tx: UnboundedSender<DataPlaneMessage<I>>,
    /// Accounting of this worker's own unacknowledged requests.
    outstanding: Arc<OutstandingRequests>,
}

impl<I: VertexId> RequestReceiver<I> {
    pub(crate) fn new(
        peer_id: usize,
        tcp_stream: SplitStream<Framed<TcpStream, RequestCodec<DataPlaneMessage<I>>>>,
        handler: Arc<dyn RequestHandler<I>>,
        ack_tx: UnboundedSender<DataPlaneMessage<I>>,
        outstanding: Arc<OutstandingRequests>,
    ) -> Self {
        Self {
            peer_id,
            tcp_stream,
            handler,
            ack_tx,
            outstanding,
        }
    }

    pub(crate) async fn run(&mut self) -> Result<(), CommunicationError> {
        tracing::debug!("[RequestReceiver {}] Initialized receiver.", self.peer_id);
        while let Some(msg) = self.tcp_stream.next().await {
            match msg? {
                DataPlaneMessage::Request(request) => {
                    if let Err(error) = self.handler.handle_request(request) {
                        tracing::error!(
                            "[RequestReceiver {}] Handling a request failed: {}",
                            self.peer_id,
                            error
                        );
                    }
                    // The handler has applied (or fatally rejected) the
                    // request; let the sender's barrier proceed.
                    self.ack_tx
                        .send(DataPlaneMessage::Ack)
                        .map_err(CommunicationError::from)?;
                }
                DataPlaneMessage::Ack => self.outstanding.acknowledge(),
            }
        }
        Ok(())
    }
}
