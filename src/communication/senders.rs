use futures::stream::SplitSink;
use futures_util::sink::SinkExt;
use tokio::{net::TcpStream, sync::mpsc::UnboundedReceiver};
use tokio_util::codec::Framed;

use crate::communication::{
    codec::RequestCodec, data_plane::DataPlaneMessage, CommunicationError,
};
use crate::graph::VertexId;

/// The [`RequestSender`] pulls requests from a FIFO inter-thread channel
/// and forwards them on the framed TCP stream of one peer worker. One
/// sender services all compute threads addressing that peer.
pub(crate) struct RequestSender<I: VertexId> {
    /// The task id of the worker the TCP stream is sending data to.
    peer_id: usize,
    /// The sink half of the framed TCP stream for the peer connection.
    tcp_sink: SplitSink<Framed<TcpStream, RequestCodec<DataPlaneMessage<I>>>, DataPlaneMessage<I>>,
    /// MPSC channel on which outbound requests and acknowledgements are
    /// received from the rest of the worker.
    request_rx: UnboundedReceiver<DataPlaneMessage<I>>,
}

impl<I: VertexId> RequestSender<I> {
    pub(crate) fn new(
        peer_id: usize,
        tcp_sink: SplitSink<
            Framed<TcpStream, RequestCodec<DataPlaneMessage<I>>>,
            DataPlaneMessage<I>,
        >,
        request_rx: UnboundedReceiver<DataPlaneMessage<I>>,
    ) -> Self {
        Self {
            peer_id,
            tcp_sink,
            request_rx,
        }
    }

    pub(crate) async fn run(&mut self) -> Result<(), CommunicationError> {
        tracing::debug!("[RequestSender {}] Initialized sender.", self.peer_id);
        loop {
            match self.request_rx.recv().await {
                Some(msg) => {
                    self.tcp_sink
                        .send(msg)
                        .await
                        .map_err(CommunicationError::from)?;
                }
                None => return Err(CommunicationError::Disconnected),
            }
        }
    }
}
