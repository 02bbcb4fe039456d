//! The TCP data plane: a mesh of framed streams connecting every worker
//! pair, with per-peer sender and receiver tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedSender},
    time::sleep,
};
use tokio_util::codec::Framed;

use crate::communication::{
    codec::RequestCodec, receivers::RequestReceiver, senders::RequestSender,
    CommunicationError, RequestHandler, WorkerClient, WorkerRequest,
};
use crate::graph::VertexId;
use crate::TaskId;

/// A frame exchanged on a data-plane connection: either an application
/// request or the acknowledgement of one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum DataPlaneMessage<I> {
    Request(WorkerRequest<I>),
    Ack,
}

/// Counts requests that have been sent but not yet acknowledged by their
/// receiver.
pub(crate) struct OutstandingRequests {
    count: Mutex<u64>,
    all_done: Condvar,
}

impl OutstandingRequests {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    pub(crate) fn register(&self) {
        *self.count.lock().unwrap() += 1;
    }

    pub(crate) fn acknowledge(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.all_done.notify_all();
        }
    }

    pub(crate) fn wait_zero(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.all_done.wait(count).unwrap();
        }
    }
}

/// A [`WorkerClient`] backed by the TCP data plane.
///
/// Requests addressed to the local worker are applied in place; all
/// others are queued towards the per-peer sender task.
pub struct TcpWorkerClient<I: VertexId> {
    task_id: TaskId,
    handler: Arc<dyn RequestHandler<I>>,
    channels: HashMap<TaskId, UnboundedSender<DataPlaneMessage<I>>>,
    outstanding: Arc<OutstandingRequests>,
}

impl<I: VertexId> WorkerClient<I> for TcpWorkerClient<I> {
    fn send_request(
        &self,
        task_id: TaskId,
        request: WorkerRequest<I>,
    ) -> Result<(), CommunicationError> {
        if task_id == self.task_id {
            // Local delivery does not involve the network; handler errors
            // are recorded by the worker itself.
            if let Err(error) = self.handler.handle_request(request) {
                tracing::error!(
                    "[TcpWorkerClient {}] Handling a local request failed: {}",
                    self.task_id,
                    error
                );
            }
            return Ok(());
        }
        let channel = self
            .channels
            .get(&task_id)
            .ok_or(CommunicationError::UnknownWorker(task_id))?;
        self.outstanding.register();
        channel
            .send(DataPlaneMessage::Request(request))
            .map_err(CommunicationError::from)
    }

    fn wait_all_requests(&self) {
        self.outstanding.wait_zero();
    }
}

/// Connects this worker to every other worker in `addresses` and spawns
/// the sender/receiver tasks of the data plane.
///
/// `addresses` is indexed by task id; the entry at `task_id` is the
/// address this worker listens on. Must be called from within a tokio
/// runtime.
pub async fn connect_workers<I: VertexId>(
    task_id: TaskId,
    addresses: Vec<SocketAddr>,
    handler: Arc<dyn RequestHandler<I>>,
) -> Result<TcpWorkerClient<I>, CommunicationError> {
    let streams = create_tcp_streams(addresses, task_id).await?;
    let outstanding = Arc::new(OutstandingRequests::new());
    let mut channels = HashMap::new();

    for (peer_id, stream) in streams {
        let framed = Framed::new(stream, RequestCodec::<DataPlaneMessage<I>>::new());
        let (tcp_sink, tcp_stream) = framed.split();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let mut sender = RequestSender::new(peer_id, tcp_sink, request_rx);
        tokio::spawn(async move {
            if let Err(error) = sender.run().await {
                tracing::error!("[RequestSender {}] Failed: {:?}", peer_id, error);
            }
        });

        let mut receiver = RequestReceiver::new(
            peer_id,
            tcp_stream,
            Arc::clone(&handler),
            request_tx.clone(),
            Arc::clone(&outstanding),
        );
        tokio::spawn(async move {
            if let Err(error) = receiver.run().await {
                tracing::error!("[RequestReceiver {}] Failed: {:?}", peer_id, error);
            }
        });

        channels.insert(peer_id, request_tx);
    }

    Ok(TcpWorkerClient {
        task_id,
        handler,
        channels,
        outstanding,
    })
}

/// Returns a TCP stream for each worker pair involving this worker.
///
/// The function connects to all workers with a lower task id, and awaits
/// connections from the workers with a higher task id.
async fn create_tcp_streams(
    addresses: Vec<SocketAddr>,
    task_id: TaskId,
) -> Result<Vec<(TaskId, TcpStream)>, CommunicationError> {
    let my_address = addresses[task_id];
    let connect_fut = connect_to_workers(addresses[..task_id].to_vec(), task_id);
    let await_fut = await_worker_connections(my_address, addresses.len() - task_id - 1);
    let (mut streams, awaited) = future::try_join(connect_fut, await_fut).await?;
    streams.extend(awaited);
    Ok(streams)
}

/// Connects to all given addresses and sends this worker's task id.
async fn connect_to_workers(
    addresses: Vec<SocketAddr>,
    task_id: TaskId,
) -> Result<Vec<(TaskId, TcpStream)>, CommunicationError> {
    let mut connect_futures = Vec::new();
    for address in addresses.iter() {
        connect_futures.push(connect_to_worker(address, task_id));
    }
    let streams = future::try_join_all(connect_futures).await?;
    Ok((0..streams.len()).zip(streams).collect())
}

/// Creates a TCP connection to an address and writes this worker's task
/// id on the stream. Keeps retrying until it connects successfully.
async fn connect_to_worker(
    address: &SocketAddr,
    task_id: TaskId,
) -> Result<TcpStream, CommunicationError> {
    let mut last_err_msg_time = Instant::now();
    loop {
        match TcpStream::connect(address).await {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                // Send the task id so that the listener knows which worker
                // initiated the connection.
                let mut buffer: Vec<u8> = Vec::new();
                WriteBytesExt::write_u32::<NetworkEndian>(&mut buffer, task_id as u32)?;
                stream.write_all(&buffer).await?;
                return Ok(stream);
            }
            Err(error) => {
                // Only log connection errors every 1s.
                let now = Instant::now();
                if now.duration_since(last_err_msg_time) >= Duration::from_secs(1) {
                    tracing::error!(
                        "Worker {}: could not connect to {}; error {}; retrying",
                        task_id,
                        address,
                        error
                    );
                    last_err_msg_time = now;
                }
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Awaits connections from `expected_conns` other workers, reading the
/// initiating worker's task id from each stream.
async fn await_worker_connections(
    address: SocketAddr,
    expected_conns: usize,
) -> Result<Vec<(TaskId, TcpStream)>, CommunicationError> {
    let mut await_futures = Vec::new();
    let listener = TcpListener::bind(&address).await?;
    for _ in 0..expected_conns {
        let (stream, _) = listener.accept().await?;
        stream.set_nodelay(true)?;
        await_futures.push(read_task_id(stream));
    }
    future::try_join_all(await_futures).await
}

/// Reads a task id from a TCP stream.
async fn read_task_id(mut stream: TcpStream) -> Result<(TaskId, TcpStream), CommunicationError> {
    let mut buffer = [0u8; 4];
    stream.read_exact(&mut buffer).await?;
    let task_id = NetworkEndian::read_u32(&buffer);
    Ok((task_id as TaskId, stream))
}
