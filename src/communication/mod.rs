//! Abstractions for communication between the workers of a cluster.
//!
//! The worker core only assumes a reliable unicast channel with
//! asynchronous fire-and-forget sends and a blocking
//! [`wait_all_requests`](WorkerClient::wait_all_requests) barrier. Two
//! implementations are provided: a TCP [data plane](crate::communication::data_plane)
//! that connects every worker pair with a framed stream, and an
//! [in-process network](crate::communication::local) for workers sharing
//! one process.

use serde::{Deserialize, Serialize};

use crate::errors::WorkerError;
use crate::graph::{PartitionId, VertexId};
use crate::{TaskId, WorkerId};

// Private submodules
mod serializable;
mod vertex_id_messages;

// Crate-wide visible submodules
pub(crate) mod codec;
pub(crate) mod receivers;
pub(crate) mod senders;

// Public submodules
pub mod data_plane;
pub mod errors;
pub mod local;

// Re-export structs as if they were defined here.
pub use codec::RequestCodec;
pub use errors::{CodecError, CommunicationError};
pub use serializable::{Deserializable, Serializable};
pub use vertex_id_messages::VertexIdMessages;

/// The flag bit of a 32-bit wire partition id marking a message destined
/// for the next computation phase.
const NEXT_PHASE_FLAG: u32 = 1 << 31;

/// Encodes a partition id and the next-phase flag into one 32-bit field.
pub fn encode_phase(partition_id: PartitionId, for_next_phase: bool) -> u32 {
    if for_next_phase {
        partition_id | NEXT_PHASE_FLAG
    } else {
        partition_id
    }
}

/// Splits a 32-bit wire partition id into the partition id and the
/// next-phase flag.
pub fn decode_phase(raw: u32) -> (PartitionId, bool) {
    (raw & !NEXT_PHASE_FLAG, raw & NEXT_PHASE_FLAG != 0)
}

/// A request exchanged between workers.
///
/// The bit layout is an implementation detail of the codec, but must stay
/// stable within a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRequest<I> {
    /// A batch of messages, grouped by destination partition. The
    /// partition id field carries the next-phase flag in its high bit.
    SendWorkerMessages(Vec<(u32, VertexIdMessages)>),
    /// A dining-philosophers token (fork request) between two boundary
    /// vertices.
    SendToken { sender: I, receiver: I },
    /// A dining-philosophers fork between two boundary vertices.
    SendFork { sender: I, receiver: I },
    /// The global token moving along the worker ring.
    SendGlobalToken {
        sender: WorkerId,
        receiver: WorkerId,
    },
    /// A dining-philosophers token between two partitions.
    SendPartitionToken {
        sender: PartitionId,
        receiver: PartitionId,
    },
    /// A dining-philosophers fork between two partitions.
    SendPartitionFork {
        sender: PartitionId,
        receiver: PartitionId,
    },
}

/// The client half of the transport: sends requests to other workers.
///
/// `send_request` is asynchronous fire-and-forget; `wait_all_requests`
/// blocks until every outstanding request has been acknowledged by its
/// receiver.
pub trait WorkerClient<I: VertexId>: Send + Sync {
    /// Queues a request for delivery to the worker with the given task id.
    /// Requests addressed to the local worker are handled in place.
    fn send_request(&self, task_id: TaskId, request: WorkerRequest<I>)
        -> Result<(), CommunicationError>;

    /// Blocks until every request sent so far has been acknowledged.
    fn wait_all_requests(&self);
}

/// The server half of the transport: the worker-side receive path.
pub trait RequestHandler<I: VertexId>: Send + Sync {
    /// Handles one inbound request. Errors are fatal to the receiving
    /// worker's task.
    fn handle_request(&self, request: WorkerRequest<I>) -> Result<(), WorkerError>;
}
