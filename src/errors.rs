use std::{fmt, io};

use crate::communication::{CodecError, CommunicationError};

/// Error raised by the worker core.
///
/// All variants are fatal to the running task: the engine never retries on
/// its own, and message redelivery is the transport's responsibility.
#[derive(Debug)]
pub enum WorkerError {
    /// The byte buffer of a single destination vertex exceeded the
    /// configured capacity.
    PayloadTooLarge {
        /// Debug rendering of the destination vertex id.
        vertex: String,
        /// The capacity that was exceeded.
        capacity: usize,
    },
    /// An underlying byte buffer could not be read or written.
    StoreIO(io::Error),
    /// A blocking wait was interrupted, which indicates a programming
    /// error (a sibling thread panicked while holding shared state).
    Interrupted,
    /// A philosopher was registered twice, which indicates a corrupt
    /// partitioning of the graph.
    DuplicateNeighbour(u64),
    /// The requested combination of configuration options is not
    /// supported.
    UnsupportedConfig(String),
    /// The communication layer failed.
    Communication(CommunicationError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkerError::PayloadTooLarge { vertex, capacity } => write!(
                f,
                "the number of bytes sent to vertex {} exceeded the buffer capacity \
                 of {} bytes; consider raising vertex_buffer_capacity to remove \
                 the limit for super-vertices that receive very many messages",
                vertex, capacity
            ),
            WorkerError::StoreIO(e) => write!(f, "message store I/O fault: {}", e),
            WorkerError::Interrupted => write!(f, "blocking wait was interrupted"),
            WorkerError::DuplicateNeighbour(id) => write!(
                f,
                "philosopher {} registered twice; the graph partitioning is corrupt",
                id
            ),
            WorkerError::UnsupportedConfig(msg) => {
                write!(f, "unsupported configuration: {}", msg)
            }
            WorkerError::Communication(e) => write!(f, "communication failed: {:?}", e),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<CommunicationError> for WorkerError {
    fn from(e: CommunicationError) -> Self {
        WorkerError::Communication(e)
    }
}

impl From<CodecError> for WorkerError {
    fn from(e: CodecError) -> Self {
        WorkerError::Communication(CommunicationError::from(e))
    }
}

impl From<bincode::Error> for WorkerError {
    fn from(e: bincode::Error) -> Self {
        WorkerError::StoreIO(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl From<io::Error> for WorkerError {
    fn from(e: io::Error) -> Self {
        WorkerError::StoreIO(e)
    }
}
