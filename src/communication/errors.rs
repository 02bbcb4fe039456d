use std::io;

use tokio::sync::mpsc;

use crate::TaskId;

/// Error raised by the communication layer.
#[derive(Debug)]
pub enum CommunicationError {
    /// The channel or the TCP stream has been closed.
    Disconnected,
    /// No connection exists for the addressed worker.
    UnknownWorker(TaskId),
    /// Failed to serialize/deserialize data with Bincode.
    BincodeError(bincode::Error),
    /// Failed to read/write data from/to the TCP stream.
    IoError(io::Error),
}

impl From<bincode::Error> for CommunicationError {
    fn from(e: bincode::Error) -> Self {
        CommunicationError::BincodeError(e)
    }
}

impl From<io::Error> for CommunicationError {
    fn from(e: io::Error) -> Self {
        CommunicationError::IoError(e)
    }
}

impl<T> From<mpsc::error::SendError<T>> for CommunicationError {
    fn from(_e: mpsc::error::SendError<T>) -> Self {
        CommunicationError::Disconnected
    }
}

impl From<CodecError> for CommunicationError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::IoError(e) => CommunicationError::IoError(e),
            CodecError::BincodeError(e) => CommunicationError::BincodeError(e),
        }
    }
}

/// Error that is raised by the [`RequestCodec`](crate::communication::RequestCodec)
/// when requests cannot be encoded or decoded.
#[derive(Debug)]
pub enum CodecError {
    IoError(io::Error),
    /// Bincode serialization/deserialization error. Raised when a request
    /// body cannot be encoded or decoded.
    BincodeError(bincode::Error),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> CodecError {
        CodecError::IoError(e)
    }
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::BincodeError(e)
    }
}
