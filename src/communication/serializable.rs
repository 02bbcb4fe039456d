use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

use crate::communication::CommunicationError;

/// Trait automatically implemented for all values that derive `Serialize`.
pub trait Serializable {
    fn encode(&self) -> Result<BytesMut, CommunicationError>;
    fn encode_into(&self, buffer: &mut BytesMut) -> Result<(), CommunicationError>;
    fn serialized_size(&self) -> Result<usize, CommunicationError>;
}

impl<D> Serializable for D
where
    D: Serialize,
{
    fn encode(&self) -> Result<BytesMut, CommunicationError> {
        let serialized = bincode::serialize(self).map_err(CommunicationError::from)?;
        Ok(BytesMut::from(&serialized[..]))
    }

    fn encode_into(&self, buffer: &mut BytesMut) -> Result<(), CommunicationError> {
        let mut writer = buffer.writer();
        bincode::serialize_into(&mut writer, self).map_err(CommunicationError::from)
    }

    fn serialized_size(&self) -> Result<usize, CommunicationError> {
        bincode::serialized_size(self)
            .map(|x| x as usize)
            .map_err(CommunicationError::from)
    }
}

/// Trait automatically implemented for all values that derive
/// `Deserialize`.
pub trait Deserializable: Sized {
    fn decode(buf: &[u8]) -> Result<Self, CommunicationError>;
}

impl<D> Deserializable for D
where
    D: DeserializeOwned,
{
    fn decode(buf: &[u8]) -> Result<D, CommunicationError> {
        bincode::deserialize(buf).map_err(CommunicationError::from)
    }
}
