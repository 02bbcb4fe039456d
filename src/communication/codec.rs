use std::marker::PhantomData;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::communication::CodecError;

const HEADER_SIZE: usize = 4;

#[derive(Debug)]
enum DecodeStatus {
    Header,
    Payload { payload_size: usize },
}

/// Encodes requests into bytes, and decodes bytes into requests.
///
/// For each request, the codec first writes the size of the serialized
/// request, and then the request itself.
#[derive(Debug)]
pub struct RequestCodec<T> {
    /// Current part of the frame to decode.
    status: DecodeStatus,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RequestCodec<T> {
    pub fn new() -> Self {
        Self {
            status: DecodeStatus::Header,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for RequestCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for RequestCodec<T> {
    type Item = T;
    type Error = CodecError;

    /// Decodes a sequence of bytes into a request.
    ///
    /// Reads the header, reserves memory for the full frame to avoid
    /// repeated allocations, and then decodes the payload.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
        match self.status {
            DecodeStatus::Header => {
                if buf.len() >= HEADER_SIZE {
                    let header = buf.split_to(HEADER_SIZE);
                    let payload_size = NetworkEndian::read_u32(&header[..]) as usize;
                    self.status = DecodeStatus::Payload { payload_size };
                    // Reserve space for the rest of the frame and the next
                    // header.
                    buf.reserve(payload_size + HEADER_SIZE);
                    self.decode(buf)
                } else {
                    Ok(None)
                }
            }
            DecodeStatus::Payload { payload_size } => {
                if buf.len() >= payload_size {
                    let payload = buf.split_to(payload_size);
                    let request = bincode::deserialize(&payload).map_err(CodecError::from)?;
                    self.status = DecodeStatus::Header;
                    Ok(Some(request))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for RequestCodec<T> {
    type Error = CodecError;

    /// Encodes a request into a buffer, writing the payload size first.
    fn encode(&mut self, request: T, buf: &mut BytesMut) -> Result<(), CodecError> {
        let payload_size = bincode::serialized_size(&request).map_err(CodecError::from)?;
        buf.reserve(HEADER_SIZE + payload_size as usize);

        // Serialize directly into the buffer.
        let mut writer = buf.writer();
        writer.write_u32::<NetworkEndian>(payload_size as u32)?;
        bincode::serialize_into(&mut writer, &request).map_err(CodecError::from)
    }
}
