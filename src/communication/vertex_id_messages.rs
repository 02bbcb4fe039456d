use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::communication::{CommunicationError, Serializable};

/// A packed batch of (destination vertex id, message) pairs, both already
/// serialized.
///
/// Each entry is framed as two NetworkEndian `u32` lengths followed by
/// the id bytes and the message bytes. Keeping the payloads serialized
/// lets the receiving message store copy raw bytes instead of
/// deserializing and reserializing each message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexIdMessages {
    count: u32,
    buffer: Vec<u8>,
}

impl VertexIdMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch with space reserved for `capacity` payload bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            count: 0,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Appends an already-serialized entry.
    pub fn add_encoded(&mut self, id_bytes: &[u8], msg_bytes: &[u8]) {
        // The write into a Vec cannot fail.
        self.buffer
            .write_u32::<NetworkEndian>(id_bytes.len() as u32)
            .unwrap();
        self.buffer
            .write_u32::<NetworkEndian>(msg_bytes.len() as u32)
            .unwrap();
        self.buffer.extend_from_slice(id_bytes);
        self.buffer.extend_from_slice(msg_bytes);
        self.count += 1;
    }

    /// Serializes and appends one entry.
    pub fn add<I, M>(&mut self, id: &I, message: &M) -> Result<(), CommunicationError>
    where
        I: Serialize,
        M: Serialize,
    {
        let id_bytes = id.encode()?;
        let msg_bytes = message.encode()?;
        self.add_encoded(&id_bytes, &msg_bytes);
        Ok(())
    }

    /// The number of entries in this batch.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The accumulated payload size in bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates over the serialized (id, message) entries in insertion
    /// order.
    pub fn iter(&self) -> VertexIdMessagesIter<'_> {
        VertexIdMessagesIter {
            buffer: &self.buffer,
            pos: 0,
        }
    }
}

/// Iterator over the serialized entries of a [`VertexIdMessages`] batch.
pub struct VertexIdMessagesIter<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for VertexIdMessagesIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<(&'a [u8], &'a [u8])> {
        if self.pos + 8 > self.buffer.len() {
            return None;
        }
        let id_len = NetworkEndian::read_u32(&self.buffer[self.pos..self.pos + 4]) as usize;
        let msg_len = NetworkEndian::read_u32(&self.buffer[self.pos + 4..self.pos + 8]) as usize;
        let id_start = self.pos + 8;
        let msg_start = id_start + id_len;
        let end = msg_start + msg_len;
        if end > self.buffer.len() {
            return None;
        }
        self.pos = end;
        Some((
            &self.buffer[id_start..msg_start],
            &self.buffer[msg_start..end],
        ))
    }
}
