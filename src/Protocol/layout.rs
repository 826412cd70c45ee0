// Fixed wire header preceding every message payload.

use crate::error::ProtocolError;

/// Size of the fixed header: `u32 size; u16 flags; u16 type; u32 forkId`.
pub const HEADER_SIZE: usize = 12;

/// Set on messages carrying large payloads.
pub const BULK_FLAG: u16 = 0x1;

/// Fork id of a root (never forked) process.
pub const ROOT_FORK_ID: u32 = 0;

/// Largest frame the size field can describe, header included.
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// Size field for a frame carrying `payload_len` bytes of payload.
pub fn frame_size(payload_len: usize) -> Result<u32, ProtocolError> {
    let too_large = || ProtocolError::TooLarge {
        size: payload_len.saturating_add(HEADER_SIZE),
        max: MAX_FRAME_SIZE,
    };
    let size = payload_len.checked_add(HEADER_SIZE).ok_or_else(too_large)?;
    u32::try_from(size).map_err(|_| too_large())
}

/// Wire header, all fields little-endian.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message size, including the header.
    pub size: u32,
    pub flags: u16,
    /// Raw type tag; validated against the catalog by the decoder.
    pub kind: u16,
    /// Fork the message belongs to, 0 for the root.
    pub fork_id: u32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.size.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.flags.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.kind.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.fork_id.to_le_bytes());
        bytes
    }

    /// Parse a header, rejecting sizes smaller than the header itself.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let header = Self {
            size: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            flags: u16::from_le_bytes([bytes[4], bytes[5]]),
            kind: u16::from_le_bytes([bytes[6], bytes[7]]),
            fork_id: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        };
        if (header.size as usize) < HEADER_SIZE {
            return Err(ProtocolError::SizeTooSmall {
                size: header.size,
                header: HEADER_SIZE,
            });
        }
        Ok(header)
    }

    /// Bytes of payload following the header.
    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}
