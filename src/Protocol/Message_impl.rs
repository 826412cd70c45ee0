use std::io::{self, Read};

use super::layout::{frame_size, MessageHeader, HEADER_SIZE};
use super::Message::{Introduction, Message, MessageType, Payload, PayloadLayout};
use crate::error::{ProtocolError, ReplayError};

impl Message {
    /// Wire header. Fails when the message is too large to frame.
    pub fn header(&self) -> Result<MessageHeader, ProtocolError> {
        Ok(MessageHeader {
            size: frame_size(self.payload.encoded_len())?,
            flags: self.flags,
            kind: self.kind.as_u16(),
            fork_id: self.fork_id,
        })
    }

    /// Encode header and payload into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = self.header()?;
        let mut out = Vec::with_capacity(header.size as usize);
        self.write_frame(header, &mut out);
        Ok(out)
    }

    /// Append the encoded message to `out`. Nothing is appended on error.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let header = self.header()?;
        self.write_frame(header, out);
        Ok(())
    }

    fn write_frame(&self, header: MessageHeader, out: &mut Vec<u8>) {
        out.extend_from_slice(&header.to_bytes());
        match &self.payload {
            Payload::Empty => {}
            Payload::Introduction(intro) => {
                out.extend_from_slice(&intro.parent_pid.to_le_bytes());
                out.extend_from_slice(&(intro.argv.len() as u32).to_le_bytes());
                for arg in &intro.argv {
                    out.extend_from_slice(arg.as_bytes());
                    out.push(0);
                }
            }
            Payload::Error(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(0);
            }
            Payload::Ping { id } => out.extend_from_slice(&id.to_le_bytes()),
            Payload::PingResponse { id, progress } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&progress.to_le_bytes());
            }
            Payload::Paint { width, height } => {
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
            }
            Payload::UpdateRecording {
                start,
                required_length,
            } => {
                out.extend_from_slice(&start.to_le_bytes());
                out.extend_from_slice(&required_length.to_le_bytes());
            }
            Payload::Binary { tag, data } => {
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }

    /// Order-sensitive fold over the encoded bytes (`h = h * 31 + b`).
    ///
    /// External tooling computes the same fold to match messages across
    /// processes and between recording and replay.
    pub fn hash(&self) -> Result<u32, ProtocolError> {
        Ok(Self::hash_encoded(&self.encode()?))
    }

    /// `hash` of a message that is already encoded.
    pub fn hash_encoded(bytes: &[u8]) -> u32 {
        bytes.iter().fold(0u32, |hash, byte| {
            (hash << 5).wrapping_sub(hash).wrapping_add(*byte as u32)
        })
    }

    /// Decode one complete frame.
    pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = MessageHeader::from_bytes(&raw)?;
        if bytes.len() != header.size as usize {
            return Err(ProtocolError::Truncated {
                expected: header.size as usize,
                actual: bytes.len(),
            });
        }
        Self::decode_payload(header, &bytes[HEADER_SIZE..])
    }

    /// Build a message from a validated header and its payload bytes.
    pub fn decode_payload(header: MessageHeader, body: &[u8]) -> Result<Message, ProtocolError> {
        let kind =
            MessageType::from_u16(header.kind).ok_or(ProtocolError::UnknownType(header.kind))?;
        let malformed = |reason| ProtocolError::MalformedPayload { kind, reason };
        let fixed = |len: usize| {
            if body.len() == len {
                Ok(())
            } else {
                Err(malformed("unexpected payload length"))
            }
        };

        let payload = match kind.layout() {
            PayloadLayout::Empty => {
                fixed(0)?;
                Payload::Empty
            }
            PayloadLayout::Introduction => {
                if body.len() < 8 {
                    return Err(malformed("missing pid or argc"));
                }
                let parent_pid = read_u32(&body[0..4]);
                let argc = read_u32(&body[4..8]) as usize;
                let mut argv = Vec::with_capacity(argc.min(body.len()));
                let mut rest = &body[8..];
                while !rest.is_empty() {
                    let end = rest
                        .iter()
                        .position(|b| *b == 0)
                        .ok_or_else(|| malformed("unterminated argument"))?;
                    let arg = std::str::from_utf8(&rest[..end])
                        .map_err(|_| malformed("argument is not UTF-8"))?;
                    argv.push(arg.to_string());
                    rest = &rest[end + 1..];
                }
                if argv.len() != argc {
                    return Err(malformed("argc does not match arguments"));
                }
                Payload::Introduction(Introduction { parent_pid, argv })
            }
            PayloadLayout::Error => match body.split_last() {
                Some((&0, text)) => Payload::Error(String::from_utf8_lossy(text).into_owned()),
                _ => return Err(malformed("unterminated error text")),
            },
            PayloadLayout::Ping => {
                fixed(4)?;
                Payload::Ping {
                    id: read_u32(&body[0..4]),
                }
            }
            PayloadLayout::PingResponse => {
                fixed(12)?;
                Payload::PingResponse {
                    id: read_u32(&body[0..4]),
                    progress: read_u64(&body[4..12]),
                }
            }
            PayloadLayout::Paint => {
                fixed(8)?;
                Payload::Paint {
                    width: read_u32(&body[0..4]),
                    height: read_u32(&body[4..8]),
                }
            }
            PayloadLayout::UpdateRecording => {
                fixed(16)?;
                Payload::UpdateRecording {
                    start: read_u64(&body[0..8]),
                    required_length: read_u64(&body[8..16]),
                }
            }
            PayloadLayout::Binary => {
                if body.len() < 8 {
                    return Err(malformed("missing tag"));
                }
                let tag = read_u64(&body[0..8]);
                let data = body[8..].to_vec();
                if kind == MessageType::SharedKeySet && tag as usize > data.len() {
                    return Err(malformed("key length exceeds payload"));
                }
                Payload::Binary { tag, data }
            }
        };

        Ok(Message {
            flags: header.flags,
            kind,
            fork_id: header.fork_id,
            payload,
        })
    }

    /// Block until a complete message has been read from `reader`.
    ///
    /// Returns `Ok(None)` on a clean end of stream between messages.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Message>, ReplayError> {
        let mut raw = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match reader.read(&mut raw[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        let header = MessageHeader::from_bytes(&raw)?;
        let mut body = vec![0u8; header.payload_len()];
        reader.read_exact(&mut body)?;
        Ok(Some(Self::decode_payload(header, &body)?))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
