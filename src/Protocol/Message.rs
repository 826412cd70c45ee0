// Messages exchanged between a middleman, its recording/replaying children,
// and the forks of a root replaying process.

use std::num::NonZeroU64;

use super::layout::{BULK_FLAG, HEADER_SIZE};

/// Closed catalog of message types. The discriminant is the wire tag.
///
/// Tags are interpreted by external tooling as well, so existing values must
/// not be renumbered. 9 belonged to a retired message and stays unused.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Sent by the middleman at startup.
    Introduction = 0,
    /// An error occurred and the session cannot continue.
    CriticalError = 1,

    // Middleman to child.
    /// Liveness probe; answered with the child's progress counter.
    Ping = 2,
    /// Exit normally.
    Terminate = 3,
    /// Force a hung process to crash and produce diagnostics.
    Crash = 4,
    /// Ask a recording process for an artificial checkpoint.
    CreateCheckpoint = 5,
    /// Unpause the child and run a manifest.
    ManifestStart = 6,
    /// Answer to an ExternalCallRequest; also fills root caches from forks.
    ExternalCallResponse = 7,
    /// Load the recording from the offline store.
    FetchCloudRecordingData = 8,
    /// Turn on local logging.
    EnableLogging = 10,

    // Child to middleman.
    /// Pause after a manifest, carrying its result.
    ManifestFinished = 11,
    PingResponse = 12,
    /// Execution needs data that cannot be replayed deterministically.
    UnhandledDivergence = 13,
    /// The child crashed and now waits to be terminated.
    FatalError = 14,
    /// Graphics were repainted.
    Paint = 15,
    /// Get the result of an external call.
    ExternalCallRequest = 16,
    /// A fork asking its root for more recording data.
    UpdateRecordingFromRoot = 17,
    /// Scan data for the root to decode.
    ScanData = 18,

    // Both directions.
    /// Recording bytes at an offset.
    RecordingData = 19,
    /// Text to print on the other side.
    LogText = 20,
    /// Set a key in the root's shared database.
    SharedKeySet = 21,
    /// Request a key from the root's shared database.
    SharedKeyRequest = 22,
    /// Answer to SharedKeyRequest.
    SharedKeyResponse = 23,
}

/// Shape of the payload that follows the header for a given type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadLayout {
    Empty,
    Introduction,
    /// NUL-terminated UTF-8 text.
    Error,
    Ping,
    PingResponse,
    Paint,
    UpdateRecording,
    /// `u64` tag followed by opaque bytes.
    Binary,
}

/// Direction of a send, relative to the child process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    ToChild,
    FromChild,
}

impl MessageType {
    pub const ALL: [MessageType; 23] = [
        MessageType::Introduction,
        MessageType::CriticalError,
        MessageType::Ping,
        MessageType::Terminate,
        MessageType::Crash,
        MessageType::CreateCheckpoint,
        MessageType::ManifestStart,
        MessageType::ExternalCallResponse,
        MessageType::FetchCloudRecordingData,
        MessageType::EnableLogging,
        MessageType::ManifestFinished,
        MessageType::PingResponse,
        MessageType::UnhandledDivergence,
        MessageType::FatalError,
        MessageType::Paint,
        MessageType::ExternalCallRequest,
        MessageType::UpdateRecordingFromRoot,
        MessageType::ScanData,
        MessageType::RecordingData,
        MessageType::LogText,
        MessageType::SharedKeySet,
        MessageType::SharedKeyRequest,
        MessageType::SharedKeyResponse,
    ];

    pub fn from_u16(tag: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| *kind as u16 == tag)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Introduction => "Introduction",
            Self::CriticalError => "CriticalError",
            Self::Ping => "Ping",
            Self::Terminate => "Terminate",
            Self::Crash => "Crash",
            Self::CreateCheckpoint => "CreateCheckpoint",
            Self::ManifestStart => "ManifestStart",
            Self::ExternalCallResponse => "ExternalCallResponse",
            Self::FetchCloudRecordingData => "FetchCloudRecordingData",
            Self::EnableLogging => "EnableLogging",
            Self::ManifestFinished => "ManifestFinished",
            Self::PingResponse => "PingResponse",
            Self::UnhandledDivergence => "UnhandledDivergence",
            Self::FatalError => "FatalError",
            Self::Paint => "Paint",
            Self::ExternalCallRequest => "ExternalCallRequest",
            Self::UpdateRecordingFromRoot => "UpdateRecordingFromRoot",
            Self::ScanData => "ScanData",
            Self::RecordingData => "RecordingData",
            Self::LogText => "LogText",
            Self::SharedKeySet => "SharedKeySet",
            Self::SharedKeyRequest => "SharedKeyRequest",
            Self::SharedKeyResponse => "SharedKeyResponse",
        }
    }

    pub fn layout(self) -> PayloadLayout {
        match self {
            Self::Introduction => PayloadLayout::Introduction,
            Self::CriticalError | Self::FatalError => PayloadLayout::Error,
            Self::Ping => PayloadLayout::Ping,
            Self::PingResponse => PayloadLayout::PingResponse,
            Self::Paint => PayloadLayout::Paint,
            Self::UpdateRecordingFromRoot => PayloadLayout::UpdateRecording,
            Self::Terminate
            | Self::Crash
            | Self::CreateCheckpoint
            | Self::FetchCloudRecordingData
            | Self::EnableLogging
            | Self::UnhandledDivergence => PayloadLayout::Empty,
            Self::ManifestStart
            | Self::ManifestFinished
            | Self::ExternalCallRequest
            | Self::ExternalCallResponse
            | Self::ScanData
            | Self::RecordingData
            | Self::LogText
            | Self::SharedKeySet
            | Self::SharedKeyRequest
            | Self::SharedKeyResponse => PayloadLayout::Binary,
        }
    }

    /// Types allowed to cross the channel regardless of the child's pause
    /// state. A hung main thread may hold the fork lock, so termination and
    /// liveness probes cannot wait for a pause.
    pub fn is_urgent(self) -> bool {
        matches!(self, Self::Terminate | Self::Crash | Self::Ping)
    }

    /// Whether a message of this type may be sent in `direction` while the
    /// child is (or is not) paused.
    ///
    /// Children send only while unpaused and middlemen only while the child
    /// is paused, so nothing is lost when a child rewinds. Callers enforce
    /// this; the channel does not.
    pub fn may_send(self, direction: Direction, child_paused: bool) -> bool {
        if self.is_urgent() {
            return true;
        }
        match direction {
            Direction::FromChild => !child_paused,
            Direction::ToChild => child_paused,
        }
    }
}

/// Startup arguments the middleman hands to a child.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Introduction {
    /// Pid of the process that launched the middleman.
    pub parent_pid: u32,
    pub argv: Vec<String>,
}

impl Introduction {
    pub fn argc(&self) -> usize {
        self.argv.len()
    }
}

/// Decoded payload of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Introduction(Introduction),
    Error(String),
    Ping { id: u32 },
    PingResponse { id: u32, progress: u64 },
    Paint { width: u32, height: u32 },
    UpdateRecording { start: u64, required_length: u64 },
    /// The tag's meaning depends on the type: external call id, recording
    /// offset, shared key length, or unused.
    Binary { tag: u64, data: Vec<u8> },
}

impl Payload {
    pub fn layout(&self) -> PayloadLayout {
        match self {
            Payload::Empty => PayloadLayout::Empty,
            Payload::Introduction(_) => PayloadLayout::Introduction,
            Payload::Error(_) => PayloadLayout::Error,
            Payload::Ping { .. } => PayloadLayout::Ping,
            Payload::PingResponse { .. } => PayloadLayout::PingResponse,
            Payload::Paint { .. } => PayloadLayout::Paint,
            Payload::UpdateRecording { .. } => PayloadLayout::UpdateRecording,
            Payload::Binary { .. } => PayloadLayout::Binary,
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Introduction(intro) => {
                8 + intro.argv.iter().map(|arg| arg.len() + 1).sum::<usize>()
            }
            Payload::Error(text) => text.len() + 1,
            Payload::Ping { .. } => 4,
            Payload::PingResponse { .. } => 12,
            Payload::Paint { .. } => 8,
            Payload::UpdateRecording { .. } => 16,
            Payload::Binary { data, .. } => 8 + data.len(),
        }
    }
}

/// A single framed message.
///
/// Immutable once built, apart from its flag bits. The payload is owned by
/// the message until the message is handed to a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub(crate) flags: u16,
    pub(crate) kind: MessageType,
    pub(crate) fork_id: u32,
    pub(crate) payload: Payload,
}

impl Message {
    fn new(kind: MessageType, fork_id: u32, payload: Payload) -> Self {
        assert_eq!(
            kind.layout(),
            payload.layout(),
            "payload does not fit message type {}",
            kind.name()
        );
        Self {
            flags: 0,
            kind,
            fork_id,
            payload,
        }
    }

    /// Message with an empty payload. `kind` must have the empty layout.
    pub fn empty(kind: MessageType, fork_id: u32) -> Self {
        Self::new(kind, fork_id, Payload::Empty)
    }

    /// Tag + bytes message. `kind` must have the binary layout.
    pub fn binary(kind: MessageType, fork_id: u32, tag: u64, data: Vec<u8>) -> Self {
        Self::new(kind, fork_id, Payload::Binary { tag, data })
    }

    pub fn introduction(parent_pid: u32, argv: Vec<String>) -> Self {
        Self::new(
            MessageType::Introduction,
            0,
            Payload::Introduction(Introduction { parent_pid, argv }),
        )
    }

    pub fn terminate(fork_id: u32) -> Self {
        Self::empty(MessageType::Terminate, fork_id)
    }

    pub fn crash(fork_id: u32) -> Self {
        Self::empty(MessageType::Crash, fork_id)
    }

    pub fn create_checkpoint(fork_id: u32) -> Self {
        Self::empty(MessageType::CreateCheckpoint, fork_id)
    }

    pub fn fetch_recording_data(fork_id: u32) -> Self {
        Self::empty(MessageType::FetchCloudRecordingData, fork_id)
    }

    pub fn enable_logging(fork_id: u32) -> Self {
        Self::empty(MessageType::EnableLogging, fork_id)
    }

    pub fn unhandled_divergence(fork_id: u32) -> Self {
        Self::empty(MessageType::UnhandledDivergence, fork_id)
    }

    pub fn fatal_error(fork_id: u32, text: impl Into<String>) -> Self {
        Self::new(MessageType::FatalError, fork_id, Payload::Error(text.into()))
    }

    pub fn critical_error(fork_id: u32, text: impl Into<String>) -> Self {
        Self::new(
            MessageType::CriticalError,
            fork_id,
            Payload::Error(text.into()),
        )
    }

    pub fn ping(fork_id: u32, id: u32) -> Self {
        Self::new(MessageType::Ping, fork_id, Payload::Ping { id })
    }

    pub fn ping_response(fork_id: u32, id: u32, progress: u64) -> Self {
        Self::new(
            MessageType::PingResponse,
            fork_id,
            Payload::PingResponse { id, progress },
        )
    }

    pub fn paint(width: u32, height: u32) -> Self {
        Self::new(MessageType::Paint, 0, Payload::Paint { width, height })
    }

    pub fn update_recording_from_root(fork_id: u32, start: u64, required_length: u64) -> Self {
        Self::new(
            MessageType::UpdateRecordingFromRoot,
            fork_id,
            Payload::UpdateRecording {
                start,
                required_length,
            },
        )
    }

    pub fn manifest_start(fork_id: u32, manifest: Vec<u8>) -> Self {
        Self::binary(MessageType::ManifestStart, fork_id, 0, manifest)
    }

    pub fn manifest_finished(fork_id: u32, response: Vec<u8>) -> Self {
        Self::binary(MessageType::ManifestFinished, fork_id, 0, response)
    }

    pub fn external_call_request(fork_id: u32, call_id: NonZeroU64, input: Vec<u8>) -> Self {
        Self::binary(MessageType::ExternalCallRequest, fork_id, call_id.get(), input)
    }

    /// Zero is left free for `external_call_unavailable`.
    pub fn external_call_response(fork_id: u32, call_id: NonZeroU64, output: Vec<u8>) -> Self {
        Self::binary(
            MessageType::ExternalCallResponse,
            fork_id,
            call_id.get(),
            output,
        )
    }

    /// Response telling the requester the output is not known.
    pub fn external_call_unavailable(fork_id: u32) -> Self {
        Self::binary(MessageType::ExternalCallResponse, fork_id, 0, Vec::new())
    }

    pub fn recording_data(fork_id: u32, offset: u64, data: Vec<u8>) -> Self {
        Self::binary(MessageType::RecordingData, fork_id, offset, data)
    }

    pub fn scan_data(fork_id: u32, data: Vec<u8>) -> Self {
        Self::binary(MessageType::ScanData, fork_id, 0, data)
    }

    pub fn log_text(fork_id: u32, text: &str) -> Self {
        Self::binary(MessageType::LogText, fork_id, 0, text.as_bytes().to_vec())
    }

    /// Key and value are sent back to back; the tag is the key length.
    pub fn shared_key_set(fork_id: u32, key: &str, value: &str) -> Self {
        let mut data = Vec::with_capacity(key.len() + value.len());
        data.extend_from_slice(key.as_bytes());
        data.extend_from_slice(value.as_bytes());
        Self::binary(MessageType::SharedKeySet, fork_id, key.len() as u64, data)
    }

    pub fn shared_key_request(fork_id: u32, key: &str) -> Self {
        Self::binary(
            MessageType::SharedKeyRequest,
            fork_id,
            0,
            key.as_bytes().to_vec(),
        )
    }

    pub fn shared_key_response(fork_id: u32, value: &str) -> Self {
        Self::binary(
            MessageType::SharedKeyResponse,
            fork_id,
            0,
            value.as_bytes().to_vec(),
        )
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn fork_id(&self) -> u32 {
        self.fork_id
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Total encoded size, header included.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.encoded_len()
    }

    pub fn set_bulk(&mut self) {
        self.flags |= BULK_FLAG;
    }

    pub fn is_bulk(&self) -> bool {
        self.flags & BULK_FLAG != 0
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn tag(&self) -> Option<u64> {
        match &self.payload {
            Payload::Binary { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    pub fn binary_data(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Binary { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_binary(self) -> Option<(u64, Vec<u8>)> {
        match self.payload {
            Payload::Binary { tag, data } => Some((tag, data)),
            _ => None,
        }
    }

    pub fn introduction_args(&self) -> Option<&Introduction> {
        match &self.payload {
            Payload::Introduction(intro) => Some(intro),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Error(text) => Some(text),
            _ => None,
        }
    }

    /// Key and value of a SharedKeySet message.
    pub fn shared_key_entry(&self) -> Option<(&[u8], &[u8])> {
        if self.kind != MessageType::SharedKeySet {
            return None;
        }
        let (tag, data) = match &self.payload {
            Payload::Binary { tag, data } => (*tag as usize, data.as_slice()),
            _ => return None,
        };
        if tag > data.len() {
            return None;
        }
        Some(data.split_at(tag))
    }
}
