pub mod Channel;
pub mod Message;
pub mod Message_impl;
pub mod builder;
pub mod layout;

pub use builder::ChannelBuilder;
pub use layout::{frame_size, MessageHeader, BULK_FLAG, HEADER_SIZE, MAX_FRAME_SIZE, ROOT_FORK_ID};
pub use Channel::{ChannelKind, DisconnectHook, MessageHandler};
pub use Message::{Direction, Introduction, MessageType, Payload, PayloadLayout};
