pub mod Monitor;
pub mod SharedMemory;
pub mod Socket;
pub mod SpinLock;
pub mod futex;

pub use SharedMemory::{create_anonymous_memory, AnonymousMemory, SharedMemoryBackend, Sharing};
pub use SpinLock::{ReadGuard, ReadWriteSpinLock, WriteGuard};
