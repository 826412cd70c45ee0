pub mod context;
pub mod crash;
pub mod debug;
pub mod external_call;
pub mod fork;
pub mod host;
pub mod manifest;
pub mod recording;
pub mod rpc;
pub mod shared_db;

pub use context::{ChildContext, ForkOutcome};
pub use crash::{CrashObserver, CrashReporter, Fault, FaultHandler, SignalCrashObserver};
pub use external_call::{ExternalCallCache, ExternalCallId, ExternalCallOutput, ExternalCalls};
pub use fork::{ForkTable, ForkedProcess};
pub use host::{MainThreadTask, ManifestOutput, ReplayHost, TaskQueue};
pub use manifest::ManifestQueue;
pub use recording::{ChunkOutcome, RecordingBuffer};
pub use shared_db::SharedDatabase;
