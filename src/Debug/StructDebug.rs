use std::fmt;

use crate::Child::{ChildContext, ForkTable, ForkedProcess, RecordingBuffer};
use crate::Protocol::Channel::Channel;

/// Debug function for ChildContext
///
/// Shows the process role and fork identity plus a summary of each resource,
/// without waiting on any of them.
pub fn debug_child_context(ctx: &ChildContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChildContext")
        .field("role", &ctx.config().role)
        .field("channel_id", &ctx.config().channel_id)
        .field("fork_id", &ctx.fork_id())
        .field("connected", &ctx.channel().map(|c| c.is_connected()))
        .field("recording", &ctx.recording())
        .field("processing_manifest", &ctx.manifests().is_processing())
        .field("pending_manifests", &ctx.manifests().pending())
        .field("cached_calls", &ctx.external_calls().cache().len())
        .field("forks", &ctx.forks())
        .field("fork_lock_readers", &ctx.fork_lock().readers())
        .finish_non_exhaustive()
}

/// Debug function for RecordingBuffer
///
/// Shows:
/// - Contiguous length
/// - Number of chunks waiting for a gap to fill
pub fn debug_recording_buffer(buffer: &RecordingBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecordingBuffer")
        .field("len", &buffer.len())
        .field("deferred", &buffer.deferred_chunks())
        .finish()
}

pub fn debug_fork_table(table: &ForkTable, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ForkTable")
        .field("registered", &table.len())
        .finish_non_exhaustive()
}

pub fn debug_forked_process(process: &ForkedProcess, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ForkedProcess")
        .field("pid", &process.pid)
        .field("fork_id", &process.fork_id)
        .field("channel", &process.channel)
        .finish()
}

/// Debug function for Channel
///
/// Reports the connection state; queued bytes are not shown.
pub fn debug_channel(channel: &Channel, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Channel")
        .field("id", &channel.id())
        .field("kind", &channel.kind())
        .field("connected", &channel.is_connected())
        .field("closed", &channel.is_closed())
        .field("messages_sent", &channel.messages_sent())
        .finish()
}
