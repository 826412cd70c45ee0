use super::*;
use crate::Protocol::Channel::Channel;
use std::fmt;

// Debug proxy implementations that call the standalone debug functions
impl fmt::Debug for ChildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_child_context(self, f)
    }
}

impl fmt::Debug for RecordingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_recording_buffer(self, f)
    }
}

impl fmt::Debug for ForkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_fork_table(self, f)
    }
}

impl fmt::Debug for ForkedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_forked_process(self, f)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_channel(self, f)
    }
}
