// Append-only recording contents with out-of-order chunk reassembly.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ReplayError, Result};
use crate::Core::Monitor::Monitor;

#[derive(Default)]
struct RecordingState {
    contents: Vec<u8>,
    /// Chunks that start past the end of `contents`, in arrival order.
    deferred: Vec<(u64, Vec<u8>)>,
    /// Prefix of `contents` already handed to the recorder.
    consumed: usize,
}

/// What happened to an incoming chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk touched the frontier; `length` is the new contiguous length.
    Applied { length: usize },
    /// The chunk starts past the frontier and was held back.
    Deferred,
}

/// The recording bytes a process has received.
///
/// Bytes are never modified once present, so offsets into the buffer stay
/// valid for the life of the process. Only the gap-free prefix is visible.
#[derive(Default)]
pub struct RecordingBuffer {
    state: Monitor<RecordingState>,
}

/// Merge a chunk into `contents` if it starts at or before the frontier.
fn incorporate(contents: &mut Vec<u8>, offset: u64, data: &[u8]) -> bool {
    let length = contents.len() as u64;
    if offset > length {
        return false;
    }
    let extent = offset + data.len() as u64;
    if extent > length {
        let fresh = (extent - length) as usize;
        contents.extend_from_slice(&data[data.len() - fresh..]);
    }
    true
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add recording bytes that start at `offset`.
    ///
    /// Bytes already present are left untouched. A chunk past the frontier
    /// is deferred and retried whenever the frontier advances.
    pub fn add_chunk(&self, offset: u64, data: Vec<u8>) -> ChunkOutcome {
        let mut state = self.state.lock();
        debug!(offset, len = data.len(), "NewRecordingData");

        if !incorporate(&mut state.contents, offset, &data) {
            debug!(offset, "DeferRecordingData");
            state.deferred.push((offset, data));
            return ChunkOutcome::Deferred;
        }

        let state = &mut *state;
        loop {
            let before = state.deferred.len();
            let contents = &mut state.contents;
            state.deferred.retain(|(offset, data)| {
                if incorporate(contents, *offset, data) {
                    debug!(length = contents.len(), "AddDeferredRecordingData");
                    false
                } else {
                    true
                }
            });
            if state.deferred.len() == before {
                break;
            }
        }

        let length = state.contents.len();
        self.state.notify_all();
        ChunkOutcome::Applied { length }
    }

    /// Append bytes at the current end.
    pub fn append(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        state.contents.extend_from_slice(data);
        let length = state.contents.len();
        self.state.notify_all();
        length
    }

    /// Length of the contiguous prefix.
    pub fn len(&self) -> usize {
        self.state.lock().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deferred_chunks(&self) -> usize {
        self.state.lock().deferred.len()
    }

    /// Block until at least `length` bytes are present. There is no timeout.
    pub fn wait_for_length(&self, length: usize) {
        let mut state = self.state.lock();
        while state.contents.len() < length {
            debug!(
                have = state.contents.len(),
                need = length,
                "EnsureRecordingLength waiting"
            );
            self.state.wait(&mut state);
        }
        debug!(length = state.contents.len(), "EnsureRecordingLength done");
    }

    /// Copy of `start..end`. The range must already be present.
    pub fn range(&self, start: usize, end: usize) -> Vec<u8> {
        let state = self.state.lock();
        let end = end.min(state.contents.len());
        let start = start.min(end);
        state.contents[start..end].to_vec()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.state.lock().contents.clone()
    }

    /// Bytes received but not yet handed to the recorder.
    ///
    /// When nothing new has arrived, `require_more` makes this an
    /// end-of-recording error; otherwise it blocks until more bytes arrive.
    pub fn take_pending(&self, require_more: bool) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.consumed == state.contents.len() {
            if require_more {
                return Err(ReplayError::EndOfRecording {
                    length: state.contents.len(),
                });
            }
            self.state
                .wait_while(&mut state, |s| s.consumed == s.contents.len());
        }
        let pending = state.contents[state.consumed..].to_vec();
        state.consumed = state.contents.len();
        Ok(pending)
    }

    /// Write the whole buffer to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let state = self.state.lock();
        fs::write(path, &state.contents)?;
        Ok(())
    }

    /// Append the contents of the file at `path`.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        let data = fs::read(path)?;
        Ok(self.append(&data))
    }
}
