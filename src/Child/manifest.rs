// Single-in-flight manifest execution backed by a FIFO of waiting manifests.

use std::collections::VecDeque;

use tracing::debug;

use crate::Core::Monitor::Monitor;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Vec<u8>>,
    processing: bool,
}

/// `Idle -> Processing -> Idle`, one manifest at a time, in arrival order.
///
/// The queue only does the bookkeeping. Whoever receives a manifest back from
/// `push` or `finish` owns starting it.
#[derive(Default)]
pub struct ManifestQueue {
    state: Monitor<QueueState>,
}

impl ManifestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an incoming manifest. Returns it back if the queue was idle,
    /// in which case it is now processing and must be started.
    pub fn push(&self, manifest: Vec<u8>) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        debug!(pending = state.pending.len(), "ManifestQueued");
        state.pending.push_back(manifest);
        Self::next(&mut state)
    }

    /// Mark the processing manifest as finished. Returns the next manifest
    /// to start, if one is waiting.
    pub fn finish(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        state.processing = false;
        let next = Self::next(&mut state);
        self.state.notify_all();
        next
    }

    fn next(state: &mut QueueState) -> Option<Vec<u8>> {
        if state.processing {
            return None;
        }
        let manifest = state.pending.pop_front()?;
        state.processing = true;
        Some(manifest)
    }

    /// Drop waiting manifests. Used in a new fork, where they were meant for
    /// the process it was forked from.
    pub fn clear_pending(&self) {
        self.state.lock().pending.clear();
    }

    pub fn is_processing(&self) -> bool {
        self.state.lock().processing
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Block until no manifest is processing or waiting.
    pub fn wait_until_idle(&self) {
        let mut state = self.state.lock();
        self.state
            .wait_while(&mut state, |s| s.processing || !s.pending.is_empty());
    }
}
