// Memoized results of non-deterministic operations.
//
// A call id always has to produce the same output in every process of a fork
// tree, so an entry is never replaced once present.

use std::collections::HashMap;
use std::num::NonZeroU64;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::rpc::ResponseSlot;

/// Call ids are never zero; a response tagged 0 means "unavailable".
pub type ExternalCallId = NonZeroU64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalCallOutput {
    Available(Vec<u8>),
    /// Nobody upstream knows the output yet.
    Unavailable,
}

impl ExternalCallOutput {
    pub fn is_available(&self) -> bool {
        matches!(self, ExternalCallOutput::Available(_))
    }

    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            ExternalCallOutput::Available(data) => Some(data),
            ExternalCallOutput::Unavailable => None,
        }
    }
}

#[derive(Default)]
pub struct ExternalCallCache {
    entries: Mutex<HashMap<ExternalCallId, Vec<u8>>>,
}

impl ExternalCallCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ExternalCallId) -> Option<Vec<u8>> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: ExternalCallId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Add the output for `id`. Returns `false` if it was already cached,
    /// leaving the existing output in place.
    pub fn insert(&self, id: ExternalCallId, output: Vec<u8>) -> bool {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&id) {
            if *existing != output {
                warn!(id = id.get(), "Ignoring different output for cached external call");
            }
            return false;
        }
        debug!(id = id.get(), len = output.len(), "AddExternalCallOutput");
        entries.insert(id, output);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local cache plus the slot for the one request this process may have
/// outstanding.
#[derive(Default)]
pub struct ExternalCalls {
    cache: ExternalCallCache,
    responses: ResponseSlot<(Option<ExternalCallId>, Vec<u8>)>,
}

impl ExternalCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &ExternalCallCache {
        &self.cache
    }

    /// Look up `id`, asking upstream with `send` when it is not cached
    /// locally. Blocks until the response arrives.
    pub fn request<F>(&self, id: ExternalCallId, send: F) -> ExternalCallOutput
    where
        F: FnOnce(),
    {
        if let Some(output) = self.cache.get(id) {
            return ExternalCallOutput::Available(output);
        }

        let (tag, output) = self.responses.call(send);
        let tag = match tag {
            Some(tag) => tag,
            None => {
                debug!(id = id.get(), "ExternalCallUnavailable");
                return ExternalCallOutput::Unavailable;
            }
        };
        if tag != id {
            warn!(
                id = id.get(),
                tag = tag.get(),
                "External call response does not match request"
            );
        }
        self.cache.insert(id, output.clone());
        ExternalCallOutput::Available(output)
    }

    /// Deliver a response from upstream to the waiting request. `None`
    /// answers "unavailable".
    pub fn deliver_response(&self, id: Option<ExternalCallId>, output: Vec<u8>) -> bool {
        let delivered = self.responses.deliver((id, output));
        if !delivered {
            warn!(
                id = id.map_or(0, NonZeroU64::get),
                "Dropping external call response with no request waiting"
            );
        }
        delivered
    }

    pub fn is_waiting(&self) -> bool {
        self.responses.is_waiting()
    }
}
