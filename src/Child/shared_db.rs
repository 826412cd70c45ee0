// String key-value store held by the root process of a fork tree.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::rpc::ResponseSlot;

/// The root's map, plus the response slot a fork blocks on while asking the
/// root for a key.
#[derive(Default)]
pub struct SharedDatabase {
    entries: Mutex<HashMap<String, String>>,
    responses: ResponseSlot<String>,
}

impl SharedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn set(&self, key: String, value: String) {
        debug!(%key, "SharedKeySet");
        self.entries.lock().insert(key, value);
    }

    /// Value for `key`, or the empty string if it was never set.
    pub fn get(&self, key: &str) -> String {
        self.entries.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask the root for a value with `send` and block for the answer.
    pub fn request<F>(&self, send: F) -> String
    where
        F: FnOnce(),
    {
        self.responses.call(send)
    }

    pub fn deliver_response(&self, value: String) -> bool {
        let delivered = self.responses.deliver(value);
        if !delivered {
            warn!("Dropping shared key response with no request waiting");
        }
        delivered
    }
}
