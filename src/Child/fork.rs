// Forks known to a root replaying process, and messages waiting for forks
// that have not registered yet.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use crate::Core::Monitor::Monitor;
use crate::Protocol::Channel::Channel;
use crate::Protocol::Message::Message;
use crate::Protocol::MessageType;

pub struct ForkedProcess {
    pub pid: u32,
    pub fork_id: u32,
    pub channel: Channel,
}

#[derive(Default)]
struct ForkTableState {
    processes: HashMap<u32, ForkedProcess>,
    /// Messages for forks that have not announced themselves, oldest first.
    pending: Vec<Message>,
}

/// Indexed by fork id. Only the root process populates this.
#[derive(Default)]
pub struct ForkTable {
    state: Monitor<ForkTableState>,
}

impl ForkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly registered fork and flush the messages held for it.
    ///
    /// A fork id that is already registered is replaced.
    pub fn register(&self, process: ForkedProcess) {
        let mut state = self.state.lock();
        info!(fork = process.fork_id, pid = process.pid, "ConnectedToFork");

        let fork_id = process.fork_id;
        let mut index = 0;
        while index < state.pending.len() {
            if state.pending[index].fork_id() == fork_id {
                let message = state.pending.remove(index);
                process.channel.send(message);
            } else {
                index += 1;
            }
        }

        state.processes.insert(fork_id, process);
        self.state.notify_all();
    }

    /// Send `message` to the fork it is addressed to, or hold it until that
    /// fork registers.
    ///
    /// `Terminate` and `Crash` remove the fork after sending; it is about to
    /// exit and nothing more is routed to it.
    pub fn route(&self, message: Message) {
        let mut state = self.state.lock();
        let fork_id = message.fork_id();

        let remove = matches!(message.kind(), MessageType::Terminate | MessageType::Crash);
        let process = match state.processes.get(&fork_id) {
            Some(process) => process,
            None => {
                debug!(fork = fork_id, kind = message.type_name(), "HoldForkMessage");
                state.pending.push(message);
                return;
            }
        };
        if message.kind() == MessageType::ManifestStart {
            debug!(
                fork = fork_id,
                size = message.size(),
                hash = message.hash().unwrap_or_default(),
                "SendManifestStartToForkedProcess"
            );
        }
        process.channel.send(message);

        if remove {
            state.processes.remove(&fork_id);
            info!(fork = fork_id, "RemovedFork");
        }
    }

    pub fn contains(&self, fork_id: u32) -> bool {
        self.state.lock().processes.contains_key(&fork_id)
    }

    pub fn pid_of(&self, fork_id: u32) -> Option<u32> {
        self.state.lock().processes.get(&fork_id).map(|p| p.pid)
    }

    pub fn fork_id_of_pid(&self, pid: u32) -> Option<u32> {
        self.state
            .lock()
            .processes
            .values()
            .find(|p| p.pid == pid)
            .map(|p| p.fork_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages held for `fork_id`.
    pub fn pending_for(&self, fork_id: u32) -> usize {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|m| m.fork_id() == fork_id)
            .count()
    }

    /// Block until `fork_id` registers or `deadline` passes.
    pub fn wait_for_registration(&self, fork_id: u32, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        self.state.wait_while_until(&mut state, deadline, |s| {
            !s.processes.contains_key(&fork_id)
        })
    }
}
