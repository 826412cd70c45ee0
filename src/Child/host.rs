// Interface to the program embedding a recording or replaying child.

use std::collections::VecDeque;
use std::thread;

use super::context::ChildContext;
use crate::Core::Monitor::Monitor;

/// Work handed to the process's main thread.
pub type MainThreadTask = Box<dyn FnOnce() + Send>;

/// Result of running one manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestOutput {
    pub data: Vec<u8>,
    /// Mark the finished message as carrying a large payload.
    pub bulk: bool,
}

impl ManifestOutput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            bulk: false,
        }
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            bulk: true,
        }
    }
}

/// Services the embedding program provides to the control plane.
///
/// The deterministic recorder, script hooks and graphics live behind this
/// trait; the control plane only calls into them.
pub trait ReplayHost: Send + Sync {
    /// Run `task` on the main thread, after whatever it is doing now.
    fn dispatch_to_main_thread(&self, task: MainThreadTask);

    /// Execute a manifest on the main thread.
    fn run_manifest(&self, ctx: &ChildContext, manifest: &[u8]) -> ManifestOutput;

    fn is_main_thread(&self) -> bool;

    /// Monotonic progress counter reported in ping responses.
    fn execution_progress(&self) -> u64 {
        0
    }

    /// Take an artificial checkpoint. Only called in recording processes.
    fn create_checkpoint(&self) {}

    /// Scan data forwarded to the root by one of its forks.
    fn add_scan_data(&self, _data: Vec<u8>) {}

    /// Exit the process without running destructors.
    fn terminate(&self) {
        unsafe { libc::_exit(0) }
    }

    /// Block the calling thread until the process is terminated.
    fn wait_forever(&self) {
        loop {
            thread::park();
        }
    }
}

/// FIFO of main thread tasks, for hosts whose main thread runs an event loop.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Monitor<VecDeque<MainThreadTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: MainThreadTask) {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        self.tasks.notify_all();
    }

    /// Block until a task is available and run it.
    pub fn run_one(&self) {
        let task = {
            let mut tasks = self.tasks.lock();
            self.tasks.wait_while(&mut tasks, |t| t.is_empty());
            tasks.pop_front()
        };
        if let Some(task) = task {
            task();
        }
    }

    /// Run queued tasks without blocking, including ones they queue.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
