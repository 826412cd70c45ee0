// Shared fixtures: a host whose main thread is a task loop, and a middleman
// end that collects everything the child sends.
#![allow(dead_code)]

use replay_ipc::Child::{ChildContext, MainThreadTask, ManifestOutput, ReplayHost, TaskQueue};
use replay_ipc::Core::Monitor::Monitor;
use replay_ipc::Protocol::Channel::Channel;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::{ChannelBuilder, ChannelKind, MessageType};
use replay_ipc::{ProcessConfig, ProcessRole};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

type ManifestRunner = Box<dyn Fn(&ChildContext, &[u8]) -> ManifestOutput + Send + Sync>;

pub struct TestHost {
    pub tasks: TaskQueue,
    pub main_thread: Monitor<Option<ThreadId>>,
    pub terminated: Monitor<bool>,
    pub halted: Monitor<usize>,
    pub progress: AtomicU64,
    pub checkpoints: AtomicUsize,
    pub scan_data: Monitor<Vec<Vec<u8>>>,
    runner: ManifestRunner,
}

impl TestHost {
    /// Host echoing manifests back as `done:<manifest>`.
    pub fn new() -> Arc<Self> {
        Self::with_runner(|_, manifest| {
            let mut data = b"done:".to_vec();
            data.extend_from_slice(manifest);
            ManifestOutput::new(data)
        })
    }

    pub fn with_runner<F>(runner: F) -> Arc<Self>
    where
        F: Fn(&ChildContext, &[u8]) -> ManifestOutput + Send + Sync + 'static,
    {
        let host = Arc::new(Self {
            tasks: TaskQueue::new(),
            main_thread: Monitor::new(None),
            terminated: Monitor::new(false),
            halted: Monitor::new(0),
            progress: AtomicU64::new(0),
            checkpoints: AtomicUsize::new(0),
            scan_data: Monitor::new(Vec::new()),
            runner: Box::new(runner),
        });

        let main = Arc::clone(&host);
        thread::Builder::new()
            .name("test-main".to_string())
            .spawn(move || {
                *main.main_thread.lock() = Some(thread::current().id());
                main.main_thread.notify_all();
                loop {
                    main.tasks.run_one();
                }
            })
            .unwrap();

        {
            let mut id = host.main_thread.lock();
            host.main_thread.wait_while(&mut id, |id| id.is_none());
        }
        host
    }

    /// Run `f` on the host's main thread and wait for its result.
    pub fn on_main_thread<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let result: Arc<Monitor<Option<T>>> = Arc::new(Monitor::new(None));
        let slot = Arc::clone(&result);
        self.tasks.push(Box::new(move || {
            let value = f();
            *slot.lock() = Some(value);
            slot.notify_all();
        }));
        let mut value = result.lock();
        let done = result.wait_while_until(&mut value, Instant::now() + TIMEOUT, |v| v.is_none());
        assert!(done, "main thread task timed out");
        value.take().unwrap()
    }

    pub fn wait_terminated(&self) -> bool {
        let mut terminated = self.terminated.lock();
        self.terminated
            .wait_while_until(&mut terminated, Instant::now() + TIMEOUT, |t| !*t)
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }

    pub fn halts(&self) -> usize {
        *self.halted.lock()
    }
}

impl ReplayHost for TestHost {
    fn dispatch_to_main_thread(&self, task: MainThreadTask) {
        self.tasks.push(task);
    }

    fn run_manifest(&self, ctx: &ChildContext, manifest: &[u8]) -> ManifestOutput {
        (self.runner)(ctx, manifest)
    }

    fn is_main_thread(&self) -> bool {
        *self.main_thread.lock() == Some(thread::current().id())
    }

    fn execution_progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    fn create_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
    }

    fn add_scan_data(&self, data: Vec<u8>) {
        self.scan_data.lock().push(data);
        self.scan_data.notify_all();
    }

    fn terminate(&self) {
        *self.terminated.lock() = true;
        self.terminated.notify_all();
    }

    fn wait_forever(&self) {
        *self.halted.lock() += 1;
        self.halted.notify_all();
    }
}

/// Everything a channel received, in order.
#[derive(Default)]
pub struct Inbox {
    messages: Monitor<Vec<Message>>,
}

impl Inbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handler(self: &Arc<Self>) -> replay_ipc::Protocol::MessageHandler {
        let inbox = Arc::clone(self);
        Arc::new(move |message| {
            inbox.messages.lock().push(message);
            inbox.messages.notify_all();
        })
    }

    /// Remove and return the first message of `kind`, waiting for it.
    pub fn take(&self, kind: MessageType) -> Option<Message> {
        let deadline = Instant::now() + TIMEOUT;
        let mut messages = self.messages.lock();
        loop {
            if let Some(index) = messages.iter().position(|m| m.kind() == kind) {
                return Some(messages.remove(index));
            }
            if self
                .messages
                .wait_while_until(&mut messages, deadline, |m| !m.iter().any(|m| m.kind() == kind))
            {
                continue;
            }
            return None;
        }
    }

    pub fn count(&self, kind: MessageType) -> usize {
        self.messages.lock().iter().filter(|m| m.kind() == kind).count()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

/// A child context wired to an in-process middleman over a socket pair.
pub struct Harness {
    pub ctx: Arc<ChildContext>,
    pub host: Arc<TestHost>,
    pub middleman: Channel,
    pub inbox: Arc<Inbox>,
}

pub fn replaying_root() -> Harness {
    harness(ProcessConfig::new(ProcessRole::Replaying), TestHost::new())
}

pub fn harness(config: ProcessConfig, host: Arc<TestHost>) -> Harness {
    let (middleman_end, child_end) = UnixStream::pair().unwrap();
    let inbox = Inbox::new();
    let middleman = ChannelBuilder::new(ChannelKind::MiddlemanReplay)
        .on_disconnect(|| {})
        .from_stream(middleman_end, inbox.handler())
        .unwrap();
    let ctx = ChildContext::new(config, host.clone()).unwrap();
    ctx.attach_stream(ChannelKind::RecordReplay, child_end).unwrap();
    Harness {
        ctx,
        host,
        middleman,
        inbox,
    }
}

/// A fork of `root`, registered with it over a socket pair.
pub struct Fork {
    pub ctx: Arc<ChildContext>,
    pub host: Arc<TestHost>,
}

pub fn fork_of(root: &Harness, fork_id: u32) -> Fork {
    fork_with_host(root, fork_id, TestHost::new())
}

pub fn fork_with_host(root: &Harness, fork_id: u32, host: Arc<TestHost>) -> Fork {
    let fork = unregistered_fork(fork_id, host);
    register(root, &fork);
    fork
}

pub fn unregistered_fork(fork_id: u32, host: Arc<TestHost>) -> Fork {
    let config = ProcessConfig::new(ProcessRole::Replaying).with_fork_id(fork_id);
    let ctx = ChildContext::new(config, host.clone()).unwrap();
    Fork { ctx, host }
}

pub fn register(root: &Harness, fork: &Fork) {
    let (root_side, fork_side) = UnixStream::pair().unwrap();
    fork.ctx
        .attach_stream(ChannelKind::ReplayForked, fork_side)
        .unwrap();
    root.ctx
        .register_fork_stream(std::process::id(), fork.ctx.fork_id(), root_side)
        .unwrap();
}

/// Poll `condition` until it holds or the timeout passes.
pub fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
