// Run with: cargo run --example fork_tree
//
// A root replaying process relays between a middleman and one of its forks.
// Everything runs in this process over socket pairs: the middleman sends a
// manifest for fork 2 before the fork has registered, the root holds it, and
// the fork answers through the root once it is connected.

use replay_ipc::Child::{
    ChildContext, ExternalCallId, MainThreadTask, ManifestOutput, ReplayHost, TaskQueue,
};
use replay_ipc::Core::Monitor::Monitor;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::{ChannelBuilder, ChannelKind, MessageType};
use replay_ipc::{logging, ProcessConfig, ProcessRole};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

const FORK_ID: u32 = 2;
const CLOCK_CALL: ExternalCallId = ExternalCallId::MIN;

struct ForkHost {
    tasks: TaskQueue,
    main_thread: Monitor<Option<ThreadId>>,
}

impl ReplayHost for ForkHost {
    fn dispatch_to_main_thread(&self, task: MainThreadTask) {
        self.tasks.push(task);
    }

    fn run_manifest(&self, ctx: &ChildContext, manifest: &[u8]) -> ManifestOutput {
        ctx.set_shared_key("visited", "yes");
        let clock = ctx.external_call(CLOCK_CALL, b"clock", |_| b"12:00".to_vec());
        ManifestOutput::new(format!(
            "fork {} ran {:?} at {}",
            ctx.fork_id(),
            String::from_utf8_lossy(manifest),
            String::from_utf8_lossy(&clock)
        ))
    }

    fn is_main_thread(&self) -> bool {
        *self.main_thread.lock() == Some(thread::current().id())
    }

    fn terminate(&self) {
        println!("Fork: terminated");
    }
}

struct RootHost;

impl ReplayHost for RootHost {
    fn dispatch_to_main_thread(&self, task: MainThreadTask) {
        task();
    }

    fn run_manifest(&self, _ctx: &ChildContext, _manifest: &[u8]) -> ManifestOutput {
        ManifestOutput::default()
    }

    fn is_main_thread(&self) -> bool {
        false
    }

    fn terminate(&self) {}
}

fn main() -> replay_ipc::Result<()> {
    let config = ProcessConfig::new(ProcessRole::Replaying);
    logging::init(&config);

    // Middleman <-> root.
    let (middleman_end, root_end) = UnixStream::pair()?;
    let finished: Arc<Monitor<Vec<String>>> = Arc::new(Monitor::new(Vec::new()));
    let finished_for_handler = Arc::clone(&finished);
    let middleman = ChannelBuilder::new(ChannelKind::MiddlemanReplay).from_stream(
        middleman_end,
        Arc::new(move |message: Message| {
            if message.kind() == MessageType::ManifestFinished {
                let text = String::from_utf8_lossy(message.binary_data().unwrap_or_default())
                    .into_owned();
                finished_for_handler.lock().push(text);
                finished_for_handler.notify_all();
            }
        }),
    )?;

    let root = ChildContext::new(config.clone(), Arc::new(RootHost))?;
    root.attach_stream(ChannelKind::RecordReplay, root_end)?;

    middleman.send(Message::introduction(std::process::id(), Vec::new()));
    middleman.send(Message::recording_data(0, 0, b"shared recording".to_vec()));
    middleman.send(Message::manifest_start(FORK_ID, b"explore".to_vec()));
    root.wait_for_introduction();

    // Give the manifest time to reach the root before the fork exists.
    thread::sleep(Duration::from_millis(100));
    println!(
        "Root: {} message(s) held for fork {}",
        root.forks().pending_for(FORK_ID),
        FORK_ID
    );

    // Root <-> fork.
    let (root_side, fork_side) = UnixStream::pair()?;
    let fork_host = Arc::new(ForkHost {
        tasks: TaskQueue::new(),
        main_thread: Monitor::new(None),
    });
    let fork = ChildContext::new(config.with_fork_id(FORK_ID), fork_host.clone())?;
    fork.attach_stream(ChannelKind::ReplayForked, fork_side)?;
    root.register_fork_stream(std::process::id(), FORK_ID, root_side)?;

    let fork_main = {
        let fork_host = Arc::clone(&fork_host);
        thread::Builder::new()
            .name("fork-main".to_string())
            .spawn(move || {
                *fork_host.main_thread.lock() = Some(thread::current().id());
                fork_host.tasks.run_one();
            })?
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    {
        let mut results = finished.lock();
        finished.wait_while_until(&mut results, deadline, |r| r.is_empty());
        for text in results.iter() {
            println!("Middleman: {}", text);
        }
    }
    let _ = fork_main.join();

    println!("Root: shared key visited = {:?}", root.get_shared_key("visited"));
    println!(
        "Root: external call {} cached = {}",
        CLOCK_CALL,
        root.external_calls().cache().contains(CLOCK_CALL)
    );

    middleman.send(Message::terminate(FORK_ID));
    thread::sleep(Duration::from_millis(100));
    println!("Root: forks still registered = {}", root.forks().len());
    Ok(())
}
