// Run with: cargo run --example middleman
//
// Starts a copy of itself as a replaying child, feeds it an introduction,
// some recording bytes and a manifest, and prints the finished result.

use replay_ipc::Child::{ChildContext, ManifestOutput, ReplayHost, TaskQueue};
use replay_ipc::Core::Monitor::Monitor;
use replay_ipc::Protocol::Message::Message;
use replay_ipc::Protocol::{ChannelBuilder, ChannelKind, MessageType};
use replay_ipc::{config, logging, ProcessConfig, ProcessRole};
use std::env;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

const CHANNEL_ID: u32 = 1;

struct DemoHost {
    tasks: TaskQueue,
    main_thread: ThreadId,
}

impl ReplayHost for DemoHost {
    fn dispatch_to_main_thread(&self, task: replay_ipc::Child::MainThreadTask) {
        self.tasks.push(task);
    }

    fn run_manifest(&self, ctx: &ChildContext, manifest: &[u8]) -> ManifestOutput {
        let text = String::from_utf8_lossy(manifest);
        ctx.print_log(&format!("Running manifest {:?}", text));
        ManifestOutput::new(format!(
            "{} (recording has {} bytes)",
            text.to_uppercase(),
            ctx.recording().len()
        ))
    }

    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }
}

fn run_child(args: Vec<String>) -> replay_ipc::Result<()> {
    let config = ProcessConfig::from_args(ProcessRole::Replaying, &args)?.from_env()?;
    logging::init(&config);

    let host = Arc::new(DemoHost {
        tasks: TaskQueue::new(),
        main_thread: thread::current().id(),
    });
    let ctx = ChildContext::new(config, host.clone())?;
    replay_ipc::ffi::install_context(ctx.clone());

    let introduction = ctx.setup_channel()?;
    println!(
        "Child: introduced with argv {:?}, recording has {} bytes",
        introduction.argv,
        ctx.recording().len()
    );

    // Runs until the middleman sends Terminate.
    loop {
        host.tasks.run_one();
    }
}

fn run_middleman() -> replay_ipc::Result<()> {
    let config = ProcessConfig::new(ProcessRole::Replaying);
    logging::init(&config);

    let socket_dir = env::temp_dir();
    let finished: Arc<Monitor<Option<String>>> = Arc::new(Monitor::new(None));
    let keep_running = Arc::new(AtomicBool::new(true));

    let keep_running_for_handler = Arc::clone(&keep_running);
    ctrlc::set_handler(move || {
        keep_running_for_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let finished_for_handler = Arc::clone(&finished);
    let channel = ChannelBuilder::new(ChannelKind::MiddlemanReplay)
        .with_channel_id(CHANNEL_ID)
        .with_socket_dir(&socket_dir)
        .open(Arc::new(move |message: Message| match message.kind() {
            MessageType::ManifestFinished => {
                let text = String::from_utf8_lossy(message.binary_data().unwrap_or_default())
                    .into_owned();
                *finished_for_handler.lock() = Some(text);
                finished_for_handler.notify_all();
            }
            MessageType::FatalError | MessageType::CriticalError => {
                eprintln!("Middleman: child error: {:?}", message.error_text());
            }
            other => println!("Middleman: received {}", other.name()),
        }))?;

    let mut child = Command::new(env::current_exe()?)
        .arg("--child")
        .arg(config::MIDDLEMAN_PID_OPTION)
        .arg(std::process::id().to_string())
        .arg(config::CHANNEL_ID_OPTION)
        .arg(CHANNEL_ID.to_string())
        .env(config::SOCKET_DIR_ENV, &socket_dir)
        .spawn()?;

    channel.send(Message::introduction(
        std::process::id(),
        vec!["--x".to_string(), "--y".to_string()],
    ));
    channel.send(Message::recording_data(0, 0, b"demo recording bytes".to_vec()));
    channel.send(Message::manifest_start(0, b"hello from the middleman".to_vec()));

    let deadline = Instant::now() + Duration::from_secs(10);
    let result = {
        let mut state = finished.lock();
        while state.is_none() && keep_running.load(Ordering::SeqCst) && Instant::now() < deadline {
            finished.wait_while_until(&mut state, Instant::now() + Duration::from_millis(100), |s| {
                s.is_none()
            });
        }
        state.take()
    };

    match result {
        Some(text) => println!("Middleman: manifest finished: {}", text),
        None => println!("Middleman: no result before shutdown"),
    }

    channel.send(Message::terminate(0));
    let status = child.wait()?;
    println!("Middleman: child exited with {}", status);
    Ok(())
}

fn main() -> replay_ipc::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--child") {
        run_child(args)
    } else {
        run_middleman()
    }
}
