// Per-process state of a recording or replaying child.
//
// One context exists per process. It is built once when the process takes on
// its role and shared by handle with every thread that needs it.

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::crash::{CrashObserver, CrashReporter, Fault, FaultHandler};
use super::external_call::{ExternalCallId, ExternalCallOutput, ExternalCalls};
use super::fork::{ForkTable, ForkedProcess};
use super::host::{ManifestOutput, ReplayHost};
use super::manifest::ManifestQueue;
use super::recording::RecordingBuffer;
use super::shared_db::SharedDatabase;
use crate::config::ProcessConfig;
use crate::error::{ReplayError, Result};
use crate::Core::Monitor::Monitor;
use crate::Core::Socket::{self, AnnouncementPipe, ForkAnnouncement};
use crate::Core::SpinLock::ReadWriteSpinLock;
use crate::Protocol::Channel::{Channel, ChannelKind, MessageHandler};
use crate::Protocol::Message::Message;
use crate::Protocol::{ChannelBuilder, Direction, Introduction, MessageType, Payload, ROOT_FORK_ID};

/// Which side of `perform_fork` the caller is on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ForkOutcome {
    /// The original process; `pid` is the new fork.
    Parent { pid: u32 },
    /// The new fork.
    Child,
}

pub struct ChildContext {
    pub(crate) config: ProcessConfig,
    pub(crate) host: Arc<dyn ReplayHost>,
    pub(crate) fork_id: AtomicU32,
    pub(crate) fork_lock: ReadWriteSpinLock,
    pub(crate) channel: RwLock<Option<Arc<Channel>>>,
    pub(crate) introduction: Monitor<Option<Introduction>>,
    pub(crate) recording: RecordingBuffer,
    pub(crate) manifests: ManifestQueue,
    pub(crate) external_calls: ExternalCalls,
    pub(crate) forks: ForkTable,
    pub(crate) shared_db: SharedDatabase,
    pub(crate) crash: CrashReporter,
    pub(crate) crash_observer: Mutex<Option<Arc<dyn CrashObserver>>>,
    pub(crate) announcements: Option<AnnouncementPipe>,
    pub(crate) logging_enabled: AtomicBool,
    pub(crate) divergence_allowed: AtomicBool,
    pub(crate) exit_called: AtomicBool,
    pub(crate) started: Instant,
    weak_self: Weak<ChildContext>,
}

impl ChildContext {
    /// Build the context for this process. A replaying root also gets the
    /// pipe its future forks announce themselves on.
    pub fn new(config: ProcessConfig, host: Arc<dyn ReplayHost>) -> Result<Arc<Self>> {
        let crash = CrashReporter::new()?;
        let announcements = if config.is_replaying() && config.fork_id == ROOT_FORK_ID {
            Some(AnnouncementPipe::new()?)
        } else {
            None
        };

        Ok(Arc::new_cyclic(|weak_self| ChildContext {
            fork_id: AtomicU32::new(config.fork_id),
            config,
            host,
            fork_lock: ReadWriteSpinLock::new(),
            channel: RwLock::new(None),
            introduction: Monitor::new(None),
            recording: RecordingBuffer::new(),
            manifests: ManifestQueue::new(),
            external_calls: ExternalCalls::new(),
            forks: ForkTable::new(),
            shared_db: SharedDatabase::new(),
            crash,
            crash_observer: Mutex::new(None),
            announcements,
            logging_enabled: AtomicBool::new(false),
            divergence_allowed: AtomicBool::new(true),
            exit_called: AtomicBool::new(false),
            started: Instant::now(),
            weak_self: weak_self.clone(),
        }))
    }

    fn handle(&self) -> Option<Arc<ChildContext>> {
        self.weak_self.upgrade()
    }

    // ------------------------------------------------------------------
    // Channel setup
    // ------------------------------------------------------------------

    /// Handler for the channel to this process's middleman or root.
    pub fn message_handler(&self) -> MessageHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |message| {
            if let Some(ctx) = weak.upgrade() {
                ctx.handle_message(message);
            }
        })
    }

    /// Handler for channels from forks to this root process.
    pub fn fork_message_handler(&self) -> MessageHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |message| {
            if let Some(ctx) = weak.upgrade() {
                ctx.handle_fork_message(message);
            }
        })
    }

    fn builder(&self, kind: ChannelKind) -> ChannelBuilder {
        let weak = self.weak_self.clone();
        ChannelBuilder::new(kind)
            .with_socket_dir(self.config.socket_dir.clone())
            .on_disconnect(move || {
                if let Some(ctx) = weak.upgrade() {
                    ctx.exit_called.store(true, Ordering::SeqCst);
                    ctx.host.terminate();
                }
            })
    }

    fn install_channel(&self, channel: Channel) -> Arc<Channel> {
        let channel = Arc::new(channel);
        *self.channel.write() = Some(channel.clone());
        channel
    }

    /// Connect to the middleman's socket for this process's channel id.
    pub fn connect_to_middleman(&self) -> Result<()> {
        let channel = self
            .builder(ChannelKind::RecordReplay)
            .with_channel_id(self.config.channel_id)
            .with_pid(self.config.middleman_pid)
            .open(self.message_handler())?;
        self.install_channel(channel);
        Ok(())
    }

    /// Use an already connected stream as this process's channel.
    pub fn attach_stream(&self, kind: ChannelKind, stream: UnixStream) -> Result<()> {
        let channel = self
            .builder(kind)
            .with_channel_id(self.config.channel_id)
            .from_stream(stream, self.message_handler())?;
        self.install_channel(channel);
        Ok(())
    }

    /// Connect to the middleman and wait until it has sent the introduction
    /// and, when replaying, the first recording bytes.
    pub fn setup_channel(&self) -> Result<Introduction> {
        self.connect_to_middleman()?;
        let introduction = self.wait_for_introduction();
        if self.config.is_replaying() {
            self.recording.wait_for_length(1);
        }
        Ok(introduction)
    }

    /// Block until the introduction message has arrived.
    pub fn wait_for_introduction(&self) -> Introduction {
        let mut introduction = self.introduction.lock();
        loop {
            if let Some(intro) = introduction.as_ref() {
                return intro.clone();
            }
            self.introduction.wait(&mut introduction);
        }
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.read().clone()
    }

    /// Send on this process's channel.
    ///
    /// A message sent from the main thread while the process is paused breaks
    /// the send-direction rule; it is still sent, and logged.
    pub fn send(&self, message: Message) {
        if self.host.is_main_thread()
            && !message.kind().may_send(Direction::FromChild, self.is_paused())
        {
            warn!(
                kind = message.type_name(),
                "Message sent to middleman while paused"
            );
        }
        match self.channel() {
            Some(channel) => channel.send(message),
            None => warn!(kind = message.type_name(), "No channel, dropping message"),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn ReplayHost> {
        &self.host
    }

    pub fn fork_id(&self) -> u32 {
        self.fork_id.load(Ordering::SeqCst)
    }

    pub fn is_root(&self) -> bool {
        self.fork_id() == ROOT_FORK_ID
    }

    pub fn is_recording(&self) -> bool {
        self.config.is_recording()
    }

    pub fn is_replaying(&self) -> bool {
        self.config.is_replaying()
    }

    /// A child is paused whenever no manifest is running.
    pub fn is_paused(&self) -> bool {
        !self.manifests.is_processing()
    }

    pub fn fork_lock(&self) -> &ReadWriteSpinLock {
        &self.fork_lock
    }

    pub fn recording(&self) -> &RecordingBuffer {
        &self.recording
    }

    pub fn manifests(&self) -> &ManifestQueue {
        &self.manifests
    }

    pub fn external_calls(&self) -> &ExternalCalls {
        &self.external_calls
    }

    pub fn forks(&self) -> &ForkTable {
        &self.forks
    }

    pub fn shared_database(&self) -> &SharedDatabase {
        &self.shared_db
    }

    pub fn crash_reporter(&self) -> &CrashReporter {
        &self.crash
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Incoming messages
    // ------------------------------------------------------------------

    /// Process a message from the middleman, or from the root in a fork.
    pub fn handle_message(&self, message: Message) {
        let fork_id = self.fork_id();
        if message.fork_id() != fork_id {
            let _fork_guard = self.fork_lock.read();
            if fork_id != ROOT_FORK_ID {
                // Messages can still arrive for a fork that has terminated.
                warn!(
                    target_fork = message.fork_id(),
                    fork = fork_id,
                    "Ignoring message for another fork"
                );
                return;
            }
            self.forks.route(message);
            return;
        }

        // The main thread may be stuck holding the fork lock, so these are
        // handled without it.
        match message.kind() {
            MessageType::Terminate => {
                info!(fork = fork_id, "Terminate message received, exiting");
                self.exit_called.store(true, Ordering::SeqCst);
                self.host.terminate();
                return;
            }
            MessageType::Crash => {
                error!(fork = fork_id, "Crashing hung process");
                self.send_fatal_error("Hung replaying process");
                return;
            }
            _ => {}
        }

        let _fork_guard = self.fork_lock.read();
        let kind = message.kind();
        match message.into_payload() {
            Payload::Introduction(intro) => {
                let mut introduction = self.introduction.lock();
                if introduction.is_some() {
                    warn!("Ignoring repeated introduction");
                    return;
                }
                debug!(argc = intro.argc(), parent = intro.parent_pid, "Introduction");
                *introduction = Some(intro);
                self.introduction.notify_all();
            }
            Payload::Ping { id } => {
                let progress = self.host.execution_progress();
                debug!(id, progress, "PingResponse");
                self.send(Message::ping_response(fork_id, id, progress));
            }
            Payload::Empty if kind == MessageType::CreateCheckpoint => {
                if self.is_recording() {
                    self.host.create_checkpoint();
                } else {
                    debug!("Ignoring checkpoint request while replaying");
                }
            }
            Payload::Empty if kind == MessageType::EnableLogging => {
                self.logging_enabled.store(true, Ordering::SeqCst);
            }
            Payload::Empty if kind == MessageType::FetchCloudRecordingData => {
                if let Err(e) = self.fetch_recording_data() {
                    self.report_fatal_error(&format!("FetchCloudRecordingData failed: {}", e));
                }
            }
            Payload::Binary { data, .. } if kind == MessageType::ManifestStart => {
                self.enqueue_manifest(data);
            }
            Payload::Binary { tag, data } if kind == MessageType::ExternalCallResponse => {
                self.external_calls
                    .deliver_response(ExternalCallId::new(tag), data);
            }
            Payload::Binary { tag, data } if kind == MessageType::RecordingData => {
                self.recording.add_chunk(tag, data);
            }
            Payload::Binary { data, .. } if kind == MessageType::LogText => {
                let text = String::from_utf8_lossy(&data);
                info!("{}", text.trim_end_matches(&['\0', '\n'][..]));
            }
            Payload::Binary { data, .. } if kind == MessageType::SharedKeyResponse => {
                self.shared_db
                    .deliver_response(String::from_utf8_lossy(&data).into_owned());
            }
            _ => warn!(kind = kind.name(), "Unexpected message"),
        }
    }

    /// Process a message from one of this root's forks. Messages the root
    /// does not answer itself go on to the middleman.
    pub fn handle_fork_message(&self, message: Message) {
        let _fork_guard = self.fork_lock.read();
        let fork_id = message.fork_id();

        match message.kind() {
            MessageType::UpdateRecordingFromRoot => {
                if let Payload::UpdateRecording {
                    start,
                    required_length,
                } = *message.payload()
                {
                    self.ensure_length(required_length as usize);
                    let data = self
                        .recording
                        .range(start as usize, required_length as usize);
                    self.forks
                        .route(Message::recording_data(fork_id, start, data));
                }
            }
            MessageType::ExternalCallRequest => {
                let id = message.tag().and_then(ExternalCallId::new);
                let output = id.and_then(|id| self.external_calls.cache().get(id));
                let response = match (id, output) {
                    (Some(id), Some(output)) => {
                        Message::external_call_response(fork_id, id, output)
                    }
                    _ => Message::external_call_unavailable(fork_id),
                };
                self.forks.route(response);
            }
            MessageType::ExternalCallResponse => {
                if let Some((tag, output)) = message.into_binary() {
                    if let Some(id) = ExternalCallId::new(tag) {
                        self.external_calls.cache().insert(id, output);
                    }
                }
            }
            MessageType::ScanData => {
                if let Some((_, data)) = message.into_binary() {
                    self.host.add_scan_data(data);
                }
            }
            MessageType::SharedKeySet => {
                if let Some((key, value)) = message.shared_key_entry() {
                    self.shared_db.set(
                        String::from_utf8_lossy(key).into_owned(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
            MessageType::SharedKeyRequest => {
                let key = message
                    .binary_data()
                    .map(|d| String::from_utf8_lossy(d).into_owned())
                    .unwrap_or_default();
                let value = self.shared_db.get(&key);
                self.forks
                    .route(Message::shared_key_response(fork_id, &value));
            }
            _ => self.send(message),
        }
    }

    // ------------------------------------------------------------------
    // Manifests
    // ------------------------------------------------------------------

    fn enqueue_manifest(&self, manifest: Vec<u8>) {
        if let Some(manifest) = self.manifests.push(manifest) {
            self.start_manifest(manifest);
        }
    }

    fn start_manifest(&self, manifest: Vec<u8>) {
        let ctx = match self.handle() {
            Some(ctx) => ctx,
            None => return,
        };
        self.host.dispatch_to_main_thread(Box::new(move || {
            let output = ctx.host.run_manifest(&ctx, &manifest);
            ctx.manifest_finished(output);
        }));
    }

    /// Send the result of the running manifest and start the next one.
    pub fn manifest_finished(&self, output: ManifestOutput) {
        let mut message = Message::manifest_finished(self.fork_id(), output.data);
        if output.bulk {
            message.set_bulk();
        }
        debug!(
            fork = self.fork_id(),
            size = message.size(),
            hash = message.hash().unwrap_or_default(),
            "ManifestFinished"
        );
        self.send(message);

        if let Some(next) = self.manifests.finish() {
            self.start_manifest(next);
        }
    }

    // ------------------------------------------------------------------
    // Recording data
    // ------------------------------------------------------------------

    /// Block until the recording holds `length` bytes, asking the root for
    /// them first when this process is a fork.
    pub fn ensure_length(&self, length: usize) {
        let current = self.recording.len();
        let fork_id = self.fork_id();
        if fork_id != ROOT_FORK_ID && current < length {
            self.send(Message::update_recording_from_root(
                fork_id,
                current as u64,
                length as u64,
            ));
        }
        self.recording.wait_for_length(length);
    }

    /// Bytes received since the last call, for the recorder to consume.
    pub fn add_pending_recording_data(&self, require_more: bool) -> Result<Vec<u8>> {
        self.recording.take_pending(require_more).map_err(|e| {
            if let ReplayError::EndOfRecording { length } = e {
                error!(length, "Hit end of recording");
            }
            e
        })
    }

    /// Upload recording bytes starting at `start` to the middleman.
    pub fn send_recording_data(&self, start: u64, data: Vec<u8>) {
        self.send(Message::recording_data(self.fork_id(), start, data));
    }

    fn offline_dir(&self) -> Result<&PathBuf> {
        self.config
            .offline_dir
            .as_ref()
            .ok_or(ReplayError::OfflineDirectoryUnset)
    }

    /// Write the whole recording to the offline directory under `name`.
    pub fn save_recording(&self, name: &str) -> Result<PathBuf> {
        let path = self.offline_dir()?.join(name);
        self.recording.save_to(&path)?;
        info!(path = %path.display(), length = self.recording.len(), "SavedRecording");
        Ok(path)
    }

    /// Append the configured recording from the offline directory.
    pub fn fetch_recording_data(&self) -> Result<usize> {
        let name = self
            .config
            .recording_name
            .as_ref()
            .ok_or(ReplayError::RecordingNameUnset)?;
        let path = self.offline_dir()?.join(name);
        let length = self.recording.load_from(&path)?;
        info!(path = %path.display(), length, "FetchedRecording");
        Ok(length)
    }

    pub fn send_scan_data(&self, data: Vec<u8>) {
        self.send(Message::scan_data(self.fork_id(), data));
    }

    // ------------------------------------------------------------------
    // External calls
    // ------------------------------------------------------------------

    /// Output of external call `id`, from the local cache or upstream.
    /// Blocks while another request from this process is outstanding.
    pub fn request_external_call(&self, id: ExternalCallId, input: &[u8]) -> ExternalCallOutput {
        let fork_id = self.fork_id();
        self.external_calls.request(id, || {
            self.send(Message::external_call_request(fork_id, id, input.to_vec()));
        })
    }

    /// Cache the output of a call this process performed and pass it upstream.
    pub fn send_external_call_output(&self, id: ExternalCallId, output: &[u8]) {
        self.external_calls.cache().insert(id, output.to_vec());
        self.send(Message::external_call_response(
            self.fork_id(),
            id,
            output.to_vec(),
        ));
    }

    /// Output of external call `id`, running `perform` only when no process in
    /// the tree knows it yet.
    pub fn external_call<F>(&self, id: ExternalCallId, input: &[u8], perform: F) -> Vec<u8>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        match self.request_external_call(id, input) {
            ExternalCallOutput::Available(output) => output,
            ExternalCallOutput::Unavailable => {
                let output = perform(input);
                self.send_external_call_output(id, &output);
                output
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared database
    // ------------------------------------------------------------------

    /// Set a key in the root's database. Does not wait for the root.
    pub fn set_shared_key(&self, key: &str, value: &str) {
        if self.is_root() {
            self.shared_db.set(key.to_string(), value.to_string());
            return;
        }
        self.send(Message::shared_key_set(self.fork_id(), key, value));
    }

    /// Value of `key` in the root's database; empty if it was never set.
    pub fn get_shared_key(&self, key: &str) -> String {
        if self.is_root() {
            return self.shared_db.get(key);
        }
        let fork_id = self.fork_id();
        self.shared_db
            .request(|| self.send(Message::shared_key_request(fork_id, key)))
    }

    // ------------------------------------------------------------------
    // Forks
    // ------------------------------------------------------------------

    /// Start the thread accepting announcements from new forks.
    pub fn start_fork_listener(&self) -> Result<()> {
        if self.announcements.is_none() {
            return Err(ReplayError::WrongRole {
                operation: "fork listener",
            });
        }
        let weak = self.weak_self.clone();
        thread::Builder::new()
            .name("fork-listener".to_string())
            .spawn(move || loop {
                let ctx = match weak.upgrade() {
                    Some(ctx) => ctx,
                    None => return,
                };
                let next = match ctx.announcements.as_ref() {
                    Some(pipe) => pipe.next(),
                    None => return,
                };
                match next {
                    Ok(announcement) => {
                        if let Err(e) = ctx.connect_to_fork(announcement) {
                            error!(fork = announcement.fork_id, error = %e, "Failed to connect to fork");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Fork announcement pipe failed");
                        return;
                    }
                }
            })?;
        Ok(())
    }

    /// Connect to a fork's socket and register it.
    pub fn connect_to_fork(&self, announcement: ForkAnnouncement) -> Result<()> {
        let _fork_guard = self.fork_lock.read();
        let channel = self
            .builder(ChannelKind::ReplayRoot)
            .with_pid(announcement.pid)
            .open(self.fork_message_handler())?;
        self.forks.register(ForkedProcess {
            pid: announcement.pid,
            fork_id: announcement.fork_id,
            channel,
        });
        Ok(())
    }

    /// Register a fork reachable over an already connected stream.
    pub fn register_fork_stream(&self, pid: u32, fork_id: u32, stream: UnixStream) -> Result<()> {
        let _fork_guard = self.fork_lock.read();
        let channel = self
            .builder(ChannelKind::ReplayRoot)
            .from_stream(stream, self.fork_message_handler())?;
        self.forks.register(ForkedProcess {
            pid,
            fork_id,
            channel,
        });
        Ok(())
    }

    /// Duplicate this process. The new process takes `fork_id`, opens its
    /// own channel and announces itself to the root.
    pub fn perform_fork(&self, fork_id: u32) -> Result<ForkOutcome> {
        let announcements = self.announcements.as_ref().ok_or(ReplayError::WrongRole {
            operation: "perform_fork",
        })?;

        debug!(fork = fork_id, "PerformFork Start");
        let guard = self.fork_lock.write();
        debug!(fork = fork_id, "PerformFork Locked");

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            drop(guard);
            return Err(std::io::Error::last_os_error().into());
        }
        if pid > 0 {
            drop(guard);
            return Ok(ForkOutcome::Parent { pid: pid as u32 });
        }

        // Threads that held the lock in the parent do not exist here.
        std::mem::forget(guard);
        self.fork_lock.reset_after_fork();

        // Anything still queued was sent to the original process.
        self.manifests.clear_pending();
        self.fork_id.store(fork_id, Ordering::SeqCst);

        let channel = self
            .builder(ChannelKind::ReplayForked)
            .with_pid(std::process::id())
            .open(self.message_handler())?;
        let channel = self.install_channel(channel);

        let observer = self.crash_observer.lock().clone();
        if let Some(observer) = observer {
            observer.restart_after_fork(self.fault_handler())?;
        }

        announcements.announce(ForkAnnouncement {
            pid: std::process::id(),
            fork_id,
        })?;

        // The root may be exiting and never connect.
        channel.exit_if_not_connected_before(Instant::now() + self.config.fork_timeout)?;
        Ok(ForkOutcome::Child)
    }

    pub fn fork_socket_path(&self, pid: u32) -> PathBuf {
        Socket::socket_path(&self.config.socket_dir, pid, 0)
    }

    // ------------------------------------------------------------------
    // Errors and diagnostics
    // ------------------------------------------------------------------

    /// Send a fatal error without stopping the calling thread.
    pub fn send_fatal_error(&self, text: &str) {
        let fork_id = self.fork_id();
        error!(
            "***** Fatal Record/Replay Error #{}:{} *****\n{}",
            self.config.channel_id, fork_id, text
        );
        self.send(Message::fatal_error(fork_id, text));
    }

    /// Report an error this process cannot continue from, then block until
    /// the middleman terminates it.
    pub fn report_fatal_error(&self, text: &str) {
        if self.exit_called.load(Ordering::SeqCst) {
            return;
        }
        self.crash.record_fatal(text);
        self.send_fatal_error(text);
        self.host.wait_forever();
    }

    /// Report a detected fault with whatever diagnostics were prepared.
    pub fn report_crash(&self, fault: Fault) {
        if self.exit_called.load(Ordering::SeqCst) {
            return;
        }
        let fork_id = self.fork_id();
        let frame = self.crash.take_fatal_frame(fault, fork_id);
        if let Some(channel) = self.channel() {
            channel.send_encoded(frame);
        }
        error!(
            fork = fork_id,
            signal = fault.signal,
            "***** Fatal Record/Replay Error #{}:{} *****",
            self.config.channel_id,
            fork_id
        );
    }

    /// Report an error the process can keep running after.
    pub fn report_critical_error(&self, text: &str) {
        error!("Critical Error: {}", text);
        self.send(Message::critical_error(self.fork_id(), text));
    }

    pub fn set_unhandled_divergence_allowed(&self, allowed: bool) {
        self.divergence_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Tell the middleman execution needs data the recording cannot supply,
    /// then block until terminated.
    pub fn report_unhandled_divergence(&self) {
        if !self.host.is_main_thread() || !self.divergence_allowed.load(Ordering::SeqCst) {
            self.report_fatal_error("Unhandled divergence not allowed");
            return;
        }
        self.send(Message::unhandled_divergence(self.fork_id()));
        self.host.wait_forever();
    }

    /// Start reporting faults detected by `observer` through this context.
    ///
    /// Forks made by `perform_fork` restart the observer for themselves.
    pub fn start_crash_observer(&self, observer: Arc<dyn CrashObserver>) -> Result<()> {
        observer.start(self.fault_handler())?;
        *self.crash_observer.lock() = Some(observer);
        Ok(())
    }

    fn fault_handler(&self) -> FaultHandler {
        let weak = self.weak_self.clone();
        Box::new(move |fault| {
            if let Some(ctx) = weak.upgrade() {
                ctx.report_crash(fault);
            }
        })
    }

    pub fn push_crash_note(&self, note: &str) {
        self.crash.push_note(note);
    }

    pub fn pop_crash_note(&self) {
        self.crash.pop_note();
    }

    pub fn set_crash_note(&self, note: &str) {
        self.crash.set_note(note);
    }

    // ------------------------------------------------------------------
    // Other output
    // ------------------------------------------------------------------

    pub fn notify_paint(&self, width: u32, height: u32) {
        let mut message = Message::paint(width, height);
        message.fork_id = self.fork_id();
        self.send(message);
    }

    /// A recording process forwards log text to the middleman. Replaying
    /// processes print it themselves once logging is enabled.
    pub fn print_log(&self, text: &str) {
        let elapsed = self.started.elapsed().as_secs_f64();
        if self.is_recording() {
            let line = format!("[Recording {:.3}] {}\n", elapsed, text);
            self.send(Message::log_text(ROOT_FORK_ID, &line));
        } else if self.logging_enabled() {
            info!("[#{} {:.3}] {}", self.fork_id(), elapsed, text);
        }
    }
}
