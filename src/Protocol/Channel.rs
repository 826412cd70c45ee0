// Bidirectional message channel over a unix socket.
//
// Each channel owns one socket. Incoming frames are read on a dedicated
// receiver thread and handed to the channel's handler; outgoing frames are
// queued by `send` and written by a dedicated writer thread, so senders never
// wait for delivery.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use super::Message::Message;
use crate::error::ReplayError;
use crate::Core::Monitor::Monitor;

/// Callback invoked on the receiver thread for every incoming message.
/// The handler owns the message from then on.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked when a channel whose loss is fatal disconnects, or never connects.
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Role of a channel; decides which side listens and whether losing the
/// connection ends the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Middleman side of a connection to a recording process.
    MiddlemanRecord,
    /// Middleman side of a connection to a replaying process.
    MiddlemanReplay,
    /// Recording or replaying process side of its middleman connection.
    RecordReplay,
    /// Root replaying process side of a connection to one of its forks.
    ReplayRoot,
    /// Forked replaying process side of the connection to its root.
    ReplayForked,
}

impl ChannelKind {
    /// Whether this side is opened first and waits for the other to connect.
    pub fn is_listener(self) -> bool {
        match self {
            ChannelKind::MiddlemanRecord
            | ChannelKind::MiddlemanReplay
            | ChannelKind::ReplayForked => true,
            ChannelKind::RecordReplay | ChannelKind::ReplayRoot => false,
        }
    }

    /// Whether the process should exit when the other side disconnects.
    pub fn exit_on_disconnect(self) -> bool {
        match self {
            ChannelKind::RecordReplay | ChannelKind::ReplayForked => true,
            ChannelKind::MiddlemanRecord
            | ChannelKind::MiddlemanReplay
            | ChannelKind::ReplayRoot => false,
        }
    }
}

/// Frames the outgoing queue holds without growing.
const OUTGOING_CAPACITY: usize = 64;

/// Outgoing side shared between senders and the writer thread.
#[derive(Default)]
pub(crate) struct Outgoing {
    /// Set once the peer is connected; taken by the writer thread.
    pub(crate) stream: Option<UnixStream>,
    pub(crate) queue: VecDeque<Vec<u8>>,
    pub(crate) connected: bool,
    pub(crate) closed: bool,
    pub(crate) messages_sent: u64,
}

pub struct Channel {
    pub(crate) id: u32,
    pub(crate) kind: ChannelKind,
    pub(crate) outgoing: Arc<Monitor<Outgoing>>,
    pub(crate) on_disconnect: DisconnectHook,
}

/// Default reaction to losing a channel the process cannot live without.
pub fn exit_process_hook() -> DisconnectHook {
    Arc::new(|| unsafe { libc::_exit(0) })
}

impl Channel {
    /// Start the threads of a channel that will listen on `listener`.
    pub(crate) fn spawn_listening(
        id: u32,
        kind: ChannelKind,
        listener: UnixListener,
        handler: MessageHandler,
        on_disconnect: DisconnectHook,
    ) -> io::Result<Channel> {
        let channel = Channel::unconnected(id, kind, on_disconnect);
        let outgoing = channel.outgoing.clone();
        let hook = channel.on_disconnect.clone();
        thread::Builder::new()
            .name(format!("channel-{}-recv", id))
            .spawn(move || match listener.accept() {
                Ok((stream, _)) => receive_loop(id, kind, stream, handler, outgoing, hook),
                Err(e) => {
                    error!(channel = id, error = %e, "Failed to accept channel connection");
                    disconnected(id, kind, &outgoing, &hook);
                }
            })?;
        channel.spawn_writer()?;
        Ok(channel)
    }

    /// Start the threads of a channel over an already connected stream.
    pub(crate) fn spawn_connected(
        id: u32,
        kind: ChannelKind,
        stream: UnixStream,
        handler: MessageHandler,
        on_disconnect: DisconnectHook,
    ) -> io::Result<Channel> {
        let channel = Channel::unconnected(id, kind, on_disconnect);
        let outgoing = channel.outgoing.clone();
        let hook = channel.on_disconnect.clone();
        thread::Builder::new()
            .name(format!("channel-{}-recv", id))
            .spawn(move || receive_loop(id, kind, stream, handler, outgoing, hook))?;
        channel.spawn_writer()?;
        Ok(channel)
    }

    fn unconnected(id: u32, kind: ChannelKind, on_disconnect: DisconnectHook) -> Channel {
        Channel {
            id,
            kind,
            outgoing: Arc::new(Monitor::new(Outgoing {
                queue: VecDeque::with_capacity(OUTGOING_CAPACITY),
                ..Outgoing::default()
            })),
            on_disconnect,
        }
    }

    fn spawn_writer(&self) -> io::Result<()> {
        let outgoing = self.outgoing.clone();
        let id = self.id;
        thread::Builder::new()
            .name(format!("channel-{}-send", id))
            .spawn(move || write_loop(id, outgoing))?;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Queue `message` for the writer thread and return immediately.
    ///
    /// Messages queued before the peer connects are sent once it does.
    ///
    /// A message too large to frame is logged and dropped.
    pub fn send(&self, message: Message) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    channel = self.id,
                    kind = message.type_name(),
                    error = %e,
                    "Dropping message that cannot be framed"
                );
                return;
            }
        };
        trace!(
            channel = self.id,
            kind = message.type_name(),
            fork = message.fork_id(),
            size = bytes.len(),
            hash = Message::hash_encoded(&bytes),
            "SendMessage"
        );
        let mut outgoing = self.outgoing.lock();
        if outgoing.closed {
            debug!(
                channel = self.id,
                kind = message.type_name(),
                "Dropping message for closed channel"
            );
            return;
        }
        outgoing.queue.push_back(bytes);
        self.outgoing.notify_all();
    }

    /// Send bytes that already hold one or more encoded messages.
    pub fn send_encoded(&self, bytes: Vec<u8>) {
        let mut outgoing = self.outgoing.lock();
        if outgoing.closed {
            return;
        }
        outgoing.queue.push_back(bytes);
        self.outgoing.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing.lock().connected
    }

    pub fn is_closed(&self) -> bool {
        self.outgoing.lock().closed
    }

    /// Messages fully written to the socket so far.
    pub fn messages_sent(&self) -> u64 {
        self.outgoing.lock().messages_sent
    }

    /// Run the disconnect hook unless the peer connects before `deadline`.
    pub fn exit_if_not_connected_before(&self, deadline: Instant) -> io::Result<()> {
        let outgoing = self.outgoing.clone();
        let hook = self.on_disconnect.clone();
        let id = self.id;
        thread::Builder::new()
            .name(format!("channel-{}-deadline", id))
            .spawn(move || {
                let mut state = outgoing.lock();
                let connected =
                    outgoing.wait_while_until(&mut state, deadline, |o| !o.connected && !o.closed);
                let closed = state.closed;
                drop(state);
                if !connected && !closed {
                    warn!(channel = id, "Channel not connected before deadline, exiting");
                    hook();
                }
            })?;
        Ok(())
    }
}

fn receive_loop(
    id: u32,
    kind: ChannelKind,
    mut stream: UnixStream,
    handler: MessageHandler,
    outgoing: Arc<Monitor<Outgoing>>,
    hook: DisconnectHook,
) {
    match stream.try_clone() {
        Ok(writer) => {
            let mut state = outgoing.lock();
            state.stream = Some(writer);
            state.connected = true;
            outgoing.notify_all();
        }
        Err(e) => {
            error!(channel = id, error = %e, "Failed to clone channel socket");
            disconnected(id, kind, &outgoing, &hook);
            return;
        }
    }
    debug!(channel = id, ?kind, "Channel connected");

    loop {
        match Message::read_from(&mut stream) {
            Ok(Some(message)) => {
                trace!(
                    channel = id,
                    kind = message.type_name(),
                    fork = message.fork_id(),
                    size = message.size(),
                    "ReceiveMessage"
                );
                handler(message);
            }
            Ok(None) => break,
            Err(ReplayError::Protocol(e)) => {
                // The byte stream can no longer be trusted to stay in sync.
                error!(channel = id, error = %e, "Corrupt message on channel, aborting");
                std::process::abort();
            }
            Err(e) => {
                debug!(channel = id, error = %e, "Channel read failed");
                break;
            }
        }
    }

    disconnected(id, kind, &outgoing, &hook);
}

fn disconnected(
    id: u32,
    kind: ChannelKind,
    outgoing: &Monitor<Outgoing>,
    hook: &DisconnectHook,
) {
    {
        let mut state = outgoing.lock();
        state.closed = true;
        outgoing.notify_all();
    }
    if kind.exit_on_disconnect() {
        info!(channel = id, ?kind, "Channel disconnected, exiting");
        hook();
    } else {
        debug!(channel = id, ?kind, "Channel disconnected");
    }
}

fn write_loop(id: u32, outgoing: Arc<Monitor<Outgoing>>) {
    let mut stream = {
        let mut state = outgoing.lock();
        outgoing.wait_while(&mut state, |o| o.stream.is_none() && !o.closed);
        match state.stream.take() {
            Some(stream) => stream,
            None => return,
        }
    };

    // Swapped with the shared queue so neither side reallocates per batch.
    let mut batch: VecDeque<Vec<u8>> = VecDeque::with_capacity(OUTGOING_CAPACITY);
    loop {
        {
            let mut state = outgoing.lock();
            outgoing.wait_while(&mut state, |o| o.queue.is_empty() && !o.closed);
            if state.queue.is_empty() {
                return;
            }
            std::mem::swap(&mut state.queue, &mut batch);
        }

        for bytes in &batch {
            if let Err(e) = stream.write_all(bytes) {
                debug!(channel = id, error = %e, "Channel write failed");
                let mut state = outgoing.lock();
                state.closed = true;
                state.queue.clear();
                outgoing.notify_all();
                return;
            }
        }

        let written = batch.len() as u64;
        batch.clear();
        let mut state = outgoing.lock();
        state.messages_sent += written;
        outgoing.notify_all();
    }
}
