use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;

use super::Channel::{exit_process_hook, Channel, ChannelKind, DisconnectHook, MessageHandler};
use crate::Core::Socket;

pub struct ChannelBuilder {
    kind: ChannelKind,
    channel_id: u32,
    socket_dir: PathBuf,
    pid: u32,
    on_disconnect: DisconnectHook,
}

impl ChannelBuilder {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            channel_id: 0,
            socket_dir: std::env::temp_dir(),
            pid: std::process::id(),
            on_disconnect: exit_process_hook(),
        }
    }

    pub fn with_channel_id(mut self, channel_id: u32) -> Self {
        self.channel_id = channel_id;
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Pid naming the socket: the listener's own pid, or the pid of the
    /// process a connecting side talks to.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Arc::new(hook);
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        Socket::socket_path(&self.socket_dir, self.pid, self.channel_id)
    }

    /// Listen or connect according to the channel kind.
    ///
    /// A listening channel returns as soon as its socket is bound; the peer
    /// may connect later. A connecting channel returns once connected.
    pub fn open(self, handler: MessageHandler) -> std::io::Result<Channel> {
        let path = self.socket_path();
        if self.kind.is_listener() {
            let listener = Socket::listen(&path)?;
            Channel::spawn_listening(
                self.channel_id,
                self.kind,
                listener,
                handler,
                self.on_disconnect,
            )
        } else {
            let stream = Socket::connect(&path)?;
            Channel::spawn_connected(
                self.channel_id,
                self.kind,
                stream,
                handler,
                self.on_disconnect,
            )
        }
    }

    /// Build a channel over a stream that is already connected.
    pub fn from_stream(
        self,
        stream: UnixStream,
        handler: MessageHandler,
    ) -> std::io::Result<Channel> {
        Channel::spawn_connected(
            self.channel_id,
            self.kind,
            stream,
            handler,
            self.on_disconnect,
        )
    }
}
