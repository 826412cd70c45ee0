// OS transport handles: unix sockets for channels, a pipe for fork announcements.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// How many times a connecting side retries before giving up.
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Socket a listening process with `pid` opens for channel `channel_id`.
pub fn socket_path(dir: &Path, pid: u32, channel_id: u32) -> PathBuf {
    dir.join(format!("replay-ipc-{}-{}.sock", pid, channel_id))
}

/// Bind a listening socket at `path`, replacing any stale socket file.
pub fn listen(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Failed to bind channel socket at {}: {}", path.display(), e),
        )
    })
}

/// Connect to the socket at `path`. The listening side may still be starting
/// up, so missing or refusing sockets are retried for a short while.
pub fn connect(path: &Path) -> io::Result<UnixStream> {
    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                last_error = Some(e);
                thread::sleep(CONNECT_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
    let e = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound));
    Err(io::Error::new(
        e.kind(),
        format!("Failed to connect to channel socket at {}: {}", path.display(), e),
    ))
}

/// A fork announcement written by a new fork to its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkAnnouncement {
    pub pid: u32,
    pub fork_id: u32,
}

impl ForkAnnouncement {
    /// Size of one record on the pipe. Well under `PIPE_BUF`, so each
    /// announcement is written atomically even with many forks writing.
    pub const SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&self.pid.to_le_bytes());
        bytes[4..].copy_from_slice(&self.fork_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            pid: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fork_id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// The pipe forks use to announce themselves to the root process.
/// Both ends survive `fork()`, so every descendant writes to the same reader.
#[derive(Debug)]
pub struct AnnouncementPipe {
    reader: File,
    writer: File,
}

impl AnnouncementPipe {
    pub fn new() -> io::Result<Self> {
        let (read_fd, write_fd) = create_pipe()?;
        Ok(Self {
            reader: File::from(read_fd),
            writer: File::from(write_fd),
        })
    }

    pub fn announce(&self, announcement: ForkAnnouncement) -> io::Result<()> {
        (&self.writer).write_all(&announcement.to_bytes())
    }

    /// Block until the next announcement arrives.
    pub fn next(&self) -> io::Result<ForkAnnouncement> {
        let mut bytes = [0u8; ForkAnnouncement::SIZE];
        (&self.reader).read_exact(&mut bytes)?;
        Ok(ForkAnnouncement::from_bytes(bytes))
    }
}

/// A plain byte pipe, returned as (read end, write end).
pub fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(target_os = "linux")]
    let rv = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(target_os = "linux"))]
    let rv = unsafe { libc::pipe(fds.as_mut_ptr()) };

    if rv != 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}
