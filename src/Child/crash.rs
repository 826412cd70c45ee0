// Crash notes, fatal error text and fault detection.
//
// Everything a crash report needs is written ahead of time into a mapping
// made at startup, and the report frame is encoded into a buffer reserved at
// the same time. The mapping is copy-on-write across `fork`, so every process
// in a fork tree reports its own notes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::Core::SharedMemory::{create_anonymous_memory, SharedMemoryBackend, Sharing};
use crate::Core::Socket::create_pipe;
use crate::Protocol::layout::{MessageHeader, HEADER_SIZE};
use crate::Protocol::MessageType;

/// Size of the preallocated diagnostic region.
pub const FATAL_ERROR_MEMORY_SIZE: usize = 4 * 4096;

/// Longest diagnostic sent in a single fatal error message.
const DIAGNOSTIC_CAPACITY: usize = 2048;

/// Room for the header, the diagnostic or fault description, and the NUL.
const FRAME_CAPACITY: usize = HEADER_SIZE + DIAGNOSTIC_CAPACITY + 64;

pub struct CrashReporter {
    memory: Box<dyn SharedMemoryBackend>,
    notes: Mutex<Vec<String>>,
    frame: Mutex<Vec<u8>>,
}

impl CrashReporter {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            memory: create_anonymous_memory(FATAL_ERROR_MEMORY_SIZE, Sharing::Private)?,
            notes: Mutex::new(Vec::new()),
            frame: Mutex::new(Vec::with_capacity(FRAME_CAPACITY)),
        })
    }

    /// Describe what the process is about to do, until the matching `pop_note`.
    pub fn push_note(&self, note: &str) {
        let mut notes = self.notes.lock();
        notes.push(note.to_string());
        self.mirror(&notes);
    }

    pub fn pop_note(&self) -> Option<String> {
        let mut notes = self.notes.lock();
        let note = notes.pop();
        self.mirror(&notes);
        note
    }

    /// Replace the innermost note, or push one if there is none.
    pub fn set_note(&self, note: &str) {
        let mut notes = self.notes.lock();
        match notes.last_mut() {
            Some(top) => *top = note.to_string(),
            None => notes.push(note.to_string()),
        }
        self.mirror(&notes);
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }

    fn mirror(&self, notes: &[String]) {
        let joined = notes.join(" > ");
        self.memory.write_terminated(joined.as_bytes());
    }

    /// Store the text of a fatal error so the crash report carries it.
    pub fn record_fatal(&self, text: &str) {
        self.memory.write_terminated(text.as_bytes());
    }

    /// Text currently held in the diagnostic region.
    pub fn recorded(&self) -> String {
        let mut text = Vec::new();
        self.memory.read_terminated(&mut text);
        String::from_utf8_lossy(&text).into_owned()
    }

    /// Encode the `FatalError` frame for a fault and clear the region.
    ///
    /// The frame carries the recorded text when there is any, otherwise it
    /// names the fault. The first report in a process is built in the buffer
    /// reserved by `new` and does not touch the heap.
    pub fn take_fatal_frame(&self, fault: Fault, fork_id: u32) -> Vec<u8> {
        let mut frame = std::mem::take(&mut *self.frame.lock());
        frame.clear();
        frame.resize(HEADER_SIZE + DIAGNOSTIC_CAPACITY, 0);
        let len = self.memory.copy_terminated(&mut frame[HEADER_SIZE..]);
        // A cut at the capacity may split a character.
        let len = match std::str::from_utf8(&frame[HEADER_SIZE..HEADER_SIZE + len]) {
            Ok(_) => len,
            Err(e) => e.valid_up_to(),
        };
        frame.truncate(HEADER_SIZE + len);
        if len == 0 {
            let _ = write!(
                &mut frame,
                "Fault {:#x} (signal {})",
                fault.address, fault.signal
            );
        }
        frame.push(0);
        self.memory.clear();

        let header = MessageHeader {
            size: frame.len() as u32,
            flags: 0,
            kind: MessageType::FatalError.as_u16(),
            fork_id,
        };
        frame[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        frame
    }
}

/// A hardware or OS level fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub signal: i32,
    pub address: usize,
}

impl Fault {
    const SIZE: usize = 16;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..8].copy_from_slice(&(self.signal as i64).to_le_bytes());
        bytes[8..].copy_from_slice(&(self.address as u64).to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut signal = [0u8; 8];
        let mut address = [0u8; 8];
        signal.copy_from_slice(&bytes[..8]);
        address.copy_from_slice(&bytes[8..]);
        Self {
            signal: i64::from_le_bytes(signal) as i32,
            address: u64::from_le_bytes(address) as usize,
        }
    }
}

pub type FaultHandler = Box<dyn Fn(Fault) + Send + 'static>;

/// Source of fault notifications, one implementation per platform.
///
/// Faults are handed to `on_fault` on a dedicated thread that takes no part
/// in the recorded execution. The faulting thread itself never returns.
pub trait CrashObserver: Send + Sync {
    fn start(&self, on_fault: FaultHandler) -> io::Result<()>;

    /// Called in a new fork. The observer thread did not survive `fork`, so
    /// faults in the fork must be picked up by a fresh one.
    fn restart_after_fork(&self, on_fault: FaultHandler) -> io::Result<()>;
}

/// Write end of the pipe signal handlers report faults on.
static FAULT_PIPE: AtomicI32 = AtomicI32::new(-1);
/// Read end, owned by the observer thread.
static FAULT_PIPE_READER: AtomicI32 = AtomicI32::new(-1);

/// POSIX signal based fault detection.
#[derive(Debug, Clone)]
pub struct SignalCrashObserver {
    signals: Vec<libc::c_int>,
}

impl Default for SignalCrashObserver {
    fn default() -> Self {
        Self {
            signals: vec![libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE],
        }
    }
}

impl SignalCrashObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signals(signals: Vec<libc::c_int>) -> Self {
        Self { signals }
    }

    /// Whether some observer has been started in this process.
    pub fn is_installed() -> bool {
        FAULT_PIPE.load(Ordering::Acquire) >= 0
    }
}

extern "C" fn on_fault_signal(
    signal: libc::c_int,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    #[cfg(target_os = "linux")]
    let address = if info.is_null() {
        0
    } else {
        unsafe { (*info).si_addr() as usize }
    };
    #[cfg(not(target_os = "linux"))]
    let address = if info.is_null() {
        0
    } else {
        unsafe { (*info).si_addr as usize }
    };

    let record = Fault { signal, address }.to_bytes();
    let fd = FAULT_PIPE.load(Ordering::Acquire);
    if fd >= 0 {
        unsafe {
            libc::write(fd, record.as_ptr() as *const libc::c_void, record.len());
        }
    }
    // Park the faulting thread until the process is terminated.
    loop {
        unsafe {
            libc::pause();
        }
    }
}

impl CrashObserver for SignalCrashObserver {
    fn start(&self, on_fault: FaultHandler) -> io::Result<()> {
        if Self::is_installed() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "A crash observer is already running",
            ));
        }

        spawn_fault_reader(on_fault)?;

        for &signal in &self.signals {
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_fault_signal as usize;
                action.sa_flags = libc::SA_SIGINFO;
                libc::sigemptyset(&mut action.sa_mask);
                if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    fn restart_after_fork(&self, on_fault: FaultHandler) -> io::Result<()> {
        // Both ends still belong to the parent's observer; the handlers
        // installed by `start` are inherited and keep working.
        for pipe in [&FAULT_PIPE, &FAULT_PIPE_READER] {
            let fd = pipe.swap(-1, Ordering::AcqRel);
            if fd >= 0 {
                drop(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
        spawn_fault_reader(on_fault)
    }
}

/// Open a fresh fault pipe and start the thread that reads it.
fn spawn_fault_reader(on_fault: FaultHandler) -> io::Result<()> {
    let (read_fd, write_fd) = create_pipe()?;
    let read_fd = read_fd.into_raw_fd();
    FAULT_PIPE_READER.store(read_fd, Ordering::Release);
    FAULT_PIPE.store(write_fd.into_raw_fd(), Ordering::Release);
    let mut reader = unsafe { File::from_raw_fd(read_fd) };

    thread::Builder::new()
        .name("crash-observer".to_string())
        .spawn(move || {
            let mut bytes = [0u8; Fault::SIZE];
            loop {
                match reader.read_exact(&mut bytes) {
                    Ok(()) => {
                        let fault = Fault::from_bytes(bytes);
                        // Report before logging; the faulting thread may hold
                        // the allocator.
                        on_fault(fault);
                        error!(signal = fault.signal, address = fault.address, "Fault detected");
                    }
                    Err(e) => {
                        debug!(error = %e, "Crash observer pipe closed");
                        return;
                    }
                }
            }
        })?;
    Ok(())
}
