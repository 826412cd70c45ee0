// Anonymous memory mappings made before they are needed.
// The crash path copies diagnostics out of here without allocating.

use std::fmt::Debug;
use std::io;
use std::ptr;
use std::ptr::NonNull;

/// A mapped memory region that outlives any single operation on it.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Overwrite the start of the region with `bytes` followed by a NUL,
    /// truncating to fit. Returns the number of payload bytes written.
    fn write_terminated(&self, bytes: &[u8]) -> usize {
        let size = self.size();
        if size == 0 {
            return 0;
        }
        let len = bytes.len().min(size - 1);
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_ptr(), len);
            ptr::write_volatile(self.as_ptr().add(len), 0);
        }
        len
    }

    /// Copy bytes from the start of the region up to the first NUL into `out`.
    /// Only volatile reads are used; no allocation happens if `out` has room.
    fn read_terminated(&self, out: &mut Vec<u8>) {
        out.clear();
        for i in 0..self.size() {
            let byte = unsafe { ptr::read_volatile(self.as_ptr().add(i)) };
            if byte == 0 {
                break;
            }
            out.push(byte);
        }
    }

    /// Copy bytes up to the first NUL into `out`, stopping when `out` is
    /// full. Returns the number of bytes copied.
    fn copy_terminated(&self, out: &mut [u8]) -> usize {
        let limit = out.len().min(self.size());
        for i in 0..limit {
            let byte = unsafe { ptr::read_volatile(self.as_ptr().add(i)) };
            if byte == 0 {
                return i;
            }
            out[i] = byte;
        }
        limit
    }

    /// Zero the region.
    fn clear(&self) {
        unsafe { ptr::write_bytes(self.as_ptr(), 0, self.size()) };
    }
}

/// Whether a mapping is inherited as shared or copy-on-write by forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Each fork gets its own copy once it writes.
    Private,
    /// Writes are visible to every process in the fork tree.
    Shared,
}

/// Map `size` bytes of zeroed anonymous memory.
#[cfg(unix)]
pub fn create_anonymous_memory(
    size: usize,
    sharing: Sharing,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(AnonymousMemory::create(size, sharing)?))
}

#[cfg(not(unix))]
pub fn create_anonymous_memory(
    _size: usize,
    _sharing: Sharing,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Anonymous mappings only supported on unix",
    ))
}

#[cfg(unix)]
#[derive(Debug)]
pub struct AnonymousMemory {
    ptr: NonNull<u8>,
    size: usize,
    sharing: Sharing,
}

#[cfg(unix)]
unsafe impl Send for AnonymousMemory {}
#[cfg(unix)]
unsafe impl Sync for AnonymousMemory {}

#[cfg(unix)]
impl AnonymousMemory {
    pub fn create(size: usize, sharing: Sharing) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Anonymous mapping must not be empty",
            ));
        }

        let flags = match sharing {
            Sharing::Private => libc::MAP_ANON | libc::MAP_PRIVATE,
            Sharing::Shared => libc::MAP_ANON | libc::MAP_SHARED,
        };

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping")
        })?;

        Ok(Self { ptr, size, sharing })
    }

    pub fn sharing(&self) -> Sharing {
        self.sharing
    }
}

#[cfg(unix)]
impl Drop for AnonymousMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(unix)]
impl SharedMemoryBackend for AnonymousMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }
}
