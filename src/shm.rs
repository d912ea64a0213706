//! Shared-memory region plumbing for the message bus.
//!
//! The bus state lives in a file under `/dev/shm`, mapped read-write into
//! every attached process with `memmap2`. The region embeds its own
//! mutual-exclusion primitive: a spin lock backed by an `AtomicU32`, usable
//! from any process that maps the region. The lock is only ever held for
//! bounded queue/table manipulation, never across I/O.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

/// Where region files are created. tmpfs on Linux, so mappings are
/// genuinely memory-backed.
const SHM_DIR: &str = "/dev/shm";

static REGION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque attach token for a shared region; handed to spawned children at
/// spawn time (never over the bus itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionToken(PathBuf);

impl RegionToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RegionToken(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for RegionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A mapped shared-memory region of `len` bytes. The creating process gets
/// a zero-filled region; attachers map the existing file.
pub struct SharedRegion {
    mmap: MmapMut,
    token: RegionToken,
    len: usize,
}

impl SharedRegion {
    /// Create a fresh region file and map it. The file name embeds the
    /// creator's pid and a sequence number so concurrent simulations (and
    /// concurrent tests) never collide.
    pub fn create(len: usize) -> std::io::Result<Self> {
        let seq = REGION_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = Path::new(SHM_DIR).join(format!("flightbus-{}-{}.bus", std::process::id(), seq));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(len as u64)?;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self {
            mmap,
            token: RegionToken::new(path),
            len,
        })
    }

    /// Map an existing region file into this process.
    pub fn attach(token: &RegionToken, len: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(token.as_path())?;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self {
            mmap,
            token: token.clone(),
            len,
        })
    }

    pub fn token(&self) -> &RegionToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw base pointer of the mapping. Valid for the lifetime of `self`;
    /// callers layer their own `#[repr(C)]` view on top and are responsible
    /// for cross-process synchronization via [`RegionLock`].
    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Remove the backing file. Mappings held by other processes stay valid
    /// until they unmap; the name simply disappears.
    pub fn unlink(&self) -> std::io::Result<()> {
        std::fs::remove_file(self.token.as_path())
    }
}

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Process-shared mutual exclusion, stored inside the region it guards.
///
/// A plain compare-exchange spin lock: holders only ever do O(capacity)
/// in-memory work, so contention windows are tiny and spinning (with a
/// yield once the optimistic phase is over) is cheaper than any kernel
/// primitive that would need cross-process setup. A holder that dies
/// mid-section leaves the region locked — the same discipline the queue
/// demands of every semaphore-style guard.
#[repr(C)]
pub struct RegionLock {
    state: AtomicU32,
}

impl RegionLock {
    const SPIN_LIMIT: u32 = 64;

    pub fn acquire(&self) {
        let mut spins: u32 = 0;
        while self
            .state
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins = spins.wrapping_add(1);
            if spins < Self::SPIN_LIMIT {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    pub fn release(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_attach_share_bytes() {
        let region = SharedRegion::create(4096).expect("create region");
        let other = SharedRegion::attach(region.token(), 4096).expect("attach region");

        unsafe {
            *region.base_ptr() = 0xA5;
        }
        assert_eq!(unsafe { *other.base_ptr() }, 0xA5);

        region.unlink().expect("unlink");
        // The name is gone but the second mapping is still usable.
        assert_eq!(unsafe { *other.base_ptr() }, 0xA5);
        assert!(SharedRegion::attach(region.token(), 4096).is_err());
    }

    #[test]
    fn lock_excludes_across_threads() {
        use std::sync::Arc;

        let region = Arc::new(SharedRegion::create(4096).expect("create region"));
        // First bytes of the region serve as the lock, next as a counter.
        let lock = region.base_ptr() as *const RegionLock;
        let counter = unsafe { region.base_ptr().add(64) as *mut u64 };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let region = Arc::clone(&region);
            handles.push(std::thread::spawn(move || {
                let lock = unsafe { &*(region.base_ptr() as *const RegionLock) };
                let counter = unsafe { region.base_ptr().add(64) as *mut u64 };
                for _ in 0..10_000 {
                    lock.acquire();
                    unsafe { *counter += 1 };
                    lock.release();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread");
        }

        unsafe { &*lock }.acquire();
        assert_eq!(unsafe { *counter }, 40_000);
        unsafe { &*lock }.release();

        region.unlink().expect("unlink");
    }
}
