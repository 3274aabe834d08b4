use crate::errors::TransportError;
use crate::layout::{MAGIC, REGION_SIZE, RegionHeader, VERSION, slot_offset};
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use std::fs::File;
use std::sync::atomic::Ordering;

/// A channel's mapped shared region.
///
/// The producer creates it (authoritatively replacing any stale object left
/// by a crashed predecessor); consumers open it read-write because they
/// mutate the `active_readers` counter. Only the producer unlinks the name.
#[derive(Debug)]
pub(crate) struct SharedRegion {
    _mmap: MmapMut,
    _file: File,
    base: *mut u8,
}

// SAFETY: the mapping is shared between processes. Header fields are
// atomics; slot bytes are written only while the producer holds the
// write-gate and become visible through the Release store on `frame_count`.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Unlink any stale object of the same name, then create, size, map and
    /// zero a fresh region. `magic`/`version` are installed last, so a
    /// concurrently attaching consumer never validates a half-built header.
    pub(crate) fn create(name: &str) -> Result<Self, TransportError> {
        match shm_unlink(name) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(TransportError::resource("shm_unlink", e)),
        }

        match Self::create_fresh(name) {
            Ok(region) => Ok(region),
            Err(e) => {
                let _ = shm_unlink(name);
                Err(e)
            }
        }
    }

    fn create_fresh(name: &str) -> Result<Self, TransportError> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|e| TransportError::resource("shm_open", e))?;
        let file = File::from(fd);

        file.set_len(REGION_SIZE as u64)
            .map_err(|e| TransportError::resource_io("ftruncate", e))?;

        let mut mmap = unsafe { MmapOptions::new().len(REGION_SIZE).map_mut(&file) }
            .map_err(|e| TransportError::resource_io("mmap", e))?;

        mmap.fill(0);
        let base = mmap.as_mut_ptr();

        let region = Self {
            _mmap: mmap,
            _file: file,
            base,
        };
        let header = region.header();
        header.version.store(VERSION, Ordering::Release);
        header.magic.store(MAGIC, Ordering::Release);
        Ok(region)
    }

    /// Open and validate an existing region.
    ///
    /// An absent object, an undersized object, or an all-zero header all
    /// mean "no producer finished initializing yet" and map to `NotReady`;
    /// any other magic/version combination is a protocol mismatch.
    pub(crate) fn open(name: &str) -> Result<Self, TransportError> {
        let fd = match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENOENT) => return Err(TransportError::NotReady),
            Err(e) => return Err(TransportError::resource("shm_open", e)),
        };
        let file = File::from(fd);

        let metadata = file
            .metadata()
            .map_err(|e| TransportError::resource_io("fstat", e))?;
        if metadata.len() < REGION_SIZE as u64 {
            return Err(TransportError::NotReady);
        }

        let mut mmap = unsafe { MmapOptions::new().len(REGION_SIZE).map_mut(&file) }
            .map_err(|e| TransportError::resource_io("mmap", e))?;
        let base = mmap.as_mut_ptr();
        let region = Self {
            _mmap: mmap,
            _file: file,
            base,
        };

        let header = region.header();
        let magic = header.magic.load(Ordering::Acquire);
        let version = header.version.load(Ordering::Acquire);
        if magic == 0 && version == 0 {
            return Err(TransportError::NotReady);
        }
        if magic != MAGIC || version != VERSION {
            return Err(TransportError::VersionMismatch { magic, version });
        }

        Ok(region)
    }

    /// Remove the name from the shared memory name table. Existing mappings
    /// stay valid until unmapped.
    pub(crate) fn unlink(name: &str) {
        match shm_unlink(name) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => tracing::warn!("shm_unlink {} failed: {}", name, e),
        }
    }

    pub(crate) fn header(&self) -> &RegionHeader {
        unsafe { &*(self.base as *const RegionHeader) }
    }

    /// Base address of the slot at `idx` (taken modulo the ring size); the
    /// metadata record sits first, the payload follows.
    pub(crate) fn slot_base(&self, idx: u32) -> *mut u8 {
        unsafe { self.base.add(slot_offset(idx)) }
    }
}
