use crate::errors::TransportError;
use crate::layout::{FrameMeta, MAX_FRAME_SIZE, META_SIZE, RING_SIZE};
use crate::names::ChannelNames;
use crate::semaphore::{Semaphore, SemaphoreError};
use crate::shm::SharedRegion;
use crate::stats::ChannelStats;
use nix::errno::Errno;
use std::ptr;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Reading side of one channel.
///
/// Attaching starts at the live edge: the first poll after attach returns
/// nothing until the producer publishes again. A consumer that polls slower
/// than the producer publishes does not see intermediate frames; the gap is
/// accounted, per reader, as missed frames.
#[derive(Debug)]
pub struct Consumer {
    region: SharedRegion,
    read_signal: Semaphore,
    // Held open for the lifetime of the attachment; readers never acquire it.
    _write_gate: Semaphore,
    channel: u32,
    reader_id: u32,
    last_seen_count: u32,
    missed_total: u32,
}

impl Consumer {
    /// Attach to an existing channel.
    ///
    /// The region is validated before this reader is counted, so a failed
    /// attach leaves `active_readers` untouched. Absent objects map to
    /// [`TransportError::NotReady`], which is retryable once a producer
    /// comes up.
    pub fn attach(channel: u32) -> Result<Self, TransportError> {
        let names = ChannelNames::for_channel(channel);

        let region = SharedRegion::open(&names.region)?;

        let write_gate = match Semaphore::open(&names.write_gate) {
            Ok(sem) => sem,
            Err(SemaphoreError::Os(Errno::ENOENT)) => return Err(TransportError::NotReady),
            Err(e) => return Err(e.into()),
        };
        let read_signal = match Semaphore::open(&names.read_signal) {
            Ok(sem) => sem,
            Err(SemaphoreError::Os(Errno::ENOENT)) => return Err(TransportError::NotReady),
            Err(e) => return Err(e.into()),
        };

        let header = region.header();
        let last_seen_count = header.frame_count.load(Ordering::Acquire);
        let reader_id = std::process::id();
        header.active_readers.fetch_add(1, Ordering::AcqRel);

        tracing::info!(
            channel,
            reader_id,
            starting_count = last_seen_count,
            "consumer attached"
        );

        Ok(Self {
            region,
            read_signal,
            _write_gate: write_gate,
            channel,
            reader_id,
            last_seen_count,
            missed_total: 0,
        })
    }

    /// Non-blocking check for a new frame.
    ///
    /// Returns `Ok(None)` when nothing was published since the last call.
    /// Otherwise the newest frame's payload is copied into `buf`, the gap
    /// since the previous call is added to the missed counter, and the
    /// frame's metadata is returned. `buf` must hold [`MAX_FRAME_SIZE`]
    /// bytes.
    ///
    /// The returned frame is the newest at some moment between call and
    /// return; the producer may advance again while the copy is in flight,
    /// and `meta.sequence` identifies exactly which frame was read.
    pub fn poll(&mut self, buf: &mut [u8]) -> Result<Option<FrameMeta>, TransportError> {
        if buf.len() < MAX_FRAME_SIZE {
            return Err(TransportError::InvalidArgument(
                "output buffer smaller than MAX_FRAME_SIZE",
            ));
        }

        let header = self.region.header();
        let sampled = header.frame_count.load(Ordering::Acquire);
        if sampled == self.last_seen_count {
            return Ok(None);
        }

        let idx = header.write_idx.load(Ordering::Acquire).wrapping_sub(1) % RING_SIZE;
        let base = self.region.slot_base(idx);

        let mut meta = unsafe { ptr::read_volatile(base as *const FrameMeta) };
        // Clamp before copying: a torn size read during ring wrap must not
        // run past the slot.
        let len = (meta.size as usize).min(MAX_FRAME_SIZE);
        meta.size = len as u32;
        unsafe {
            ptr::copy_nonoverlapping(base.add(META_SIZE), buf.as_mut_ptr(), len);
        }

        let missed = sampled.wrapping_sub(self.last_seen_count).wrapping_sub(1);
        self.missed_total = self.missed_total.wrapping_add(missed);
        self.last_seen_count = sampled;

        Ok(Some(meta))
    }

    /// Block until the producer signals a publication, then poll.
    ///
    /// `None` waits forever; `Some(t)` waits until an absolute deadline `t`
    /// from now and returns `Ok(None)` on timeout. A wake-up that finds no
    /// newer frame also returns `Ok(None)`: the read-signal counts
    /// publications, not per-reader deliveries, so its count can run ahead
    /// of frame newness. An interrupting signal surfaces as
    /// [`TransportError::Transient`].
    pub fn wait(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<FrameMeta>, TransportError> {
        if buf.len() < MAX_FRAME_SIZE {
            return Err(TransportError::InvalidArgument(
                "output buffer smaller than MAX_FRAME_SIZE",
            ));
        }

        match timeout {
            None => self.read_signal.acquire().map_err(transient)?,
            Some(t) => {
                if !self.read_signal.acquire_timeout(t).map_err(transient)? {
                    return Ok(None);
                }
            }
        }

        self.poll(buf)
    }

    /// Counter snapshot: channel totals plus this reader's lag.
    pub fn stats(&self) -> ChannelStats {
        let header = self.region.header();
        let total = header.frame_count.load(Ordering::Acquire);
        ChannelStats {
            total,
            dropped: header.dropped_frames.load(Ordering::Relaxed),
            missed: if total > self.last_seen_count {
                total - self.last_seen_count
            } else {
                0
            },
        }
    }

    /// Frames published but never returned by this reader since attach.
    pub fn missed_since_attach(&self) -> u32 {
        self.missed_total
    }

    /// Number of currently attached readers, this one included.
    pub fn active_readers(&self) -> u32 {
        self.region.header().active_readers.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn reader_id(&self) -> u32 {
        self.reader_id
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.region
            .header()
            .active_readers
            .fetch_sub(1, Ordering::AcqRel);
        tracing::info!(
            channel = self.channel,
            reader_id = self.reader_id,
            last_seen_count = self.last_seen_count,
            missed = self.missed_total,
            "consumer detached"
        );
        // never unlink: the producer owns the names
    }
}

fn transient(err: SemaphoreError) -> TransportError {
    match err {
        SemaphoreError::Os(e) => TransportError::Transient(e),
        SemaphoreError::InvalidName => TransportError::InvalidArgument("semaphore name"),
    }
}
