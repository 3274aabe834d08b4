use crate::errors::TransportError;
use crate::layout::{FrameMeta, MAX_FRAME_SIZE, META_SIZE, REGION_SIZE, RING_SIZE};
use crate::names::ChannelNames;
use crate::semaphore::Semaphore;
use crate::shm::SharedRegion;
use nix::time::{ClockId, clock_gettime};
use std::ptr;
use std::sync::atomic::Ordering;

/// Outcome of a publish attempt. Both variants are success: a drop is the
/// real-time policy doing its job, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The frame is in a slot and visible to readers.
    Published,
    /// The write-gate was held; the frame was discarded and counted.
    Dropped,
}

/// Publishing side of one channel.
///
/// Creating a producer takes ownership of the channel: any stale region or
/// semaphores left by a crashed predecessor are unlinked and rebuilt from
/// scratch. Dropping the producer logs the cumulative counters and unlinks
/// all three names.
pub struct Producer {
    region: SharedRegion,
    write_gate: Semaphore,
    read_signal: Semaphore,
    names: ChannelNames,
    channel: u32,
    sequence: u32,
}

impl Producer {
    /// Create the shared region and both semaphores for `channel`.
    ///
    /// The write-gate starts at 1 (idle) and the read-signal at 0. Stale
    /// objects of the same names are removed first, so recovery from a
    /// crashed producer needs no operator intervention.
    pub fn create(channel: u32) -> Result<Self, TransportError> {
        let names = ChannelNames::for_channel(channel);

        let region = SharedRegion::create(&names.region)?;

        let _ = Semaphore::unlink(&names.write_gate);
        let _ = Semaphore::unlink(&names.read_signal);

        let write_gate = match Semaphore::create(&names.write_gate, 1) {
            Ok(sem) => sem,
            Err(e) => {
                SharedRegion::unlink(&names.region);
                return Err(e.into());
            }
        };

        let read_signal = match Semaphore::create(&names.read_signal, 0) {
            Ok(sem) => sem,
            Err(e) => {
                let _ = Semaphore::unlink(&names.write_gate);
                SharedRegion::unlink(&names.region);
                return Err(e.into());
            }
        };

        tracing::info!(
            channel,
            region = %names.region,
            region_size = REGION_SIZE,
            ring_size = RING_SIZE,
            "producer initialized"
        );

        Ok(Self {
            region,
            write_gate,
            read_signal,
            names,
            channel,
            sequence: 0,
        })
    }

    /// Publish one frame without ever blocking.
    ///
    /// `meta.sequence` and `meta.size` are overwritten by the producer; a
    /// zero `meta.timestamp_ms` is replaced with the current monotonic
    /// milliseconds. If the write-gate cannot be taken immediately the
    /// frame is discarded, `dropped_frames` is incremented and
    /// [`PublishOutcome::Dropped`] is returned.
    pub fn publish(
        &mut self,
        payload: &[u8],
        meta: &FrameMeta,
    ) -> Result<PublishOutcome, TransportError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(TransportError::InvalidArgument(
                "payload exceeds MAX_FRAME_SIZE",
            ));
        }

        let header = self.region.header();

        // Any failed non-blocking attempt is a drop; the encoder never waits.
        if !self.write_gate.try_acquire().unwrap_or(false) {
            header.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return Ok(PublishOutcome::Dropped);
        }

        let idx = header.write_idx.load(Ordering::Relaxed) % RING_SIZE;

        let mut slot_meta = *meta;
        slot_meta.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        slot_meta.size = payload.len() as u32;
        if slot_meta.timestamp_ms == 0 {
            slot_meta.timestamp_ms = monotonic_ms();
        }

        let base = self.region.slot_base(idx);
        unsafe {
            ptr::copy_nonoverlapping(
                (&slot_meta as *const FrameMeta).cast::<u8>(),
                base,
                META_SIZE,
            );
            ptr::copy_nonoverlapping(payload.as_ptr(), base.add(META_SIZE), payload.len());
        }

        // Publication point: slot bytes, then write_idx, then frame_count.
        header.write_idx.fetch_add(1, Ordering::Release);
        header.frame_count.fetch_add(1, Ordering::Release);

        let _ = self.write_gate.post();
        let _ = self.read_signal.post();

        Ok(PublishOutcome::Published)
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Sequence number the next published frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// Authoritative count of frames published on this channel.
    pub fn published_total(&self) -> u32 {
        self.region.header().frame_count.load(Ordering::Acquire)
    }

    /// Authoritative count of frames refused at the write-gate.
    pub fn dropped_total(&self) -> u32 {
        self.region.header().dropped_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn active_readers(&self) -> u32 {
        self.region.header().active_readers.load(Ordering::Acquire)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        tracing::info!(
            channel = self.channel,
            total_frames = self.published_total(),
            dropped = self.dropped_total(),
            active_readers = self.active_readers(),
            "destroying producer"
        );

        let _ = Semaphore::unlink(&self.names.read_signal);
        let _ = Semaphore::unlink(&self.names.write_gate);
        SharedRegion::unlink(&self.names.region);
        // handles and the mapping close when the remaining fields drop
    }
}

fn monotonic_ms() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1000 + ts.tv_nsec() as u64 / 1_000_000,
        Err(_) => 0,
    }
}
