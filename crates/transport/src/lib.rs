//! Shared-memory video frame transport.
//!
//! One producer process publishes compressed video frames (H.264/H.265/JPEG)
//! into a ring of fixed-size slots inside a named POSIX shared memory object;
//! any number of unrelated reader processes on the same host attach to the
//! ring and copy frames out with sub-millisecond latency. Channels are
//! numbered and fully independent: each owns its own region and its own pair
//! of named semaphores.
//!
//! The producer never blocks. A publish either lands in the ring or is
//! counted as a drop, so the upstream encoder never stalls on IPC.
//! Readers are viewers, not archivists: a poll always returns the newest
//! frame and the gap since the previous poll is accounted as missed frames.

pub mod consumer;
pub mod errors;
pub mod layout;
pub mod names;
pub mod producer;
pub mod semaphore;
mod shm;
pub mod stats;

pub use consumer::Consumer;
pub use errors::TransportError;
pub use layout::{Codec, FrameMeta, MAX_FRAME_SIZE, RING_SIZE};
pub use names::ChannelNames;
pub use producer::{Producer, PublishOutcome};
pub use semaphore::Semaphore;
pub use stats::ChannelStats;
