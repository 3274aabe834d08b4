use std::sync::atomic::AtomicU32;

/// SAFETY & MEMORY ORDERING:
///
/// These structs define the byte-exact layout of a channel's shared region.
/// The region starts with a 64-byte [`RegionHeader`] followed by
/// [`RING_SIZE`] slots of `META_SIZE + MAX_FRAME_SIZE` bytes each.
///
/// Writer protocol (one producer per channel):
/// 1. Copy metadata and payload bytes into the slot at `write_idx % RING_SIZE`
/// 2. Advance `write_idx`, then `frame_count`, both with `Ordering::Release`
///
/// Reader protocol (any number of consumers):
/// 1. Load `frame_count` with `Ordering::Acquire`
/// 2. If it moved, the slot at `(write_idx - 1) % RING_SIZE` is fully written,
///    unless more than `RING_SIZE` publications happened meanwhile (readers
///    that fall behind see the newest slot and account the gap as missed)
///
/// The increment of `frame_count` is the publication point: a reader that
/// observes the old count simply does not attempt a read. Mappings are
/// page-aligned and every field offset is a multiple of its alignment, so
/// the atomics are always properly aligned.
///
/// `magic`/`version` are stored exactly once when the producer initializes
/// the region and never change afterwards; consumers validate them before
/// touching anything else.
#[repr(C, align(8))]
pub struct RegionHeader {
    /// Identifies the protocol; always [`MAGIC`] once initialized.
    pub magic: AtomicU32,
    /// Protocol version; always [`VERSION`] once initialized.
    pub version: AtomicU32,
    /// Total writes since init; the live slot is `write_idx % RING_SIZE`.
    pub write_idx: AtomicU32,
    /// Reserved; declared for layout compatibility, never advanced.
    pub read_idx: AtomicU32,
    /// Total successfully published frames. Wraps at u32::MAX.
    pub frame_count: AtomicU32,
    /// Publications refused because the write-gate was held.
    pub dropped_frames: AtomicU32,
    /// Attached consumers; maintained with atomic add/sub from any process.
    pub active_readers: AtomicU32,
    /// Zeroed. Pads the header to exactly 64 bytes.
    pub reserved: [u8; 36],
}

/// Per-frame metadata record stored at the front of every slot.
///
/// Exactly 32 bytes. `reserved` makes the trailing padding explicit so the
/// layout never depends on the compiler.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    /// Capture time in monotonic milliseconds; 0 asks the producer to fill it.
    pub timestamp_ms: u64,
    /// Payload length in bytes, at most [`MAX_FRAME_SIZE`].
    pub size: u32,
    /// Monotonic counter assigned by the producer; wraps at u32::MAX.
    pub sequence: u32,
    /// 1 if the frame is independently decodable.
    pub is_keyframe: u8,
    /// Raw codec byte; see [`Codec`].
    pub codec: u8,
    pub width: u16,
    pub height: u16,
    /// Nominal frames per second.
    pub fps: u8,
    /// Must be zero.
    pub reserved: [u8; 9],
}

/// Compressed-frame codec carried in [`FrameMeta::codec`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264 = 0,
    H265 = 1,
    Jpeg = 2,
}

impl Codec {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Codec::H264),
            1 => Some(Codec::H265),
            2 => Some(Codec::Jpeg),
            _ => None,
        }
    }
}

impl From<Codec> for u8 {
    fn from(codec: Codec) -> u8 {
        codec as u8
    }
}

/// Identifies this protocol; spells "VIDE".
pub const MAGIC: u32 = 0x5649_4445;
/// Protocol version carried in every region header.
pub const VERSION: u32 = 1;
/// Slots per ring; about one second of video at 30 fps.
pub const RING_SIZE: u32 = 30;
/// Largest accepted payload (512 KiB, H.264 at 1080p headroom).
pub const MAX_FRAME_SIZE: usize = 512 * 1024;

pub const HEADER_SIZE: usize = 64;
pub const META_SIZE: usize = 32;
pub const SLOT_SIZE: usize = META_SIZE + MAX_FRAME_SIZE;
/// Total byte size of a channel's shared region.
pub const REGION_SIZE: usize = HEADER_SIZE + RING_SIZE as usize * SLOT_SIZE;

/// Byte offset of slot `idx` (taken modulo [`RING_SIZE`]) inside the region.
pub const fn slot_offset(idx: u32) -> usize {
    HEADER_SIZE + (idx as usize % RING_SIZE as usize) * SLOT_SIZE
}

const _: () = assert!(std::mem::size_of::<RegionHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<FrameMeta>() == META_SIZE);
const _: () = assert!(std::mem::align_of::<FrameMeta>() == 8);
const _: () = assert!(SLOT_SIZE % 8 == 0);
