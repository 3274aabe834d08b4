use serde::{Deserialize, Serialize};

/// Channel counters as seen by one reader.
///
/// `total` and `dropped` come straight from the shared header and are the
/// producer's authoritative numbers; `missed` is this reader's lag behind
/// the live edge. Serializable for reporting at API boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Frames published on the channel since the producer initialized it.
    pub total: u32,
    /// Frames the producer refused because the write-gate was held.
    pub dropped: u32,
    /// Frames published but not yet consumed by this reader.
    pub missed: u32,
}
