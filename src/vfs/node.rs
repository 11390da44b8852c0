//! The VFS node content states (spec §3 "VFS Node"): a tagged union rather
//! than sentinels on a byte buffer, per spec §9's design note.

use std::sync::Arc;

/// The content state of one mounted file.
#[derive(Debug, Clone)]
pub enum VfsContent {
    /// Bytes are resident; terminal state.
    Eager(Arc<Vec<u8>>),
    /// The bundle body is resident; a slice will be taken on read.
    Lazy { bundle_id: String, start: u64, end: u64 },
    /// The bundle body is not resident; a byte-range fetch is required on
    /// read.
    Deferred { bundle_id: String, start: u64, end: u64 },
    /// An empty file, as mounted by the engine itself (e.g. a `.log` sink).
    Empty,
}

impl VfsContent {
    pub fn is_eager(&self) -> bool {
        matches!(self, VfsContent::Eager(_))
    }
}
