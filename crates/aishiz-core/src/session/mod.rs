//! Session identity, per-session records and the process-wide registry.

mod record;
mod registry;

pub use record::SessionHandle;
pub(crate) use record::{LoadedEngine, SessionRecord};
pub use registry::SessionRegistry;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle callers use to refer to a session after creation.
///
/// Ids are unique for the process lifetime and strictly increasing;
/// `0` is reserved for [`SessionId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Returned by `start_generation` when a request is rejected up front.
    pub const INVALID: SessionId = SessionId(0);

    /// Allocate the next id. Never returns `INVALID` and never repeats.
    pub(crate) fn next() -> Self {
        SessionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id that crossed a boundary as a raw integer.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        SessionId(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> u64 {
        id.0
    }
}
