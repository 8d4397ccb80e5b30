//! Cross-process counter surface.
//!
//! # Data Flow
//! ```text
//! LaunchPlan stat declarations
//!     → layout (slot index per (group, bucket, name), frozen pre-fork)
//!     → region.rs (one anonymous MAP_SHARED mapping, one AtomicU64 per slot)
//!     → bucket.rs (write handles used inside workers and daemons)
//!     → aggregate.rs (read-side fold into the stats report JSON)
//! ```
//!
//! # Design Decisions
//! - Updates are atomic per counter; no locks cross the process boundary
//! - Slots are indexed by (group, name, bucket), never by pid, so values
//!   survive a worker restart
//! - Undeclared names read zero and ignore writes, which keeps handlers
//!   forward-compatible with older configurations

pub mod aggregate;
pub mod bucket;
pub mod region;

pub use bucket::{BucketStats, GroupSpec, StatDecl, StatKind, Stats, StatsSet};
pub use region::SharedRegion;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as whole seconds since the epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
