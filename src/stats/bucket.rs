//! Counter buckets and the write-side handles bound to them.
//!
//! Each sub-instance (and the daemons group) owns one *group* of buckets:
//! one bucket per worker, or one per daemon. A bucket is a row of named
//! slots, one per declared stat. Slot indexes are assigned when the layout
//! is built, before the first fork, and never reassigned while the parent
//! is alive.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::stats::region::SharedRegion;

/// How per-bucket values fold into an overall value for the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// Per-bucket only; no overall value is reported. Called `worker` for
    /// listener stats and `daemon` for daemon stats.
    Worker,
    /// Overall value is the saturating sum of every bucket.
    Sum,
    /// Overall value is the minimum. When `zero_missing` is set a zero
    /// bucket means "never set" and does not participate.
    Min { zero_missing: bool },
    /// Overall value is the maximum.
    Max,
}

impl StatKind {
    /// The kind used for timestamps such as `start_time`: a minimum where
    /// zero means the value was never recorded.
    pub fn timestamp_min() -> Self {
        StatKind::Min { zero_missing: true }
    }
}

/// A named stat and its aggregation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatDecl {
    pub name: String,
    pub kind: StatKind,
}

impl StatDecl {
    pub fn new(name: impl Into<String>, kind: StatKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Everything needed to allocate one group of buckets.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub bucket_names: Vec<String>,
    pub decls: Vec<StatDecl>,
}

/// Resolved slot positions for one group.
#[derive(Debug)]
struct GroupLayout {
    name: String,
    bucket_names: Vec<String>,
    decls: Vec<StatDecl>,
    /// Slot index of the group header (the parent-owned overall
    /// `start_time`); bucket slots follow it.
    base: usize,
}

/// The full counter surface: one shared region plus the frozen layout.
#[derive(Clone)]
pub struct StatsSet {
    region: Arc<SharedRegion>,
    groups: Arc<Vec<GroupLayout>>,
}

/// Slot 0 carries the wall-clock start of the whole server.
const SERVER_START_SLOT: usize = 0;

impl StatsSet {
    /// Allocate the shared region sized for the given groups and freeze the
    /// slot layout. Called by the parent before the first fork.
    pub fn create(specs: Vec<GroupSpec>) -> Result<Self> {
        let mut groups = Vec::with_capacity(specs.len());
        let mut next_slot = SERVER_START_SLOT + 1;
        for spec in specs {
            let base = next_slot;
            next_slot += 1 + spec.bucket_names.len() * spec.decls.len();
            groups.push(GroupLayout {
                name: spec.name,
                bucket_names: spec.bucket_names,
                decls: spec.decls,
                base,
            });
        }
        let region = SharedRegion::create(next_slot)?;
        Ok(Self {
            region: Arc::new(region),
            groups: Arc::new(groups),
        })
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Handle for the group at `index`.
    pub fn group(&self, index: usize) -> BucketStats {
        assert!(index < self.groups.len(), "stat group {index} out of range");
        BucketStats {
            region: Arc::clone(&self.region),
            groups: Arc::clone(&self.groups),
            index,
        }
    }

    /// Handle for a group by its sub-instance name.
    pub fn group_by_name(&self, name: &str) -> Option<BucketStats> {
        self.groups
            .iter()
            .position(|g| g.name == name)
            .map(|index| self.group(index))
    }

    /// Iterate over every group handle in declaration order.
    pub fn groups(&self) -> impl Iterator<Item = BucketStats> + '_ {
        (0..self.groups.len()).map(|index| self.group(index))
    }

    pub fn server_start_time(&self) -> u64 {
        self.region.slot(SERVER_START_SLOT).load(Ordering::Relaxed)
    }

    pub fn set_server_start_time(&self, epoch_secs: u64) {
        self.region
            .slot(SERVER_START_SLOT)
            .store(epoch_secs, Ordering::Relaxed);
    }
}

/// Write/read access to one group of buckets.
#[derive(Clone)]
pub struct BucketStats {
    region: Arc<SharedRegion>,
    groups: Arc<Vec<GroupLayout>>,
    index: usize,
}

impl BucketStats {
    fn layout(&self) -> &GroupLayout {
        &self.groups[self.index]
    }

    pub fn name(&self) -> &str {
        &self.layout().name
    }

    pub fn bucket_count(&self) -> usize {
        self.layout().bucket_names.len()
    }

    pub fn bucket_names(&self) -> &[String] {
        &self.layout().bucket_names
    }

    pub fn decls(&self) -> &[StatDecl] {
        &self.layout().decls
    }

    fn slot_index(&self, bucket: usize, name: &str) -> Option<usize> {
        let layout = self.layout();
        if bucket >= layout.bucket_names.len() {
            return None;
        }
        layout
            .decls
            .iter()
            .position(|d| d.name == name)
            .map(|decl| layout.base + 1 + bucket * layout.decls.len() + decl)
    }

    /// Current value of a stat; undeclared names read zero.
    pub fn get(&self, bucket: usize, name: &str) -> u64 {
        match self.slot_index(bucket, name) {
            Some(slot) => self.region.slot(slot).load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Store a value; writes to undeclared names are silently ignored.
    pub fn set(&self, bucket: usize, name: &str, value: u64) {
        if let Some(slot) = self.slot_index(bucket, name) {
            self.region.slot(slot).store(value, Ordering::Relaxed);
        }
    }

    /// Atomically increment, saturating at `u64::MAX`.
    pub fn incr(&self, bucket: usize, name: &str) {
        self.add(bucket, name, 1);
    }

    /// Atomically add, saturating at `u64::MAX`.
    pub fn add(&self, bucket: usize, name: &str, amount: u64) {
        if let Some(slot) = self.slot_index(bucket, name) {
            let _ = self
                .region
                .slot(slot)
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_add(amount))
                });
        }
    }

    /// The overall start time for this group, owned by the parent. It is
    /// recorded once when the first worker is forked and survives worker
    /// restarts.
    pub fn overall_start_time(&self) -> u64 {
        self.region.slot(self.layout().base).load(Ordering::Relaxed)
    }

    /// Record the overall start time if it has not been recorded yet.
    pub fn mark_started(&self, epoch_secs: u64) {
        let _ = self.region.slot(self.layout().base).compare_exchange(
            0,
            epoch_secs,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Forget the overall start time. Only done at full shutdown.
    pub fn clear_start_time(&self) {
        self.region
            .slot(self.layout().base)
            .store(0, Ordering::Relaxed);
    }

    /// A write handle bound to one bucket.
    pub fn handle(&self, bucket: usize) -> Stats {
        Stats {
            group: self.clone(),
            bucket,
        }
    }
}

/// The stats object a worker, handler, or daemon writes through. Bound to
/// exactly one bucket of one group.
#[derive(Clone)]
pub struct Stats {
    group: BucketStats,
    bucket: usize,
}

impl Stats {
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn get(&self, name: &str) -> u64 {
        self.group.get(self.bucket, name)
    }

    pub fn set(&self, name: &str, value: u64) {
        self.group.set(self.bucket, name, value);
    }

    pub fn incr(&self, name: &str) {
        self.group.incr(self.bucket, name);
    }

    pub fn add(&self, name: &str, amount: u64) {
        self.group.add(self.bucket, name, amount);
    }
}
