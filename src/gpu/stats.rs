use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregate counters for one finished frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub pipeline_builds: u64,
    /// Cached pipelines rebuilt because their shader bytecode changed.
    pub pipeline_rebuilds: u64,
    pub bind_layout_builds: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub constant_bytes: u64,
    pub patchup_lists: u64,
    pub barriers: u64,
    pub command_lists: u64,
}

/// Live counters updated from any recording thread.
#[derive(Default)]
pub struct StatsCounters {
    pipeline_builds: AtomicU64,
    pipeline_rebuilds: AtomicU64,
    bind_layout_builds: AtomicU64,
    draws: AtomicU64,
    dispatches: AtomicU64,
    constant_bytes: AtomicU64,
    patchup_lists: AtomicU64,
    barriers: AtomicU64,
    command_lists: AtomicU64,
}

impl StatsCounters {
    pub fn pipeline_built(&self, rebuild: bool) {
        let counter = if rebuild {
            &self.pipeline_rebuilds
        } else {
            &self.pipeline_builds
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bind_layout_built(&self) {
        self.bind_layout_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn patchup_list(&self) {
        self.patchup_lists.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the totals of one executed command list in.
    pub fn list_executed(&self, list: &ListStats) {
        self.draws.fetch_add(list.draws, Ordering::Relaxed);
        self.dispatches.fetch_add(list.dispatches, Ordering::Relaxed);
        self.constant_bytes.fetch_add(list.constant_bytes, Ordering::Relaxed);
        self.barriers.fetch_add(list.barriers, Ordering::Relaxed);
        self.command_lists.fetch_add(1, Ordering::Relaxed);
    }

    pub fn barriers(&self, count: u64) {
        self.barriers.fetch_add(count, Ordering::Relaxed);
    }

    /// Reads and zeroes every counter.
    pub fn take(&self) -> FrameStats {
        FrameStats {
            pipeline_builds: self.pipeline_builds.swap(0, Ordering::Relaxed),
            pipeline_rebuilds: self.pipeline_rebuilds.swap(0, Ordering::Relaxed),
            bind_layout_builds: self.bind_layout_builds.swap(0, Ordering::Relaxed),
            draws: self.draws.swap(0, Ordering::Relaxed),
            dispatches: self.dispatches.swap(0, Ordering::Relaxed),
            constant_bytes: self.constant_bytes.swap(0, Ordering::Relaxed),
            patchup_lists: self.patchup_lists.swap(0, Ordering::Relaxed),
            barriers: self.barriers.swap(0, Ordering::Relaxed),
            command_lists: self.command_lists.swap(0, Ordering::Relaxed),
        }
    }
}

/// Counters a single command list accumulates while recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListStats {
    pub draws: u64,
    pub dispatches: u64,
    pub constant_bytes: u64,
    pub barriers: u64,
}
