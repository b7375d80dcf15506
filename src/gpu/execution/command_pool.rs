use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::gpu::error::Result;
use crate::gpu::fence::FenceHandle;
use crate::gpu::structs::QueueType;
use crate::gpu::Backend;

/// Names the pool a command list is drawn from, e.g. `"main"` or `"upload"`.
pub type UsageTag = &'static str;

/// Lists carrying only the barriers discovered at submission.
pub const PATCHUP_USAGE: UsageTag = "patchup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorState {
    Ready,
    Recording,
    /// Backs submitted or abandoned work; reset once every fence completed.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Unassigned,
    Recording,
    Closed,
    Executed,
}

pub struct PooledAllocator<B: Backend> {
    native: B::CommandAllocator,
    state: AllocatorState,
    fences: SmallVec<[FenceHandle; 4]>,
}

impl<B: Backend> PooledAllocator<B> {
    pub fn state(&self) -> AllocatorState {
        self.state
    }
}

pub struct PooledList<B: Backend> {
    native: B::CommandList,
    state: ListState,
}

/// A list and the allocator backing it, checked out of the pool for
/// recording.
pub struct Recording<B: Backend> {
    queue: QueueType,
    usage: UsageTag,
    allocator: PooledAllocator<B>,
    list: PooledList<B>,
}

impl<B: Backend> Recording<B> {
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn usage(&self) -> UsageTag {
        self.usage
    }

    pub fn state(&self) -> ListState {
        self.list.state
    }

    pub fn allocator_state(&self) -> AllocatorState {
        self.allocator.state
    }

    pub fn native(&self) -> &B::CommandList {
        &self.list.native
    }

    pub fn native_mut(&mut self) -> &mut B::CommandList {
        assert_eq!(
            self.list.state,
            ListState::Recording,
            "command list is not recording"
        );
        &mut self.list.native
    }

    pub fn close(&mut self, backend: &B) -> Result<()> {
        assert_eq!(
            self.list.state,
            ListState::Recording,
            "closing a command list that is not recording"
        );
        backend.close_command_list(&mut self.list.native)?;
        self.list.state = ListState::Closed;
        Ok(())
    }
}

struct Bucket<B: Backend> {
    allocators: Vec<PooledAllocator<B>>,
    lists: Vec<PooledList<B>>,
}

impl<B: Backend> Default for Bucket<B> {
    fn default() -> Self {
        Self {
            allocators: Vec::new(),
            lists: Vec::new(),
        }
    }
}

impl<B: Backend> Bucket<B> {
    fn take_allocator(
        &mut self,
        backend: &B,
        is_complete: &impl Fn(FenceHandle) -> bool,
    ) -> Result<Option<PooledAllocator<B>>> {
        if let Some(i) = self.allocators.iter().position(|a| a.state == AllocatorState::Ready) {
            return Ok(Some(self.allocators.swap_remove(i)));
        }
        let reusable = self.allocators.iter().position(|a| {
            a.state == AllocatorState::Pending && a.fences.iter().all(|f| is_complete(*f))
        });
        let Some(i) = reusable else {
            return Ok(None);
        };
        let mut allocator = self.allocators.swap_remove(i);
        if let Err(err) = reset_allocator(backend, &mut allocator) {
            self.allocators.push(allocator);
            return Err(err);
        }
        Ok(Some(allocator))
    }

    fn recycle(&mut self, backend: &B, is_complete: &impl Fn(FenceHandle) -> bool) -> Result<usize> {
        let mut recycled = 0;
        for allocator in &mut self.allocators {
            if allocator.state == AllocatorState::Pending
                && allocator.fences.iter().all(|f| is_complete(*f))
            {
                reset_allocator(backend, allocator)?;
                recycled += 1;
            }
        }
        Ok(recycled)
    }
}

fn reset_allocator<B: Backend>(backend: &B, allocator: &mut PooledAllocator<B>) -> Result<()> {
    backend.reset_command_allocator(&mut allocator.native)?;
    allocator.fences.clear();
    allocator.state = AllocatorState::Ready;
    Ok(())
}

/// Pool occupancy for one (queue, usage) pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub allocators: usize,
    pub ready_allocators: usize,
    pub pending_allocators: usize,
    pub idle_lists: usize,
    /// Idle lists that were abandoned or never recorded.
    pub unassigned_lists: usize,
}

/// Recycles command allocators and lists per (queue, usage tag).
///
/// Nothing here ever blocks on the GPU: allocators whose fences are still
/// outstanding are skipped and a fresh one is created instead.
pub struct CommandPools<B: Backend> {
    buckets: Mutex<FxHashMap<(QueueType, UsageTag), Bucket<B>>>,
}

impl<B: Backend> Default for CommandPools<B> {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<B: Backend> CommandPools<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out an allocator and a list in the recording state.
    pub fn acquire(
        &self,
        backend: &B,
        queue: QueueType,
        usage: UsageTag,
        is_complete: impl Fn(FenceHandle) -> bool,
    ) -> Result<Recording<B>> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry((queue, usage)).or_default();

        let mut allocator = match bucket.take_allocator(backend, &is_complete)? {
            Some(allocator) => allocator,
            None => {
                log::debug!("new command allocator for {queue:?}/{usage}");
                PooledAllocator {
                    native: backend.create_command_allocator(queue)?,
                    state: AllocatorState::Ready,
                    fences: SmallVec::new(),
                }
            }
        };

        let list = match bucket.lists.pop() {
            Some(mut list) => match backend.reset_command_list(&mut list.native, &mut allocator.native) {
                Ok(()) => list,
                Err(err) => {
                    bucket.lists.push(list);
                    bucket.allocators.push(allocator);
                    return Err(err);
                }
            },
            None => match backend.create_command_list(queue, &mut allocator.native) {
                Ok(native) => PooledList {
                    native,
                    state: ListState::Unassigned,
                },
                Err(err) => {
                    bucket.allocators.push(allocator);
                    return Err(err);
                }
            },
        };

        allocator.state = AllocatorState::Recording;
        let mut list = list;
        list.state = ListState::Recording;
        Ok(Recording {
            queue,
            usage,
            allocator,
            list,
        })
    }

    /// Returns a checked-out pair. `fence` is the point the submitted work
    /// finishes at; `None` for lists that were never submitted.
    pub fn release(&self, recording: Recording<B>, fence: Option<FenceHandle>) {
        let Recording {
            queue,
            usage,
            mut allocator,
            mut list,
        } = recording;
        allocator.state = AllocatorState::Pending;
        match fence {
            Some(fence) => {
                assert_eq!(list.state, ListState::Closed, "only closed lists are executed");
                allocator.fences.push(fence);
                list.state = ListState::Executed;
            }
            // Abandoned: whatever was recorded is discarded by the next reset.
            None => list.state = ListState::Unassigned,
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry((queue, usage)).or_default();
        bucket.allocators.push(allocator);
        bucket.lists.push(list);
    }

    /// Resets every pending allocator whose work finished.
    pub fn recycle(&self, backend: &B, is_complete: impl Fn(FenceHandle) -> bool) -> Result<usize> {
        let mut buckets = self.buckets.lock();
        let mut recycled = 0;
        for bucket in buckets.values_mut() {
            recycled += bucket.recycle(backend, &is_complete)?;
        }
        Ok(recycled)
    }

    pub fn counts(&self, queue: QueueType, usage: UsageTag) -> PoolCounts {
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(&(queue, usage)) else {
            return PoolCounts::default();
        };
        let count = |state| bucket.allocators.iter().filter(|a| a.state == state).count();
        PoolCounts {
            allocators: bucket.allocators.len(),
            ready_allocators: count(AllocatorState::Ready),
            pending_allocators: count(AllocatorState::Pending),
            idle_lists: bucket.lists.len(),
            unassigned_lists: bucket
                .lists
                .iter()
                .filter(|l| l.state == ListState::Unassigned)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullBackend;

    #[test]
    fn abandoned_list_returns_unassigned() {
        let backend = NullBackend::new();
        let pools = CommandPools::<NullBackend>::new();
        let recording = pools
            .acquire(&backend, QueueType::Graphics, "main", |_| true)
            .unwrap();
        assert_eq!(recording.state(), ListState::Recording);
        pools.release(recording, None);

        let counts = pools.counts(QueueType::Graphics, "main");
        assert_eq!(counts.idle_lists, 1);
        assert_eq!(counts.unassigned_lists, 1);
        assert_eq!(counts.pending_allocators, 1);

        // No fence to wait for: the allocator is reused right away.
        let recording = pools
            .acquire(&backend, QueueType::Graphics, "main", |_| false)
            .unwrap();
        assert_eq!(recording.state(), ListState::Recording);
        assert_eq!(pools.counts(QueueType::Graphics, "main").allocators, 0);
        pools.release(recording, None);
        assert_eq!(backend.allocator_resets(), 1);
    }

    #[test]
    fn executed_list_keeps_its_allocator_pending() {
        let backend = NullBackend::new();
        let pools = CommandPools::<NullBackend>::new();
        let mut recording = pools
            .acquire(&backend, QueueType::Compute, "main", |_| true)
            .unwrap();
        recording.close(&backend).unwrap();
        pools.release(recording, Some(FenceHandle::new(0, 1)));

        let counts = pools.counts(QueueType::Compute, "main");
        assert_eq!(counts.pending_allocators, 1);
        assert_eq!(counts.unassigned_lists, 0);

        assert_eq!(pools.recycle(&backend, |_| false).unwrap(), 0);
        assert_eq!(pools.recycle(&backend, |_| true).unwrap(), 1);
        assert_eq!(pools.counts(QueueType::Compute, "main").ready_allocators, 1);
    }
}
