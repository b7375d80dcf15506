use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::error::{GPUError, Result};
use super::fence::FenceHandle;
use super::structs::ContextInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Shader-visible buffer and texture views, including constant buffers.
    View,
    Sampler,
    RenderTarget,
    DepthStencil,
}

/// One descriptor in one of the context's heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    pub heap: DescriptorHeapKind,
    pub index: u32,
}

/// A contiguous run of descriptors. `count` is the rounded bucket size for
/// steady allocations and the exact request for temporary ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorAllocation {
    pub heap: DescriptorHeapKind,
    pub offset: u32,
    pub count: u32,
    pub temporary: bool,
}

impl DescriptorAllocation {
    pub fn slot(&self, index: u32) -> DescriptorSlot {
        assert!(index < self.count, "descriptor {index} outside allocation of {}", self.count);
        DescriptorSlot {
            heap: self.heap,
            index: self.offset + index,
        }
    }

    pub fn base(&self) -> DescriptorSlot {
        self.slot(0)
    }
}

struct SteadyState {
    next: u32,
    /// Free offsets per power-of-two bucket, indexed by log2 of the size.
    free: Vec<Vec<u32>>,
}

/// Long-lived descriptors, freed one allocation at a time.
pub struct SteadyAllocator {
    heap: DescriptorHeapKind,
    base: u32,
    capacity: u32,
    block_size: u32,
    state: Mutex<SteadyState>,
}

impl SteadyAllocator {
    pub fn new(heap: DescriptorHeapKind, base: u32, capacity: u32, block_size: u32) -> Self {
        Self {
            heap,
            base,
            capacity,
            block_size: block_size.next_power_of_two(),
            state: Mutex::new(SteadyState {
                next: 0,
                free: (0..32).map(|_| Vec::new()).collect(),
            }),
        }
    }

    pub fn allocate(&self, count: u32) -> Result<DescriptorAllocation> {
        assert!(count > 0, "empty descriptor allocation");
        let size = count.next_power_of_two();
        let bucket = size.trailing_zeros() as usize;

        let mut state = self.state.lock();
        if let Some(offset) = state.free[bucket].pop() {
            return Ok(self.allocation(offset, size));
        }

        let block = self.block_size.max(size);
        if u64::from(state.next) + u64::from(block) > u64::from(self.capacity) {
            return Err(GPUError::OutOfDescriptors {
                heap: self.heap,
                requested: count,
            });
        }
        let offset = state.next;
        state.next += block;

        // Whatever the request leaves of the block feeds the same bucket,
        // lowest offset on top.
        let tails = (1..block / size).map(|i| offset + i * size).rev();
        state.free[bucket].extend(tails);
        Ok(self.allocation(offset, size))
    }

    pub fn free(&self, allocation: DescriptorAllocation) {
        assert!(!allocation.temporary, "temporary descriptors are reclaimed per block");
        assert_eq!(allocation.heap, self.heap, "descriptor freed into the wrong heap");
        assert!(allocation.count.is_power_of_two());
        let bucket = allocation.count.trailing_zeros() as usize;
        self.state.lock().free[bucket].push(allocation.offset - self.base);
    }

    /// Descriptors claimed from the heap so far, free ranges included.
    pub fn reserved(&self) -> u32 {
        self.state.lock().next
    }

    fn allocation(&self, offset: u32, size: u32) -> DescriptorAllocation {
        DescriptorAllocation {
            heap: self.heap,
            offset: self.base + offset,
            count: size,
            temporary: false,
        }
    }
}

#[derive(Default)]
struct TemporaryBlock {
    cursor: AtomicU32,
    /// Fenced and waiting for the GPU; never handed out in this state.
    pending: AtomicBool,
    fences: Mutex<SmallVec<[FenceHandle; 3]>>,
}

impl TemporaryBlock {
    fn is_free(&self) -> bool {
        !self.pending.load(Ordering::Acquire) && self.cursor.load(Ordering::Acquire) == 0
    }
}

/// Per-frame descriptors handed out from fixed-size blocks by an atomic
/// cursor. Blocks are reclaimed as a whole once every fence stamped on
/// them completed.
pub struct TemporaryAllocator {
    heap: DescriptorHeapKind,
    base: u32,
    block_size: u32,
    blocks: Box<[TemporaryBlock]>,
    len: AtomicUsize,
    current: AtomicUsize,
    grow: Mutex<()>,
}

impl TemporaryAllocator {
    pub fn new(heap: DescriptorHeapKind, base: u32, capacity: u32, block_size: u32) -> Self {
        let max_blocks = (capacity / block_size).max(1) as usize;
        Self {
            heap,
            base,
            block_size,
            blocks: (0..max_blocks).map(|_| TemporaryBlock::default()).collect(),
            len: AtomicUsize::new(1),
            current: AtomicUsize::new(0),
            grow: Mutex::new(()),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn allocate(&self, count: u32) -> Result<DescriptorAllocation> {
        assert!(count > 0, "empty descriptor allocation");
        if count > self.block_size {
            return Err(GPUError::TemporaryAllocationTooLarge {
                requested: count,
                block_size: self.block_size,
            });
        }

        loop {
            let current = self.current.load(Ordering::Acquire);
            let block = &self.blocks[current];
            if !block.pending.load(Ordering::Acquire) {
                let mut cursor = block.cursor.load(Ordering::Relaxed);
                while cursor + count <= self.block_size {
                    match block.cursor.compare_exchange_weak(
                        cursor,
                        cursor + count,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            return Ok(DescriptorAllocation {
                                heap: self.heap,
                                offset: self.base + current as u32 * self.block_size + cursor,
                                count,
                                temporary: true,
                            })
                        }
                        Err(actual) => cursor = actual,
                    }
                }
            }
            self.advance(current, count)?;
        }
    }

    /// Moves `current` past an exhausted block. Losing the race to another
    /// thread is fine: the caller simply retries on the new block.
    fn advance(&self, from: usize, count: u32) -> Result<()> {
        let len = self.len.load(Ordering::Acquire);
        if let Some(next) = (from + 1..len).find(|&i| self.blocks[i].is_free()) {
            let _ = self
                .current
                .compare_exchange(from, next, Ordering::AcqRel, Ordering::Acquire);
            return Ok(());
        }

        let _grow = self.grow.lock();
        if self.current.load(Ordering::Acquire) != from {
            return Ok(());
        }
        let len = self.len.load(Ordering::Acquire);
        if len == self.blocks.len() {
            return Err(GPUError::OutOfDescriptors {
                heap: self.heap,
                requested: count,
            });
        }
        self.len.store(len + 1, Ordering::Release);
        self.current.store(len, Ordering::Release);
        Ok(())
    }

    /// Stamps every block allocated from since the last call with `fences`.
    pub fn fence_allocations(&self, fences: &[FenceHandle]) {
        let len = self.len.load(Ordering::Acquire);
        for block in &self.blocks[..len] {
            if block.pending.load(Ordering::Acquire) || block.cursor.load(Ordering::Acquire) == 0 {
                continue;
            }
            block.fences.lock().extend(fences.iter().copied());
            block.pending.store(true, Ordering::Release);
        }
    }

    /// Reclaims every pending block whose fences all completed and points
    /// the allocator at the first free block. Returns the number reclaimed.
    pub fn free_allocations(&self, is_complete: impl Fn(FenceHandle) -> bool) -> usize {
        let len = self.len.load(Ordering::Acquire);
        let mut reclaimed = 0;
        for block in &self.blocks[..len] {
            if !block.pending.load(Ordering::Acquire) {
                continue;
            }
            let mut fences = block.fences.lock();
            if fences.iter().all(|f| is_complete(*f)) {
                fences.clear();
                block.cursor.store(0, Ordering::Release);
                block.pending.store(false, Ordering::Release);
                reclaimed += 1;
            }
        }

        if let Some(first) = (0..len).find(|&i| self.blocks[i].is_free()) {
            self.current.store(first, Ordering::Release);
        }
        reclaimed
    }

    /// Blocks in use, pending or free.
    pub fn block_count(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn pending_blocks(&self) -> usize {
        let len = self.len.load(Ordering::Acquire);
        self.blocks[..len]
            .iter()
            .filter(|b| b.pending.load(Ordering::Acquire))
            .count()
    }
}

/// A heap split into a steady region and, for shader-visible heaps, a
/// temporary region that follows it.
pub struct DescriptorHeap {
    kind: DescriptorHeapKind,
    steady: SteadyAllocator,
    temporary: Option<TemporaryAllocator>,
}

impl DescriptorHeap {
    pub fn new(
        kind: DescriptorHeapKind,
        steady_capacity: u32,
        temporary_capacity: u32,
        block_size: u32,
        temporary_block_size: u32,
    ) -> Self {
        let temporary = (temporary_capacity > 0).then(|| {
            TemporaryAllocator::new(kind, steady_capacity, temporary_capacity, temporary_block_size)
        });
        Self {
            kind,
            steady: SteadyAllocator::new(kind, 0, steady_capacity, block_size),
            temporary,
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn allocate(&self, count: u32) -> Result<DescriptorAllocation> {
        self.steady.allocate(count)
    }

    pub fn free(&self, allocation: DescriptorAllocation) {
        self.steady.free(allocation)
    }

    pub fn allocate_temporary(&self, count: u32) -> Result<DescriptorAllocation> {
        self.temporary_allocator().allocate(count)
    }

    pub fn steady(&self) -> &SteadyAllocator {
        &self.steady
    }

    pub fn temporary(&self) -> Option<&TemporaryAllocator> {
        self.temporary.as_ref()
    }

    fn temporary_allocator(&self) -> &TemporaryAllocator {
        match &self.temporary {
            Some(temporary) => temporary,
            None => panic!("{:?} heap has no temporary region", self.kind),
        }
    }
}

/// The four heaps a context owns.
pub struct DescriptorHeaps {
    pub view: DescriptorHeap,
    pub sampler: DescriptorHeap,
    pub render_target: DescriptorHeap,
    pub depth_stencil: DescriptorHeap,
}

impl DescriptorHeaps {
    pub fn new(info: &ContextInfo) -> Self {
        Self {
            view: DescriptorHeap::new(
                DescriptorHeapKind::View,
                info.view_heap_steady,
                info.view_heap_temporary,
                info.steady_block_size,
                info.temporary_block_size,
            ),
            sampler: DescriptorHeap::new(
                DescriptorHeapKind::Sampler,
                info.sampler_heap_steady,
                info.sampler_heap_temporary,
                info.steady_block_size,
                info.temporary_block_size,
            ),
            render_target: DescriptorHeap::new(
                DescriptorHeapKind::RenderTarget,
                info.render_target_heap,
                0,
                info.steady_block_size,
                info.temporary_block_size,
            ),
            depth_stencil: DescriptorHeap::new(
                DescriptorHeapKind::DepthStencil,
                info.depth_stencil_heap,
                0,
                info.steady_block_size,
                info.temporary_block_size,
            ),
        }
    }

    pub fn heap(&self, kind: DescriptorHeapKind) -> &DescriptorHeap {
        match kind {
            DescriptorHeapKind::View => &self.view,
            DescriptorHeapKind::Sampler => &self.sampler,
            DescriptorHeapKind::RenderTarget => &self.render_target,
            DescriptorHeapKind::DepthStencil => &self.depth_stencil,
        }
    }

    pub fn free(&self, allocation: DescriptorAllocation) {
        self.heap(allocation.heap).free(allocation)
    }

    pub fn fence_temporary_allocations(&self, fences: &[FenceHandle]) {
        for heap in [&self.view, &self.sampler] {
            if let Some(temporary) = heap.temporary() {
                temporary.fence_allocations(fences);
            }
        }
    }

    pub fn free_temporary_allocations(&self, is_complete: impl Fn(FenceHandle) -> bool) -> usize {
        [&self.view, &self.sampler]
            .into_iter()
            .filter_map(|heap| heap.temporary())
            .map(|temporary| temporary.free_allocations(&is_complete))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Handle;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn steady_requests_round_up_and_reuse_block_tail() {
        let steady = SteadyAllocator::new(DescriptorHeapKind::View, 0, 256, 64);
        let a = steady.allocate(3).unwrap();
        assert_eq!((a.offset, a.count), (0, 4));
        let b = steady.allocate(4).unwrap();
        assert_eq!(b.offset, 4);
        assert_eq!(steady.reserved(), 64);

        steady.free(a);
        let c = steady.allocate(2).unwrap();
        assert_eq!(c.count, 2);
        assert_eq!(c.offset, 64, "bucket of two owns no free range yet");
        let d = steady.allocate(4).unwrap();
        assert_eq!(d.offset, 0, "freed range goes back to its bucket");
    }

    #[test]
    fn steady_request_larger_than_block_gets_its_own_block() {
        let steady = SteadyAllocator::new(DescriptorHeapKind::View, 0, 1024, 64);
        let small = steady.allocate(1).unwrap();
        let large = steady.allocate(200).unwrap();
        assert_eq!(large.count, 256);
        assert!(large.offset >= small.offset + 64);
        assert_eq!(steady.reserved(), 64 + 256);
    }

    #[test]
    fn steady_exhaustion_is_an_error() {
        let steady = SteadyAllocator::new(DescriptorHeapKind::Sampler, 0, 64, 64);
        steady.allocate(64).unwrap();
        assert!(matches!(
            steady.allocate(1),
            Err(GPUError::OutOfDescriptors {
                heap: DescriptorHeapKind::Sampler,
                requested: 1
            })
        ));
    }

    #[test]
    fn temporary_blocks_are_reused_only_after_their_fence() {
        let temp = TemporaryAllocator::new(DescriptorHeapKind::View, 0, 64, 16);
        let first: Vec<_> = (0..4).map(|_| temp.allocate(8).unwrap()).collect();
        assert_eq!(temp.block_count(), 2);

        let fence = Handle::new(0, 0);
        temp.fence_allocations(&[fence]);
        assert_eq!(temp.pending_blocks(), 2);

        let during = temp.allocate(8).unwrap();
        assert!(first.iter().all(|a| a.offset != during.offset));
        assert_eq!(temp.free_allocations(|_| false), 0);

        temp.fence_allocations(&[Handle::new(1, 0)]);
        assert_eq!(temp.free_allocations(|f| f == fence), 2);
        let reused = temp.allocate(8).unwrap();
        assert_eq!(reused.offset, first[0].offset);
    }

    #[test]
    fn temporary_request_larger_than_block_is_rejected() {
        let temp = TemporaryAllocator::new(DescriptorHeapKind::View, 0, 64, 16);
        assert!(matches!(
            temp.allocate(17),
            Err(GPUError::TemporaryAllocationTooLarge {
                requested: 17,
                block_size: 16
            })
        ));
    }

    #[test]
    fn temporary_region_exhaustion_is_an_error() {
        let temp = TemporaryAllocator::new(DescriptorHeapKind::View, 0, 32, 16);
        temp.allocate(16).unwrap();
        temp.allocate(16).unwrap();
        assert!(matches!(
            temp.allocate(1),
            Err(GPUError::OutOfDescriptors { .. })
        ));
    }

    #[test]
    fn concurrent_temporary_allocations_never_overlap() {
        let temp = Arc::new(TemporaryAllocator::new(DescriptorHeapKind::View, 0, 4096, 64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let temp = Arc::clone(&temp);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| temp.allocate(1 + i % 5).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut used = HashSet::new();
        for handle in handles {
            for alloc in handle.join().unwrap() {
                assert_eq!(alloc.offset / 64, (alloc.offset + alloc.count - 1) / 64);
                for index in alloc.offset..alloc.offset + alloc.count {
                    assert!(used.insert(index), "descriptor {index} handed out twice");
                }
            }
        }
    }
}
