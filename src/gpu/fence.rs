use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::structs::QueueType;
use super::Backend;
use crate::utils::Handle;

pub enum Fence {}

/// Point on a queue's timeline. Handles are cheap to copy and never keep
/// GPU objects alive.
pub type FenceHandle = Handle<Fence>;

#[derive(Clone, Copy, Debug, Default)]
struct FenceSlot {
    generation: u32,
    target: Option<(QueueType, u64)>,
}

/// Fixed ring of (queue, value) pairs addressed by [`FenceHandle`].
///
/// Slots are reused round-robin; reusing a slot bumps its generation so
/// older handles stop resolving. Fence values only grow, so a handle that
/// lost its slot is always safe to treat as complete.
pub struct FenceRing {
    slots: Box<[FenceSlot]>,
    next: usize,
}

impl FenceRing {
    pub fn new(size: u32) -> Self {
        assert!(size > 0, "fence ring needs at least one slot");
        Self {
            slots: vec![FenceSlot::default(); size as usize].into_boxed_slice(),
            next: 0,
        }
    }

    pub fn issue(&mut self, queue: QueueType, value: u64) -> FenceHandle {
        let slot_index = self.next;
        self.next = (self.next + 1) % self.slots.len();

        let slot = &mut self.slots[slot_index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.target = Some((queue, value));
        Handle::new(slot_index as u32, slot.generation)
    }

    /// Queue and value `fence` waits for, or `None` once the slot moved on.
    pub fn target(&self, fence: FenceHandle) -> Option<(QueueType, u64)> {
        let slot = self.slots.get(fence.slot as usize)?;
        if slot.generation != fence.generation {
            return None;
        }
        slot.target
    }
}

/// A native queue plus the timeline value last signaled on it.
pub struct Queue<B: Backend> {
    kind: QueueType,
    native: B::Queue,
    last_signaled: AtomicU64,
    /// Latest (value, fence) submitted since the frame began.
    frame_fence: Mutex<Option<(u64, FenceHandle)>>,
}

impl<B: Backend> Queue<B> {
    pub(crate) fn new(kind: QueueType, native: B::Queue) -> Self {
        Self {
            kind,
            native,
            last_signaled: AtomicU64::new(0),
            frame_fence: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> QueueType {
        self.kind
    }

    pub fn native(&self) -> &B::Queue {
        &self.native
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled.load(Ordering::Acquire)
    }

    /// Reserves the next timeline value. Only called while submissions are
    /// serialized.
    pub(crate) fn next_value(&self) -> u64 {
        self.last_signaled.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records `fence`, signaled at `value`, as the frame's last fence
    /// unless a later value was already recorded.
    pub(crate) fn mark_submitted(&self, value: u64, fence: FenceHandle) {
        let mut frame_fence = self.frame_fence.lock();
        if frame_fence.map_or(true, |(latest, _)| value > latest) {
            *frame_fence = Some((value, fence));
        }
    }

    /// Latest fence signaled since the previous call, if any work ran.
    pub(crate) fn take_frame_fence(&self) -> Option<FenceHandle> {
        self.frame_fence.lock().take().map(|(_, fence)| fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullBackend;

    #[test]
    fn reused_slot_invalidates_old_handle() {
        let mut ring = FenceRing::new(2);
        let a = ring.issue(QueueType::Graphics, 1);
        let b = ring.issue(QueueType::Copy, 1);
        assert_eq!(ring.target(a), Some((QueueType::Graphics, 1)));
        assert_eq!(ring.target(b), Some((QueueType::Copy, 1)));

        let c = ring.issue(QueueType::Graphics, 2);
        assert_eq!(c.slot, a.slot);
        assert_eq!(ring.target(a), None);
        assert_eq!(ring.target(c), Some((QueueType::Graphics, 2)));
    }

    #[test]
    fn frame_fence_keeps_the_latest_value() {
        let backend = NullBackend::new();
        let queue: Queue<NullBackend> = Queue::new(QueueType::Graphics, backend.create_queue(QueueType::Graphics).unwrap());
        let mut ring = FenceRing::new(4);
        let first = ring.issue(QueueType::Graphics, 1);
        let second = ring.issue(QueueType::Graphics, 2);

        queue.mark_submitted(2, second);
        queue.mark_submitted(1, first);
        assert_eq!(queue.take_frame_fence(), Some(second));
        assert_eq!(queue.take_frame_fence(), None);
    }
}
