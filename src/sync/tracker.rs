use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use super::global::{uniform, GlobalStateTable, TrackedState};
use super::state::ResourceState;
use crate::gpu::resources::ResourceId;
use crate::gpu::structs::{HeapType, QueueType};

/// Which part of a resource a transition applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subresource {
    All,
    Index(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceSlice {
    pub resource: ResourceId,
    pub subresource: Subresource,
}

impl ResourceSlice {
    pub fn whole(resource: ResourceId) -> Self {
        Self {
            resource,
            subresource: Subresource::All,
        }
    }

    pub fn subresource(resource: ResourceId, index: u32) -> Self {
        Self {
            resource,
            subresource: Subresource::Index(index),
        }
    }
}

/// A barrier record waiting to be written into a command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    Transition {
        resource: ResourceId,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
    },
    Uav {
        resource: ResourceId,
    },
}

impl Barrier {
    pub fn resource(&self) -> ResourceId {
        match self {
            Barrier::Transition { resource, .. } | Barrier::Uav { resource } => *resource,
        }
    }
}

/// What the tracker needs to know about a resource to track it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedResource {
    pub id: ResourceId,
    pub subresources: u32,
    pub heap: HeapType,
}

/// Per-list view of one resource. `None` marks subresources this list has
/// not touched yet.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ListState {
    Whole(ResourceState),
    Split(SmallVec<[Option<ResourceState>; 8]>),
}

impl ListState {
    fn for_first_touch(subresource: Subresource, count: u32, state: ResourceState) -> Self {
        match subresource {
            Subresource::All => ListState::Whole(state),
            Subresource::Index(index) => {
                let mut states: SmallVec<[Option<ResourceState>; 8]> = smallvec![None; count as usize];
                states[index as usize] = Some(state);
                ListState::Split(states)
            }
        }
    }

    fn split_mut(&mut self) -> &mut SmallVec<[Option<ResourceState>; 8]> {
        match self {
            ListState::Split(states) => states,
            ListState::Whole(_) => {
                panic!("whole-resource expectation mixed with an untouched subresource")
            }
        }
    }
}

struct Entry {
    resource: TrackedResource,
    expected: ListState,
    current: ListState,
}

/// Records the states a single command list needs its resources in.
///
/// `expected` holds what each resource must already be in when the list
/// starts executing; `current` follows the resource through the commands
/// encoded so far. Barriers between the two are queued in `pending` and
/// written out by [`ResourceStateTracker::flush`].
pub struct ResourceStateTracker {
    queue: QueueType,
    entries: FxHashMap<ResourceId, Entry>,
    decayed: FxHashSet<ResourceId>,
    pending: Vec<Barrier>,
    emitted: u64,
}

impl ResourceStateTracker {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            entries: FxHashMap::default(),
            decayed: FxHashSet::default(),
            pending: Vec::new(),
            emitted: 0,
        }
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Copy queues promote and decay resources implicitly; upload and
    /// readback heaps have a fixed state for their whole lifetime.
    fn requires_transitions(&self, resource: &TrackedResource) -> bool {
        self.queue != QueueType::Copy && resource.heap == HeapType::Default
    }

    /// Requests that `subresource` of `resource` be in `desired` for the
    /// commands encoded after this call.
    pub fn transition(
        &mut self,
        resource: &TrackedResource,
        subresource: Subresource,
        desired: ResourceState,
    ) {
        if !self.requires_transitions(resource) {
            if self.queue == QueueType::Copy && resource.heap == HeapType::Default {
                self.decayed.insert(resource.id);
            }
            return;
        }

        let subresource = match subresource {
            Subresource::Index(index) => {
                assert!(
                    index < resource.subresources,
                    "subresource {index} out of range for {:?} ({} subresources)",
                    resource.id,
                    resource.subresources
                );
                if resource.subresources == 1 {
                    Subresource::All
                } else {
                    subresource
                }
            }
            Subresource::All => Subresource::All,
        };

        let Some(entry) = self.entries.get_mut(&resource.id) else {
            let state = ListState::for_first_touch(subresource, resource.subresources, desired);
            self.entries.insert(
                resource.id,
                Entry {
                    resource: *resource,
                    expected: state.clone(),
                    current: state,
                },
            );
            return;
        };

        let mut barriers: SmallVec<[Barrier; 4]> = SmallVec::new();
        match subresource {
            Subresource::All => transition_whole(entry, desired, &mut barriers),
            Subresource::Index(index) => transition_one(entry, index, desired, &mut barriers),
        }
        for barrier in barriers {
            self.push(barrier);
        }
    }

    /// Queues an unordered-access barrier so later UAV work observes earlier
    /// UAV writes.
    pub fn uav_barrier(&mut self, resource: &TrackedResource) {
        if self.queue == QueueType::Copy {
            return;
        }
        self.pending.push(Barrier::Uav {
            resource: resource.id,
        });
    }

    fn push(&mut self, barrier: Barrier) {
        let Barrier::Transition {
            resource,
            subresource,
            before,
            after,
        } = barrier
        else {
            self.pending.push(barrier);
            return;
        };

        // Fold into the latest unflushed record for this resource when it
        // is the same slice and ends where this one starts.
        if let Some(pos) = self.pending.iter().rposition(|b| b.resource() == resource) {
            if let Barrier::Transition {
                subresource: prev_sub,
                before: prev_before,
                after: prev_after,
                ..
            } = &mut self.pending[pos]
            {
                if *prev_sub == subresource && *prev_after == before {
                    if *prev_before == after {
                        self.pending.remove(pos);
                    } else {
                        *prev_after = after;
                    }
                    return;
                }
            }
        }
        self.pending.push(barrier);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes every barrier queued since the previous flush.
    pub fn flush(&mut self) -> Vec<Barrier> {
        self.emitted += self.pending.len() as u64;
        std::mem::take(&mut self.pending)
    }

    /// Number of barrier records handed out by [`Self::flush`] so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// State of `subresource` as of the last encoded command, if this list
    /// touched it.
    pub fn current_state(&self, resource: ResourceId, subresource: Subresource) -> Option<ResourceState> {
        let entry = self.entries.get(&resource)?;
        match (&entry.current, subresource) {
            (ListState::Whole(state), _) => Some(*state),
            (ListState::Split(states), Subresource::Index(index)) => states[index as usize],
            (ListState::Split(states), Subresource::All) => {
                let first = states[0]?;
                states.iter().all(|s| *s == Some(first)).then_some(first)
            }
        }
    }

    /// Whether `resource` is currently tracked per subresource in this list.
    pub fn is_split(&self, resource: ResourceId) -> bool {
        matches!(
            self.entries.get(&resource).map(|e| &e.current),
            Some(ListState::Split(_))
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.decayed.is_empty()
    }

    /// Barriers that bring the global table in line with what this list
    /// expects at its start. They belong in a patchup list executed right
    /// before this one.
    pub fn resolve_patchup(&self, global: &GlobalStateTable) -> Vec<Barrier> {
        let mut barriers = Vec::new();
        if self.queue == QueueType::Copy {
            return barriers;
        }

        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let entry = &self.entries[&id];
            let Some(actual) = global.get(id) else {
                continue;
            };
            let count = entry.resource.subresources;
            if let TrackedState::PerSubresource(states) = actual {
                assert_eq!(
                    states.len(),
                    count as usize,
                    "global state of {id:?} disagrees on the subresource count"
                );
            }

            let expected_whole = match &entry.expected {
                ListState::Whole(state) => Some(*state),
                ListState::Split(states) if states.iter().all(Option::is_some) => {
                    let first = states[0];
                    states.iter().all(|s| *s == first).then_some(first).flatten()
                }
                ListState::Split(_) => None,
            };

            match (expected_whole, actual) {
                (Some(expected), TrackedState::Whole(state)) => {
                    if *state != expected {
                        barriers.push(Barrier::Transition {
                            resource: id,
                            subresource: Subresource::All,
                            before: *state,
                            after: expected,
                        });
                    }
                }
                _ => {
                    for index in 0..count {
                        let expected = match &entry.expected {
                            ListState::Whole(state) => Some(*state),
                            ListState::Split(states) => states[index as usize],
                        };
                        let Some(expected) = expected else {
                            continue;
                        };
                        let state = actual.state_of(index);
                        if state != expected {
                            barriers.push(Barrier::Transition {
                                resource: id,
                                subresource: Subresource::Index(index),
                                before: state,
                                after: expected,
                            });
                        }
                    }
                }
            }
        }
        barriers
    }

    /// Writes every final state of this list into the global table and
    /// clears the tracker for reuse.
    pub fn commit(&mut self, global: &mut GlobalStateTable) {
        for (id, entry) in self.entries.drain() {
            let state = match entry.current {
                ListState::Whole(state) => TrackedState::Whole(state),
                ListState::Split(states) => {
                    let merged: SmallVec<[ResourceState; 8]> = states
                        .iter()
                        .enumerate()
                        .map(|(index, state)| {
                            state.unwrap_or_else(|| {
                                global
                                    .state_of(id, Subresource::Index(index as u32))
                                    .unwrap_or(ResourceState::COMMON)
                            })
                        })
                        .collect();
                    match uniform(&merged) {
                        Some(state) => TrackedState::Whole(state),
                        None => TrackedState::PerSubresource(merged),
                    }
                }
            };
            global.set(id, state);
        }
        for id in self.decayed.drain() {
            global.set(id, TrackedState::Whole(ResourceState::COMMON));
        }
        assert!(
            self.pending.is_empty(),
            "barriers were requested after the last command of the list"
        );
    }

    /// Forgets everything recorded so far without touching global state.
    pub fn reset(&mut self, queue: QueueType) {
        self.queue = queue;
        self.entries.clear();
        self.decayed.clear();
        self.pending.clear();
        self.emitted = 0;
    }
}

fn transition_whole(entry: &mut Entry, desired: ResourceState, out: &mut SmallVec<[Barrier; 4]>) {
    let id = entry.resource.id;
    if let ListState::Split(states) = &mut entry.current {
        // Untouched subresources are first touches: they become expectations.
        if states.iter().any(Option::is_none) {
            let expected = entry.expected.split_mut();
            for (index, state) in states.iter_mut().enumerate() {
                if state.is_none() {
                    expected[index] = Some(desired);
                    *state = Some(desired);
                }
            }
        }
        let first = states[0];
        if states.iter().all(|s| *s == first) {
            if let Some(state) = first {
                entry.current = ListState::Whole(state);
            }
        }
    }

    match &mut entry.current {
        ListState::Whole(current) => {
            if current.needs_transition_to(desired) {
                let next = current.merged_with(desired);
                out.push(Barrier::Transition {
                    resource: id,
                    subresource: Subresource::All,
                    before: *current,
                    after: next,
                });
                *current = next;
            }
        }
        ListState::Split(states) => {
            for (index, state) in states.iter_mut().enumerate() {
                let Some(current) = state else {
                    unreachable!("untouched subresources were resolved above");
                };
                if current.needs_transition_to(desired) {
                    let next = current.merged_with(desired);
                    out.push(Barrier::Transition {
                        resource: id,
                        subresource: Subresource::Index(index as u32),
                        before: *current,
                        after: next,
                    });
                    *current = next;
                }
            }
            try_collapse(&mut entry.current);
        }
    }
}

fn transition_one(
    entry: &mut Entry,
    index: u32,
    desired: ResourceState,
    out: &mut SmallVec<[Barrier; 4]>,
) {
    let id = entry.resource.id;
    if let ListState::Whole(state) = entry.current {
        entry.current = ListState::Split(smallvec![Some(state); entry.resource.subresources as usize]);
    }

    let ListState::Split(states) = &mut entry.current else {
        unreachable!("fanned out above");
    };
    match &mut states[index as usize] {
        slot @ None => {
            *slot = Some(desired);
            entry.expected.split_mut()[index as usize] = Some(desired);
        }
        Some(current) => {
            if current.needs_transition_to(desired) {
                let next = current.merged_with(desired);
                out.push(Barrier::Transition {
                    resource: id,
                    subresource: Subresource::Index(index),
                    before: *current,
                    after: next,
                });
                *current = next;
            }
        }
    }
    try_collapse(&mut entry.current);
}

fn try_collapse(state: &mut ListState) {
    if let ListState::Split(states) = state {
        let first = states[0];
        if let Some(first) = first {
            if states.iter().all(|s| *s == Some(first)) {
                *state = ListState::Whole(first);
            }
        }
    }
}
