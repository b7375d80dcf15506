use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::state::ResourceState;
use super::tracker::Subresource;
use crate::gpu::resources::ResourceId;

/// Last known state of a resource as the GPU will see it once every
/// submitted list has run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackedState {
    Whole(ResourceState),
    PerSubresource(SmallVec<[ResourceState; 8]>),
}

impl TrackedState {
    pub fn state_of(&self, index: u32) -> ResourceState {
        match self {
            TrackedState::Whole(state) => *state,
            TrackedState::PerSubresource(states) => states[index as usize],
        }
    }

    /// Folds a per-subresource state back into a whole one when every
    /// subresource agrees.
    pub fn collapse(self) -> Self {
        match self {
            TrackedState::PerSubresource(states) => match uniform(&states) {
                Some(state) => TrackedState::Whole(state),
                None => TrackedState::PerSubresource(states),
            },
            whole => whole,
        }
    }
}

pub(crate) fn uniform(states: &[ResourceState]) -> Option<ResourceState> {
    let first = *states.first()?;
    states.iter().all(|s| *s == first).then_some(first)
}

struct GlobalEntry {
    subresources: u32,
    state: TrackedState,
}

/// Context-wide map from resource to last known GPU state.
///
/// Only mutated at submission time, after a list's patchup has been
/// resolved; recording threads never touch it.
#[derive(Default)]
pub struct GlobalStateTable {
    entries: FxHashMap<ResourceId, GlobalEntry>,
}

impl GlobalStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: ResourceId, subresources: u32, initial: ResourceState) {
        self.entries.insert(
            resource,
            GlobalEntry {
                subresources,
                state: TrackedState::Whole(initial),
            },
        );
    }

    pub fn unregister(&mut self, resource: ResourceId) {
        self.entries.remove(&resource);
    }

    pub fn get(&self, resource: ResourceId) -> Option<&TrackedState> {
        self.entries.get(&resource).map(|e| &e.state)
    }

    pub fn state_of(&self, resource: ResourceId, subresource: Subresource) -> Option<ResourceState> {
        let entry = self.entries.get(&resource)?;
        match (subresource, &entry.state) {
            (Subresource::Index(index), state) => Some(state.state_of(index)),
            (Subresource::All, TrackedState::Whole(state)) => Some(*state),
            (Subresource::All, TrackedState::PerSubresource(states)) => uniform(states),
        }
    }

    /// Replaces the tracked state of `resource`. Split states that agree on
    /// every subresource are stored whole.
    pub fn set(&mut self, resource: ResourceId, state: TrackedState) {
        let Some(entry) = self.entries.get_mut(&resource) else {
            return;
        };
        if let TrackedState::PerSubresource(states) = &state {
            assert_eq!(
                states.len(),
                entry.subresources as usize,
                "per-subresource state does not match the resource's subresource count"
            );
        }
        entry.state = state.collapse();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
