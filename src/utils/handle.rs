use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generation-checked index into a [`Pool`].
///
/// Equality covers both the slot and the generation, so a handle captured
/// before its slot was released and reused never compares equal to the new
/// occupant.
pub struct Handle<T> {
    pub slot: u32,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    /// Packs slot and generation into one value, handy as a hash-map key or
    /// for debug output.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.slot)
    }

    /// Reinterprets the handle under another tag type. Used where a pool's
    /// storage type differs from the public tag handed to callers.
    pub fn cast<U>(self) -> Handle<U> {
        Handle::new(self.slot, self.generation)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.slot, self.generation)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.slot, self.generation).cmp(&(other.slot, other.generation))
    }
}

/// Dense slot table handing out [`Handle`]s.
///
/// Releasing a slot bumps its generation, so every handle issued for the
/// previous occupant goes stale.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<u32>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut items = Vec::with_capacity(initial_size);
        items.resize_with(initial_size, || None);
        Pool {
            items,
            empty: (0..initial_size as u32).rev().collect(),
            generation: vec![0; initial_size],
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                self.items.push(None);
                self.generation.push(0);
                (self.items.len() - 1) as u32
            }
        };

        self.items[slot as usize] = Some(item);
        Handle::new(slot, self.generation[slot as usize])
    }

    /// Removes the item behind `handle`. Returns `None` for stale handles.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        let slot = handle.slot as usize;
        let item = self.items[slot].take();
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(handle.slot);
        item
    }

    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        let slot = handle.slot as usize;
        slot < self.items.len()
            && self.generation[slot] == handle.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, handle: Handle<T>) -> Option<&T> {
        if self.generation.get(handle.slot as usize) != Some(&handle.generation) {
            return None;
        }
        self.items[handle.slot as usize].as_ref()
    }

    pub fn get_mut_ref(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if self.generation.get(handle.slot as usize) != Some(&handle.generation) {
            return None;
        }
        self.items[handle.slot as usize].as_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_occupied<F>(&self, mut func: F)
    where
        F: FnMut(Handle<T>, &T),
    {
        for (slot, item) in self.items.iter().enumerate() {
            if let Some(item) = item {
                func(Handle::new(slot as u32, self.generation[slot]), item);
            }
        }
    }
}
