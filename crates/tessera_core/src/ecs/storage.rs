//! # Component Storage
//!
//! Dense, per-group component storage.
//!
//! The storage uses a dense array strategy:
//! - Components of one type in one group live in a single contiguous `Vec`
//! - An `entity_id -> index` map gives O(1) average lookup
//! - A reverse `index -> entity_id` array lets removals patch the map
//!
//! ```text
//! data:        [C(7), C(2), C(9)]
//! entity_ids:  [  7 ,   2 ,   9 ]
//! index_of:    {7: 0, 2: 1, 9: 2}
//!
//! remove(7):   [C(9), C(2)]      <- last element moved into the hole
//! index_of:    {2: 1, 9: 0}      <- 9's index changed!
//! ```
//!
//! Removal is O(1) but moves the last element, so slot indices are only valid
//! until the next structural change. Re-resolve through [`ComponentStorage::try_index`]
//! after every flush.

use std::any::Any;
use std::collections::HashMap;

use super::component::Component;
use super::egid::{Egid, GroupId};
use crate::error::{EcsError, EcsResult};

/// Smallest capacity allocated on first growth.
const MIN_CAPACITY: usize = 16;

/// Dense storage for a single component type in a single group.
///
/// # Type Parameters
///
/// * `C` - The component type to store
///
/// # Example
///
/// ```rust,ignore
/// let storage = registry.storage_mut::<Health>(PLAYERS).unwrap();
/// storage.get_mut(42).unwrap().current -= 1;
/// ```
///
/// Adding and removing entries is reserved for the flush, which keeps every
/// storage of a group in lockstep:
///
/// ```compile_fail
/// use tessera_core::{ComponentStorage, GroupId};
///
/// let mut storage: ComponentStorage<u32> = ComponentStorage::new(GroupId::new(0));
/// storage.add(1, 5).ok();
/// ```
pub struct ComponentStorage<C: Component> {
    /// Group this storage belongs to (for diagnostics).
    group: GroupId,
    /// The dense array of components.
    data: Vec<C>,
    /// Entity id stored at each dense index.
    entity_ids: Vec<u32>,
    /// Entity id to dense index.
    index_of: HashMap<u32, u32>,
}

impl<C: Component> ComponentStorage<C> {
    /// Creates an empty storage for `group`.
    #[must_use]
    pub fn new(group: GroupId) -> Self {
        Self::with_capacity(group, 0)
    }

    /// Creates a storage with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(group: GroupId, capacity: usize) -> Self {
        Self {
            group,
            data: Vec::with_capacity(capacity),
            entity_ids: Vec::with_capacity(capacity),
            index_of: HashMap::with_capacity(capacity),
        }
    }

    /// Returns the group this storage belongs to.
    #[inline]
    #[must_use]
    pub const fn group(&self) -> GroupId {
        self.group
    }

    /// Returns the number of stored components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the allocated capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Appends a component for `entity_id`.
    ///
    /// Growth is geometric (capacity doubles), so appends are O(1) amortized.
    ///
    /// # Returns
    ///
    /// The dense index of the new component.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateEntity`] if the id is already stored.
    pub(crate) fn add(&mut self, entity_id: u32, component: C) -> EcsResult<usize> {
        if self.index_of.contains_key(&entity_id) {
            return Err(EcsError::DuplicateEntity {
                egid: Egid::new(entity_id, self.group),
            });
        }

        if self.data.len() == self.data.capacity() {
            self.grow();
        }

        let index = self.data.len();
        self.data.push(component);
        self.entity_ids.push(entity_id);
        self.index_of.insert(entity_id, index as u32);
        Ok(index)
    }

    /// Removes the component of `entity_id`, compacting with swap-with-last.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the id is not stored.
    pub(crate) fn remove(&mut self, entity_id: u32) -> EcsResult<C> {
        let Some(index) = self.index_of.remove(&entity_id) else {
            return Err(EcsError::EntityNotFound {
                egid: Egid::new(entity_id, self.group),
            });
        };
        let index = index as usize;

        let component = self.data.swap_remove(index);
        self.entity_ids.swap_remove(index);

        // The former last element now lives in the hole.
        if let Some(&moved) = self.entity_ids.get(index) {
            self.index_of.insert(moved, index as u32);
        }

        Ok(component)
    }

    /// Returns the dense index of `entity_id`, if stored.
    #[inline]
    #[must_use]
    pub fn try_index(&self, entity_id: u32) -> Option<usize> {
        self.index_of.get(&entity_id).map(|&i| i as usize)
    }

    /// Checks whether `entity_id` is stored.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity_id: u32) -> bool {
        self.index_of.contains_key(&entity_id)
    }

    /// Gets the component of an entity.
    #[inline]
    #[must_use]
    pub fn get(&self, entity_id: u32) -> Option<&C> {
        let index = self.try_index(entity_id)?;
        self.data.get(index)
    }

    /// Gets the mutable component of an entity.
    #[inline]
    pub fn get_mut(&mut self, entity_id: u32) -> Option<&mut C> {
        let index = self.try_index(entity_id)?;
        self.data.get_mut(index)
    }

    /// Returns the dense component array.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[C] {
        &self.data
    }

    /// Returns the dense component array mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [C] {
        &mut self.data
    }

    /// Returns the entity id stored at each dense index.
    #[inline]
    #[must_use]
    pub fn entity_ids(&self) -> &[u32] {
        &self.entity_ids
    }

    /// Iterates over `(entity_id, component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &C)> {
        self.entity_ids.iter().copied().zip(self.data.iter())
    }

    /// Reserves room for `additional` more components.
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
        self.entity_ids.reserve(additional);
        self.index_of.reserve(additional);
    }

    /// Releases unused capacity. Storage never shrinks on its own.
    pub fn trim(&mut self) {
        self.data.shrink_to_fit();
        self.entity_ids.shrink_to_fit();
        self.index_of.shrink_to_fit();
    }

    /// Removes every component, keeping the allocation.
    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.entity_ids.clear();
        self.index_of.clear();
    }

    /// Doubles the capacity.
    fn grow(&mut self) {
        let additional = self.data.capacity().max(MIN_CAPACITY);
        self.reserve(additional);
    }
}

/// Type-erased view over a [`ComponentStorage`], used by the group registry to
/// keep storages of different types side by side and to move rows between
/// groups without knowing the component type.
pub(crate) trait ErasedStorage: Send + Sync {
    /// Type name of the stored component.
    fn component_name(&self) -> &'static str;

    /// Number of stored components.
    fn len(&self) -> usize;

    /// Checks whether `entity_id` is stored.
    fn contains(&self, entity_id: u32) -> bool;

    /// Entity ids in dense order.
    fn entity_ids(&self) -> &[u32];

    /// Removes an entity, returning `false` if it was absent.
    fn remove_entity(&mut self, entity_id: u32) -> bool;

    /// Moves one entity into `dest` (same component type) under `dest_id`.
    fn move_entity_to(&mut self, entity_id: u32, dest: &mut dyn ErasedStorage, dest_id: u32) -> bool;

    /// Moves every entity into `dest` (same component type), keeping ids.
    fn move_all_to(&mut self, dest: &mut dyn ErasedStorage);

    /// Creates an empty storage of the same type for another group.
    fn empty_for(&self, group: GroupId) -> Box<dyn ErasedStorage>;

    /// Reserves room for more entities.
    fn reserve(&mut self, additional: usize);

    /// Drops every component.
    fn clear(&mut self);

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedStorage for ComponentStorage<C> {
    fn component_name(&self) -> &'static str {
        C::type_name()
    }

    fn len(&self) -> usize {
        ComponentStorage::len(self)
    }

    fn contains(&self, entity_id: u32) -> bool {
        ComponentStorage::contains(self, entity_id)
    }

    fn entity_ids(&self) -> &[u32] {
        ComponentStorage::entity_ids(self)
    }

    fn remove_entity(&mut self, entity_id: u32) -> bool {
        self.remove(entity_id).is_ok()
    }

    fn move_entity_to(&mut self, entity_id: u32, dest: &mut dyn ErasedStorage, dest_id: u32) -> bool {
        let Some(dest) = dest.as_any_mut().downcast_mut::<ComponentStorage<C>>() else {
            return false;
        };
        if dest.contains(dest_id) {
            return false;
        }
        match self.remove(entity_id) {
            Ok(component) => dest.add(dest_id, component).is_ok(),
            Err(_) => false,
        }
    }

    fn move_all_to(&mut self, dest: &mut dyn ErasedStorage) {
        let Some(dest) = dest.as_any_mut().downcast_mut::<ComponentStorage<C>>() else {
            return;
        };
        dest.reserve(self.data.len());
        for (entity_id, component) in self.entity_ids.drain(..).zip(self.data.drain(..)) {
            // Collisions are rejected before a group swap is applied.
            let _ = dest.add(entity_id, component);
        }
        self.index_of.clear();
    }

    fn empty_for(&self, group: GroupId) -> Box<dyn ErasedStorage> {
        Box::new(ComponentStorage::<C>::new(group))
    }

    fn reserve(&mut self, additional: usize) {
        ComponentStorage::reserve(self, additional);
    }

    fn clear(&mut self) {
        ComponentStorage::clear(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
