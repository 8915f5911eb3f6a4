//! # Group Registry
//!
//! Maps groups to their per-type component storages.
//!
//! ```text
//! GroupRegistry
//!   g1 ─┬─ Position: [P(4), P(8), P(1)]   ids [4, 8, 1]
//!       └─ Velocity: [V(4), V(8), V(1)]   ids [4, 8, 1]
//!   g2 ─── Position: [P(3)]               ids [3]
//! ```
//!
//! Every entity in a group has the same component set, and every storage of a
//! group is mutated in lockstep. The dense arrays of one group are therefore
//! index-aligned: slot `i` of every storage belongs to the same entity.
//!
//! Structural mutation (`insert_row`, `remove_entity`, `move_entity`, ...) is
//! crate-private and only reachable from the submission flush.

use std::any::TypeId;
use std::collections::HashMap;

use super::component::Component;
use super::descriptor::EntityDescriptor;
use super::egid::{Egid, GroupId};
use super::storage::{ComponentStorage, ErasedStorage};
use crate::error::{EcsError, EcsResult, StructuralErrorKind};

/// All storages of one group.
#[derive(Default)]
struct GroupStorage {
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
}

impl GroupStorage {
    /// Any storage; all of them hold the same entity ids in the same order.
    fn any(&self) -> Option<&dyn ErasedStorage> {
        self.storages.values().next().map(|s| &**s)
    }

    fn len(&self) -> usize {
        self.any().map_or(0, |s| s.len())
    }

    fn contains(&self, entity_id: u32) -> bool {
        self.any().is_some_and(|s| s.contains(entity_id))
    }

    /// Checks that the group can hold entities described by `types`.
    ///
    /// A group without storages accepts any component set.
    fn accepts<'a>(&self, mut types: impl ExactSizeIterator<Item = &'a TypeId>) -> bool {
        self.storages.is_empty()
            || (types.len() == self.storages.len() && types.all(|t| self.storages.contains_key(t)))
    }
}

/// Per-group component storages and typed query access.
pub struct GroupRegistry {
    groups: HashMap<GroupId, GroupStorage>,
    labels: HashMap<GroupId, String>,
    initial_capacity: usize,
}

impl GroupRegistry {
    /// Creates an empty registry. New storages reserve `initial_capacity` slots.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            groups: HashMap::new(),
            labels: HashMap::new(),
            initial_capacity,
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Returns the typed storage of `C` in `group`.
    #[must_use]
    pub fn storage<C: Component>(&self, group: GroupId) -> Option<&ComponentStorage<C>> {
        self.groups
            .get(&group)?
            .storages
            .get(&TypeId::of::<C>())?
            .as_any()
            .downcast_ref()
    }

    /// Returns the typed storage of `C` in `group` mutably.
    ///
    /// Only component values can be changed through it: adding, removing
    /// and clearing entries are crate-private and happen during the flush.
    pub fn storage_mut<C: Component>(&mut self, group: GroupId) -> Option<&mut ComponentStorage<C>> {
        self.groups
            .get_mut(&group)?
            .storages
            .get_mut(&TypeId::of::<C>())?
            .as_any_mut()
            .downcast_mut()
    }

    /// Returns the dense array of `C` in `group` and its length.
    ///
    /// A missing group or component yields an empty array.
    #[must_use]
    pub fn query<C: Component>(&self, group: GroupId) -> (&[C], usize) {
        match self.storage::<C>(group) {
            Some(storage) => (storage.as_slice(), storage.len()),
            None => (&[], 0),
        }
    }

    /// Returns the dense array of `C` in `group` mutably, zero-copy.
    pub fn query_mut<C: Component>(&mut self, group: GroupId) -> (&mut [C], usize) {
        match self.storage_mut::<C>(group) {
            Some(storage) => {
                let len = storage.len();
                (storage.as_mut_slice(), len)
            }
            None => (&mut [], 0),
        }
    }

    /// Returns two component arrays of the same group, mutably and
    /// index-aligned: `a[i]` and `b[i]` belong to the same entity.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::AliasedQuery`] when `A` and `B` are the same type.
    pub fn query2_mut<A: Component, B: Component>(
        &mut self,
        group: GroupId,
    ) -> EcsResult<(&mut [A], &mut [B], usize)> {
        let (a_id, b_id) = (TypeId::of::<A>(), TypeId::of::<B>());
        if a_id == b_id {
            return Err(EcsError::AliasedQuery(A::type_name()));
        }

        let Some(group) = self.groups.get_mut(&group) else {
            return Ok((&mut [], &mut [], 0));
        };

        let mut a = None;
        let mut b = None;
        for (type_id, storage) in &mut group.storages {
            if *type_id == a_id {
                a = storage.as_any_mut().downcast_mut::<ComponentStorage<A>>();
            } else if *type_id == b_id {
                b = storage.as_any_mut().downcast_mut::<ComponentStorage<B>>();
            }
        }

        match (a, b) {
            (Some(a), Some(b)) => {
                debug_assert_eq!(a.entity_ids(), b.entity_ids(), "group storages out of lockstep");
                let len = a.len();
                Ok((a.as_mut_slice(), b.as_mut_slice(), len))
            }
            _ => Ok((&mut [], &mut [], 0)),
        }
    }

    /// Returns the component of one entity, if present.
    #[must_use]
    pub fn try_query_entity<C: Component>(&self, egid: Egid) -> Option<&C> {
        self.storage::<C>(egid.group)?.get(egid.entity_id)
    }

    /// Returns the component of one entity mutably, if present.
    pub fn try_query_entity_mut<C: Component>(&mut self, egid: Egid) -> Option<&mut C> {
        self.storage_mut::<C>(egid.group)?.get_mut(egid.entity_id)
    }

    /// Returns the component of one entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] if the entity does not exist,
    /// [`EcsError::ComponentNotFound`] if it exists without `C`.
    pub fn query_entity<C: Component>(&self, egid: Egid) -> EcsResult<&C> {
        if let Some(component) = self.try_query_entity::<C>(egid) {
            return Ok(component);
        }
        if self.exists(egid) {
            Err(EcsError::ComponentNotFound {
                egid,
                component: C::type_name(),
            })
        } else {
            Err(EcsError::EntityNotFound { egid })
        }
    }

    /// Checks whether an entity currently lives at `egid`.
    #[must_use]
    pub fn exists(&self, egid: Egid) -> bool {
        self.groups
            .get(&egid.group)
            .is_some_and(|g| g.contains(egid.entity_id))
    }

    /// Checks whether `group` has storages.
    #[must_use]
    pub fn contains_group(&self, group: GroupId) -> bool {
        self.groups.contains_key(&group)
    }

    /// Number of entities of `group` that carry `C`.
    #[must_use]
    pub fn count<C: Component>(&self, group: GroupId) -> usize {
        self.storage::<C>(group).map_or(0, ComponentStorage::len)
    }

    /// Number of entities in `group`.
    #[must_use]
    pub fn group_count(&self, group: GroupId) -> usize {
        self.groups.get(&group).map_or(0, GroupStorage::len)
    }

    /// Entity ids of `group` in dense order.
    #[must_use]
    pub fn entity_ids(&self, group: GroupId) -> &[u32] {
        match self.groups.get(&group).and_then(GroupStorage::any) {
            Some(storage) => storage.entity_ids(),
            None => &[],
        }
    }

    /// Iterates over `(egid, component)` pairs of `C` in `group`.
    pub fn iter<C: Component>(&self, group: GroupId) -> impl Iterator<Item = (Egid, &C)> {
        self.storage::<C>(group)
            .into_iter()
            .flat_map(move |s| s.iter().map(move |(id, c)| (Egid::new(id, group), c)))
    }

    /// Groups holding storage for `C`, sorted by id.
    #[must_use]
    pub fn groups_with<C: Component>(&self) -> Vec<GroupId> {
        let type_id = TypeId::of::<C>();
        let mut groups: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.storages.contains_key(&type_id))
            .map(|(&id, _)| id)
            .collect();
        groups.sort_unstable();
        groups
    }

    /// Component type names registered for `group`, sorted.
    #[must_use]
    pub fn component_names(&self, group: GroupId) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .groups
            .get(&group)
            .map(|g| g.storages.values().map(|s| s.component_name()).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Groups that have storages, sorted by id.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.keys().copied().collect();
        groups.sort_unstable();
        groups
    }

    pub(crate) fn erased_storage(&self, group: GroupId, type_id: TypeId) -> Option<&dyn ErasedStorage> {
        self.groups.get(&group)?.storages.get(&type_id).map(|s| &**s)
    }

    /// Attaches a debug label to a group.
    pub fn name_group(&mut self, group: GroupId, label: impl Into<String>) {
        self.labels.insert(group, label.into());
    }

    /// Returns the debug label of a group.
    #[must_use]
    pub fn group_label(&self, group: GroupId) -> Option<&str> {
        self.labels.get(&group).map(String::as_str)
    }

    // ========================================================================
    // STRUCTURAL MUTATION - flush only
    // ========================================================================

    /// Creates the storages of `descriptor` in `group` (if the group is new)
    /// and reserves room for `additional` entities.
    pub(crate) fn preallocate(
        &mut self,
        group: GroupId,
        descriptor: &EntityDescriptor,
        additional: usize,
    ) -> Result<(), StructuralErrorKind> {
        let storage = self.ensure_group(group, descriptor)?;
        for erased in storage.storages.values_mut() {
            erased.reserve(additional);
        }
        Ok(())
    }

    /// Inserts one entity. `row` holds every component of `descriptor`
    /// packed in descriptor order.
    pub(crate) fn insert_row(
        &mut self,
        egid: Egid,
        descriptor: &EntityDescriptor,
        row: &[u8],
    ) -> Result<(), StructuralErrorKind> {
        if self.exists(egid) {
            return Err(StructuralErrorKind::AlreadyExists);
        }
        let group = self.ensure_group(egid.group, descriptor)?;

        for builder in descriptor.components() {
            let storage = group
                .storages
                .get_mut(&builder.type_id())
                .ok_or(StructuralErrorKind::IncompatibleGroup(egid.group))?;
            if !builder.insert(&mut **storage, egid.entity_id, row) {
                return Err(StructuralErrorKind::AlreadyExists);
            }
        }
        Ok(())
    }

    /// Removes one entity from every storage of its group.
    pub(crate) fn remove_entity(&mut self, egid: Egid) -> Result<(), StructuralErrorKind> {
        let group = self
            .groups
            .get_mut(&egid.group)
            .filter(|g| g.contains(egid.entity_id))
            .ok_or(StructuralErrorKind::NotFound)?;
        for storage in group.storages.values_mut() {
            storage.remove_entity(egid.entity_id);
        }
        Ok(())
    }

    /// Moves one entity to `to`, creating the destination storages when the
    /// destination group is new.
    pub(crate) fn move_entity(&mut self, from: Egid, to: Egid) -> Result<(), StructuralErrorKind> {
        if !self.exists(from) {
            return Err(StructuralErrorKind::NotFound);
        }
        if self.exists(to) {
            return Err(StructuralErrorKind::DestinationOccupied(to));
        }
        if from.group == to.group {
            return self.rename_in_group(from, to.entity_id);
        }

        let mut source = self.groups.remove(&from.group).unwrap_or_default();
        let result = self.move_between(&mut source, from.entity_id, to);
        self.groups.insert(from.group, source);
        result
    }

    /// Removes every entity of `group`, returning their ids.
    pub(crate) fn clear_group(&mut self, group: GroupId) -> Result<Vec<u32>, StructuralErrorKind> {
        let storage = self
            .groups
            .get_mut(&group)
            .ok_or(StructuralErrorKind::UnknownGroup(group))?;
        let ids = storage.any().map(|s| s.entity_ids().to_vec()).unwrap_or_default();
        for erased in storage.storages.values_mut() {
            erased.clear();
        }
        Ok(ids)
    }

    /// Moves every entity of `from` into `to`, keeping entity ids.
    pub(crate) fn move_group(&mut self, from: GroupId, to: GroupId) -> Result<Vec<u32>, StructuralErrorKind> {
        if from == to {
            return match self.groups.get(&from) {
                Some(_) => Ok(self.entity_ids(from).to_vec()),
                None => Err(StructuralErrorKind::UnknownGroup(from)),
            };
        }
        let Some(mut source) = self.groups.remove(&from) else {
            return Err(StructuralErrorKind::UnknownGroup(from));
        };
        let result = self.move_all_between(&mut source, to);
        self.groups.insert(from, source);
        result
    }

    fn ensure_group(
        &mut self,
        group: GroupId,
        descriptor: &EntityDescriptor,
    ) -> Result<&mut GroupStorage, StructuralErrorKind> {
        let capacity = self.initial_capacity;
        let storage = self.groups.entry(group).or_default();
        if !storage.accepts(descriptor.type_ids()) {
            return Err(StructuralErrorKind::IncompatibleGroup(group));
        }
        if storage.storages.is_empty() {
            for builder in descriptor.components() {
                storage
                    .storages
                    .insert(builder.type_id(), builder.new_storage(group, capacity));
            }
            tracing::info!(%group, components = descriptor.len(), "group storage created");
        }
        Ok(storage)
    }

    /// Creates empty storages in `to` mirroring `source`, or checks that the
    /// existing ones match.
    fn ensure_mirror(&mut self, source: &GroupStorage, to: GroupId) -> Result<&mut GroupStorage, StructuralErrorKind> {
        let dest = self.groups.entry(to).or_default();
        if !dest.accepts(source.storages.keys()) {
            return Err(StructuralErrorKind::IncompatibleGroup(to));
        }
        if dest.storages.is_empty() {
            for (type_id, storage) in &source.storages {
                dest.storages.insert(*type_id, storage.empty_for(to));
            }
        }
        Ok(dest)
    }

    fn move_between(&mut self, source: &mut GroupStorage, entity_id: u32, to: Egid) -> Result<(), StructuralErrorKind> {
        let dest = self.ensure_mirror(source, to.group)?;
        for (type_id, storage) in &mut source.storages {
            if let Some(target) = dest.storages.get_mut(type_id) {
                storage.move_entity_to(entity_id, &mut **target, to.entity_id);
            }
        }
        Ok(())
    }

    fn move_all_between(&mut self, source: &mut GroupStorage, to: GroupId) -> Result<Vec<u32>, StructuralErrorKind> {
        let ids = source.any().map(|s| s.entity_ids().to_vec()).unwrap_or_default();
        let dest = self.ensure_mirror(source, to)?;
        if let Some(&clash) = ids.iter().find(|&&id| dest.contains(id)) {
            return Err(StructuralErrorKind::DestinationOccupied(Egid::new(clash, to)));
        }
        for (type_id, storage) in &mut source.storages {
            if let Some(target) = dest.storages.get_mut(type_id) {
                storage.move_all_to(&mut **target);
            }
        }
        Ok(ids)
    }

    /// Changes the entity id of an entity without leaving its group.
    fn rename_in_group(&mut self, from: Egid, entity_id: u32) -> Result<(), StructuralErrorKind> {
        let group = self.groups.get_mut(&from.group).ok_or(StructuralErrorKind::NotFound)?;
        let mut scratch = GroupStorage::default();
        for (type_id, storage) in &group.storages {
            scratch.storages.insert(*type_id, storage.empty_for(from.group));
        }
        // Round-trip through scratch storages so every array stays aligned.
        for (type_id, storage) in &mut group.storages {
            if let Some(tmp) = scratch.storages.get_mut(type_id) {
                storage.move_entity_to(from.entity_id, &mut **tmp, entity_id);
                tmp.move_entity_to(entity_id, &mut **storage, entity_id);
            }
        }
        Ok(())
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
