//! # Entity Reference Map
//!
//! Permanent handles that survive group swaps and slot moves.
//!
//! ```text
//! slots:  [ 0: 3@g1 v0 | 1: free v2 -> 4 | 2: 9@g2 v1 | 3: claimed v0 ]
//! head:   1                  (free list: 1 -> 4 -> 5 -> ... fresh region)
//! ```
//!
//! ## Claiming
//!
//! `claim_reference` takes `&self` and can run on any number of threads at
//! once. It pops the free list with a compare-and-swap on `head`. Indices at
//! or past `slots.len()` form the fresh region: popping one yields `index + 1`
//! as the next head and version 0.
//!
//! Pushes onto the free list (`remove_reference`, `discard_reference`) need
//! `&mut self`, so they never race a pop and the CAS loop cannot suffer ABA.
//!
//! ## Versions
//!
//! Every recycle bumps the slot version. A reference only resolves when its
//! version matches the slot and the slot is bound, so a handle to a removed
//! entity never aliases the entity that later reuses the index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ecs::{Egid, GroupId};

/// Permanent handle to an entity, independent of its group and slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityReference {
    index: u32,
    version: u32,
}

impl EntityReference {
    /// Sentinel that never resolves.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        version: u32::MAX,
    };

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot version at claim time.
    #[inline]
    #[must_use]
    pub const fn version(self) -> u32 {
        self.version
    }

    /// Checks for the [`EntityReference::INVALID`] sentinel.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.index == u32::MAX && self.version == u32::MAX
    }
}

impl Default for EntityReference {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for EntityReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref({}:{})", self.index, self.version)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    egid: Option<Egid>,
    version: u32,
    /// Next free index while the slot sits on the free list.
    next_free: u32,
}

/// Bidirectional map between [`EntityReference`]s and [`Egid`]s.
#[derive(Debug, Default)]
pub struct EntityReferenceMap {
    slots: Vec<Slot>,
    head: AtomicU32,
    reverse: HashMap<GroupId, HashMap<u32, EntityReference>>,
    bound: usize,
}

impl EntityReferenceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map with room for `capacity` references.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.preallocate(capacity);
        map
    }

    /// Reserves slot storage for `additional` more references.
    pub fn preallocate(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    /// Number of references currently bound to an entity.
    #[inline]
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bound
    }

    /// Claims a fresh or recycled reference. Lock-free; callable from any thread.
    ///
    /// The reference resolves only after it is bound at the next flush.
    #[must_use]
    pub fn claim_reference(&self) -> EntityReference {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (next, version) = match self.slots.get(head as usize) {
                Some(slot) => (slot.next_free, slot.version),
                None => (head + 1, 0),
            };
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return EntityReference {
                        index: head,
                        version,
                    }
                }
                Err(current) => head = current,
            }
        }
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        let index = index as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::default());
        }
        &mut self.slots[index]
    }

    /// Binds a claimed reference to `egid`.
    pub fn set_reference(&mut self, reference: EntityReference, egid: Egid) {
        let slot = self.slot_mut(reference.index);
        let was_bound = slot.egid.replace(egid).is_some();
        slot.version = reference.version;
        if !was_bound {
            self.bound += 1;
        }
        self.reverse
            .entry(egid.group)
            .or_default()
            .insert(egid.entity_id, reference);
    }

    /// Rebinds the reference of `from` to `to`. Returns `false` if `from` has
    /// no reference.
    pub fn update_reference(&mut self, from: Egid, to: Egid) -> bool {
        let Some(reference) = self
            .reverse
            .get_mut(&from.group)
            .and_then(|m| m.remove(&from.entity_id))
        else {
            return false;
        };
        self.slots[reference.index as usize].egid = Some(to);
        self.reverse
            .entry(to.group)
            .or_default()
            .insert(to.entity_id, reference);
        true
    }

    /// Unbinds the reference of `egid` and recycles its index.
    pub fn remove_reference(&mut self, egid: Egid) -> Option<EntityReference> {
        let reference = self
            .reverse
            .get_mut(&egid.group)
            .and_then(|m| m.remove(&egid.entity_id))?;
        self.recycle(reference.index);
        self.bound -= 1;
        Some(reference)
    }

    /// Recycles a claimed reference that was never bound.
    ///
    /// Bound references are left untouched.
    pub fn discard_reference(&mut self, reference: EntityReference) {
        if reference.is_invalid() {
            return;
        }
        let slot = self.slot_mut(reference.index);
        if slot.egid.is_none() && slot.version == reference.version {
            self.recycle(reference.index);
        }
    }

    /// Unbinds every reference of `group` in one pass. Returns how many were removed.
    pub fn remove_group_references(&mut self, group: GroupId) -> usize {
        let Some(references) = self.reverse.remove(&group) else {
            return 0;
        };
        for reference in references.values() {
            self.recycle(reference.index);
        }
        self.bound -= references.len();
        references.len()
    }

    /// Moves every reference of `from` to `to`, keeping entity ids.
    pub fn update_group_references(&mut self, from: GroupId, to: GroupId) {
        if from == to {
            return;
        }
        let Some(references) = self.reverse.remove(&from) else {
            return;
        };
        let target = self.reverse.entry(to).or_default();
        for (entity_id, reference) in references {
            let egid = Egid::new(entity_id, to);
            self.slots[reference.index as usize].egid = Some(egid);
            target.insert(entity_id, reference);
        }
    }

    /// Resolves a reference. `None` if it is stale, unbound or invalid.
    #[must_use]
    pub fn try_resolve(&self, reference: EntityReference) -> Option<Egid> {
        let slot = self.slots.get(reference.index as usize)?;
        if slot.version == reference.version {
            slot.egid
        } else {
            None
        }
    }

    /// Reverse lookup.
    #[must_use]
    pub fn reference_of(&self, egid: Egid) -> Option<EntityReference> {
        self.reverse.get(&egid.group)?.get(&egid.entity_id).copied()
    }

    fn recycle(&mut self, index: u32) {
        let head = *self.head.get_mut();
        let slot = self.slot_mut(index);
        slot.egid = None;
        slot.version = slot.version.wrapping_add(1);
        slot.next_free = head;
        *self.head.get_mut() = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const G1: GroupId = GroupId::new(1);
    const G2: GroupId = GroupId::new(2);

    #[test]
    fn test_claimed_reference_resolves_after_bind() {
        let mut map = EntityReferenceMap::new();
        let r = map.claim_reference();
        assert_eq!(map.try_resolve(r), None);

        map.set_reference(r, Egid::new(4, G1));
        assert_eq!(map.try_resolve(r), Some(Egid::new(4, G1)));
        assert_eq!(map.reference_of(Egid::new(4, G1)), Some(r));
        assert_eq!(map.bound_count(), 1);
    }

    #[test]
    fn test_recycled_index_does_not_alias() {
        let mut map = EntityReferenceMap::new();
        let old = map.claim_reference();
        map.set_reference(old, Egid::new(1, G1));
        map.remove_reference(Egid::new(1, G1));

        let new = map.claim_reference();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.version(), old.version());
        map.set_reference(new, Egid::new(1, G1));

        assert_eq!(map.try_resolve(old), None);
        assert_eq!(map.try_resolve(new), Some(Egid::new(1, G1)));
    }

    #[test]
    fn test_free_list_is_lifo_then_fresh() {
        let mut map = EntityReferenceMap::new();
        let refs: Vec<_> = (0..3).map(|_| map.claim_reference()).collect();
        for (i, r) in refs.iter().enumerate() {
            map.set_reference(*r, Egid::new(i as u32, G1));
        }
        map.remove_reference(Egid::new(0, G1));
        map.remove_reference(Egid::new(2, G1));

        assert_eq!(map.claim_reference().index(), 2);
        assert_eq!(map.claim_reference().index(), 0);
        assert_eq!(map.claim_reference().index(), 3);
    }

    #[test]
    fn test_update_and_group_operations() {
        let mut map = EntityReferenceMap::new();
        let a = map.claim_reference();
        let b = map.claim_reference();
        map.set_reference(a, Egid::new(1, G1));
        map.set_reference(b, Egid::new(2, G1));

        assert!(map.update_reference(Egid::new(1, G1), Egid::new(7, G2)));
        assert_eq!(map.try_resolve(a), Some(Egid::new(7, G2)));
        assert!(!map.update_reference(Egid::new(1, G1), Egid::new(8, G2)));

        map.update_group_references(G2, G1);
        assert_eq!(map.try_resolve(a), Some(Egid::new(7, G1)));

        assert_eq!(map.remove_group_references(G1), 2);
        assert_eq!(map.try_resolve(a), None);
        assert_eq!(map.try_resolve(b), None);
        assert_eq!(map.bound_count(), 0);
    }

    #[test]
    fn test_discard_recycles_unbound_claim() {
        let mut map = EntityReferenceMap::new();
        let r = map.claim_reference();
        map.discard_reference(r);
        let again = map.claim_reference();
        assert_eq!(again.index(), r.index());
        assert_eq!(again.version(), r.version() + 1);
        assert_eq!(map.try_resolve(EntityReference::INVALID), None);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        let mut map = EntityReferenceMap::with_capacity(64);
        let seed: Vec<_> = (0..32).map(|_| map.claim_reference()).collect();
        for (i, r) in seed.iter().enumerate() {
            map.set_reference(*r, Egid::new(i as u32, G1));
        }
        for i in 0..32 {
            map.remove_reference(Egid::new(i, G1));
        }

        let claimed: Vec<EntityReference> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..100).map(|_| map.claim_reference()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<u32> = claimed.iter().map(|r| r.index()).collect();
        assert_eq!(unique.len(), claimed.len());
    }
}
