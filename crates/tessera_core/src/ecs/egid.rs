//! # Entity and Group Identifiers
//!
//! Entities are addressed by an [`Egid`]: an entity id that is only unique
//! inside its [`GroupId`]. An `Egid` is NOT stable: swapping an entity to
//! another group changes it. Use an
//! [`EntityReference`](crate::sync::EntityReference) to keep a handle across
//! structural changes.

use std::fmt;
use std::ops::Add;

use crate::error::{EcsError, EcsResult};

/// Identifier of a storage partition.
///
/// Groups are plain integers. Related groups can be declared as a
/// [`GroupRange`] and addressed by offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GroupId(u32);

impl GroupId {
    /// Creates a group identifier.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw group number.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Returns the group `offset` places after this one, or `None` past
    /// the end of the id space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, offset: u32) -> Option<GroupId> {
        match self.0.checked_add(offset) {
            Some(id) => Some(GroupId(id)),
            None => None,
        }
    }

    /// Declares `len` consecutive groups starting at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidCapacity`] when `len` is zero or the range
    /// would overflow the group id space.
    pub fn range(base: u32, len: u32) -> EcsResult<GroupRange> {
        if len == 0 || base.checked_add(len - 1).is_none() {
            return Err(EcsError::InvalidCapacity {
                what: "group range",
                capacity: len as usize,
            });
        }
        Ok(GroupRange { base, len })
    }
}

impl Add<u32> for GroupId {
    type Output = GroupId;

    /// # Panics
    ///
    /// Panics when the result leaves the group id space, in every build
    /// profile. Use [`GroupId::checked_add`] to handle that case.
    #[inline]
    fn add(self, offset: u32) -> GroupId {
        match self.checked_add(offset) {
            Some(group) => group,
            None => panic!("group id overflow: {self} + {offset}"),
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A contiguous namespace of groups, e.g. one group per team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupRange {
    base: u32,
    len: u32,
}

impl GroupRange {
    /// First group of the range.
    #[inline]
    #[must_use]
    pub const fn base(self) -> GroupId {
        GroupId(self.base)
    }

    /// Number of groups in the range.
    #[inline]
    #[must_use]
    pub const fn len(self) -> u32 {
        self.len
    }

    /// Ranges always contain at least one group.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        false
    }

    /// Returns the group at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::GroupOutOfRange`] when `offset >= len`.
    pub fn get(self, offset: u32) -> EcsResult<GroupId> {
        if offset >= self.len {
            return Err(EcsError::GroupOutOfRange {
                base: self.base,
                len: self.len,
                offset,
            });
        }
        Ok(GroupId(self.base + offset))
    }

    /// Checks whether a group belongs to this range.
    #[inline]
    #[must_use]
    pub const fn contains(self, group: GroupId) -> bool {
        group.0 >= self.base && group.0 - self.base < self.len
    }

    /// Iterates over every group of the range.
    pub fn iter(self) -> impl Iterator<Item = GroupId> {
        // `range` guarantees `base + (len - 1)` fits.
        (self.base..=self.base + (self.len - 1)).map(GroupId)
    }
}

/// Entity-Group identifier.
///
/// The entity id is only unique inside `group`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Egid {
    /// Entity id, unique within the group.
    pub entity_id: u32,
    /// Group the entity currently lives in.
    pub group: GroupId,
}

impl Egid {
    /// Creates an EGID.
    #[inline]
    #[must_use]
    pub const fn new(entity_id: u32, group: GroupId) -> Self {
        Self { entity_id, group }
    }

    /// Packs the EGID into a single `u64` (group in the upper 32 bits).
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.group.0 as u64) << 32) | (self.entity_id as u64)
    }

    /// Unpacks an EGID produced by [`Egid::to_u64`].
    #[inline]
    #[must_use]
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            entity_id: packed as u32,
            group: GroupId((packed >> 32) as u32),
        }
    }
}

impl fmt::Display for Egid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity_id, self.group)
    }
}
