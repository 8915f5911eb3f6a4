//! # Entity Component System
//!
//! Group-partitioned entity storage with deferred structural changes.
//!
//! ## Design Philosophy
//!
//! - Entities are addressed by [`Egid`] (entity id + group); components of
//!   one group live in dense, index-aligned arrays
//! - Structural changes are queued and applied at a single flush point
//! - Permanent handles ([`EntityReference`](crate::sync::EntityReference))
//!   survive group swaps
//! - No dynamic dispatch in query paths

mod component;
mod db;
mod descriptor;
mod egid;
mod group;
mod storage;
mod submission;

pub use component::Component;
pub use db::{EntitiesDb, EntitiesView, ReactOnStructuralChange};
pub use descriptor::{ComponentBuilder, DescriptorBuilder, EntityDescriptor};
pub use egid::{Egid, GroupId, GroupRange};
pub use group::GroupRegistry;
pub use storage::ComponentStorage;
pub use submission::{EntityFactory, EntityFunctions, EntityInitializer, SubmissionState};

pub(crate) use storage::ErasedStorage;
