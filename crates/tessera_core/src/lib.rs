//! # TESSERA Core
//!
//! Group-partitioned Entity Component System (ECS) runtime designed for:
//! - Dense, index-aligned component arrays per group
//! - Structural changes deferred to a single flush point
//! - Permanent entity references claimable from any thread
//!
//! ## Architecture Rules
//!
//! 1. **Read/iterate during Step, mutate only during Flush** - engines queue
//!    builds, removals and swaps; `submit_entities` applies them
//! 2. **Data-oriented design** - components are plain old data in contiguous arrays
//! 3. **Explicit ordering** - engines run in registration order or in a
//!    declared order, never implicitly in parallel
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{EntitiesDb, EntityDescriptor, Egid, GroupId};
//!
//! const SHIPS: GroupId = GroupId::new(1);
//!
//! let ship = EntityDescriptor::builder("ship").with::<Position>().build()?;
//! let mut db = EntitiesDb::new();
//! db.factory().build_entity(Egid::new(0, SHIPS), &ship).submit()?;
//! db.submit_entities()?;
//! let (positions, count) = db.query::<Position>(SHIPS);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod schedule;
pub mod serialization;
pub mod sync;

pub use config::{DatabaseConfig, StructuralPolicy};
pub use ecs::{
    Component, ComponentBuilder, ComponentStorage, DescriptorBuilder, Egid, EntitiesDb, EntitiesView,
    EntityDescriptor, EntityFactory, EntityFunctions, EntityInitializer, GroupId, GroupRange, GroupRegistry,
    ReactOnStructuralChange, SubmissionState,
};
pub use error::{EcsError, EcsResult, StructuralError, StructuralErrorKind, StructuralOp, SubmissionReport};
pub use schedule::{
    EngineLifecycle, EngineOrder, EnginesRoot, FnEngine, JobEngine, JobHandle, JobifiedEnginesGroup,
    SortedEnginesGroup, SortedEnginesGroupBuilder, StepEngine, UnsortedEnginesGroup,
};
pub use serialization::{ComponentSerializer, PodSerializer};
pub use sync::{Consumer, EntityReference, EntityReferenceMap, EntityStreams};
