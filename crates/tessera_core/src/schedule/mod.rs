//! # Engine Scheduling
//!
//! One logical simulation thread steps engines in a fixed order; nothing in
//! this module runs engines concurrently on its own. Engines that need
//! parallelism schedule jobs explicitly through [`JobHandle`].

mod engine;
mod groups;
mod jobs;
mod root;

pub use engine::{FnEngine, StepEngine};
pub use groups::{EngineOrder, SortedEnginesGroup, SortedEnginesGroupBuilder, UnsortedEnginesGroup};
pub use jobs::{JobEngine, JobHandle, JobifiedEnginesGroup};
pub use root::{EngineLifecycle, EnginesRoot};
