//! # Cross-Thread Primitives
//!
//! The only state of the database that may be touched from more than one
//! thread at a time:
//!
//! ```text
//! Worker threads:   claim_reference()      (lock-free CAS)
//!                   publish / try_dequeue  (one lock per consumer ring)
//! Main thread:      everything else, through &mut at the flush point
//! ```

mod references;
mod streams;

pub use references::{EntityReference, EntityReferenceMap};
pub use streams::{Consumer, EntityStreams};
