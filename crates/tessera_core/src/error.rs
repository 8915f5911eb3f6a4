//! # Database Error Types
//!
//! All errors that can occur in the entity database.
//!
//! ## Taxonomy
//!
//! - **Configuration** errors are detected while building descriptors, engine
//!   groups or the database itself. They abort initialization.
//! - **Structural** errors come from operations on entities that do not exist
//!   (or exist twice). Synchronous operations return them directly; buffered
//!   operations are collected into a [`SubmissionReport`] at flush.
//! - **Lifetime** errors signal use of a torn-down database and are distinct
//!   from "not found".
//!
//! Stream overflow is not an error: consumers drop the oldest entry.

use std::fmt;

use thiserror::Error;

use crate::ecs::{Egid, GroupId};

/// Errors that can occur in the entity database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// A descriptor registered the same component type twice.
    #[error("component {component} registered twice in descriptor")]
    DuplicateComponent {
        /// Type name of the duplicated component.
        component: &'static str,
    },

    /// A descriptor without any component was used to build entities.
    #[error("entity descriptor has no components")]
    EmptyDescriptor,

    /// An engine order names an engine that was never registered.
    #[error("engine order names `{0}` but no engine with that name was registered")]
    UnknownEngineInOrder(String),

    /// An engine was registered whose name is absent from the declared order.
    #[error("engine `{0}` is not part of the declared engine order")]
    EngineNotInOrder(String),

    /// Two engines (or two order entries) share the same name.
    #[error("engine name `{0}` is used more than once")]
    DuplicateEngine(String),

    /// A group range was indexed past its length.
    #[error("group offset {offset} out of range (range starts at {base}, length {len})")]
    GroupOutOfRange {
        /// First group of the range.
        base: u32,
        /// Number of groups in the range.
        len: u32,
        /// Requested offset.
        offset: u32,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A capacity of zero was requested where at least one slot is required.
    #[error("invalid capacity {capacity} for {what}")]
    InvalidCapacity {
        /// What the capacity was for.
        what: &'static str,
        /// The rejected capacity.
        capacity: usize,
    },

    /// A query asked for the same component array twice with mutable access.
    #[error("component {0} requested twice in the same mutable query")]
    AliasedQuery(&'static str),

    // ------------------------------------------------------------------
    // Structural
    // ------------------------------------------------------------------
    /// An entity id is already present in a component storage.
    #[error("entity {egid} already exists")]
    DuplicateEntity {
        /// The offending entity.
        egid: Egid,
    },

    /// No entity with this id exists in the target group.
    #[error("entity {egid} not found")]
    EntityNotFound {
        /// The entity that was looked up.
        egid: Egid,
    },

    /// The entity exists but has no component of the requested type.
    #[error("entity {egid} has no component {component}")]
    ComponentNotFound {
        /// The entity that was looked up.
        egid: Egid,
        /// Type name of the missing component.
        component: &'static str,
    },

    /// An entity reference whose version no longer matches its slot.
    #[error("entity reference {index}:{version} is stale or unbound")]
    StaleReference {
        /// Reference slot index.
        index: u32,
        /// Version carried by the reference.
        version: u32,
    },

    /// An initial value was supplied for a type the descriptor does not declare.
    #[error("component {component} is not part of the entity descriptor")]
    ComponentNotInDescriptor {
        /// Type name of the component.
        component: &'static str,
    },

    /// One or more buffered operations failed during a flush.
    #[error("{0}")]
    Submission(SubmissionReport),

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------
    /// The database behind a factory, function set or stream was dropped.
    #[error("entity database has been disposed")]
    DatabaseDisposed,

    /// A scheduled job returned an error or panicked.
    #[error("job failed: {0}")]
    JobFailed(String),

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------
    /// Component bytes could not be decoded.
    #[error("serialization failed for {component}: {reason}")]
    Serialization {
        /// Type name of the component being decoded.
        component: &'static str,
        /// What went wrong.
        reason: String,
    },
}

impl EcsError {
    /// Returns `true` for errors raised while configuring the database or its
    /// engines (as opposed to runtime structural errors).
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateComponent { .. }
                | Self::EmptyDescriptor
                | Self::UnknownEngineInOrder(_)
                | Self::EngineNotInOrder(_)
                | Self::DuplicateEngine(_)
                | Self::GroupOutOfRange { .. }
                | Self::InvalidConfig(_)
                | Self::InvalidCapacity { .. }
                | Self::AliasedQuery(_)
        )
    }
}

/// Result type for database operations.
pub type EcsResult<T> = Result<T, EcsError>;

/// Kind of buffered structural operation, used to tag flush errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructuralOp {
    /// Entity construction.
    Build,
    /// Entity removal.
    Remove,
    /// Entity move to another group.
    Swap,
    /// Removal of every entity in a group.
    RemoveGroup,
    /// Move of every entity of a group to another group.
    SwapGroup,
}

impl fmt::Display for StructuralOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Build => "build",
            Self::Remove => "remove",
            Self::Swap => "swap",
            Self::RemoveGroup => "remove-group",
            Self::SwapGroup => "swap-group",
        };
        f.write_str(name)
    }
}

/// Why a buffered operation was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StructuralErrorKind {
    /// The target entity does not exist.
    NotFound,
    /// The entity to create already exists (or is built twice).
    AlreadyExists,
    /// The entity was already removed or swapped in this flush.
    MultipleStructuralChanges,
    /// The swap destination is already occupied.
    DestinationOccupied(Egid),
    /// The source group of a group operation is unknown.
    UnknownGroup(GroupId),
    /// The target group stores a different component set.
    IncompatibleGroup(GroupId),
}

/// A single rejected buffered operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuralError {
    /// Entity the operation targeted (for group operations: `entity_id` 0).
    pub egid: Egid,
    /// Operation kind.
    pub op: StructuralOp,
    /// Reason for rejection.
    pub kind: StructuralErrorKind,
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StructuralErrorKind::NotFound => {
                write!(f, "{} of {}: entity not found", self.op, self.egid)
            }
            StructuralErrorKind::AlreadyExists => {
                write!(f, "{} of {}: entity already exists", self.op, self.egid)
            }
            StructuralErrorKind::MultipleStructuralChanges => write!(
                f,
                "{} of {}: entity already removed or swapped in this submission",
                self.op, self.egid
            ),
            StructuralErrorKind::DestinationOccupied(to) => {
                write!(f, "{} of {}: destination {to} is occupied", self.op, self.egid)
            }
            StructuralErrorKind::UnknownGroup(group) => {
                write!(f, "{} on {group}: group has no storage", self.op)
            }
            StructuralErrorKind::IncompatibleGroup(group) => write!(
                f,
                "{} of {}: group {group} stores a different component set",
                self.op, self.egid
            ),
        }
    }
}

/// Outcome of a flush: counters plus every rejected operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Entities built.
    pub built: usize,
    /// Entities removed (including group removals).
    pub removed: usize,
    /// Entities swapped (including group swaps).
    pub swapped: usize,
    /// Flush iterations run (observers may enqueue follow-up work).
    pub iterations: usize,
    /// Commands still queued because the iteration limit was reached.
    pub deferred: usize,
    /// Rejected operations, in the order they were encountered.
    pub errors: Vec<StructuralError>,
}

impl SubmissionReport {
    /// Returns `true` when no operation was rejected and nothing was deferred.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.deferred == 0
    }
}

impl fmt::Display for SubmissionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submission rejected {} operation(s)",
            self.errors.len()
        )?;
        if self.deferred > 0 {
            write!(f, ", {} command(s) deferred past the iteration limit", self.deferred)?;
        }
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display_lists_every_error() {
        let report = SubmissionReport {
            errors: vec![
                StructuralError {
                    egid: Egid::new(3, GroupId::new(1)),
                    op: StructuralOp::Remove,
                    kind: StructuralErrorKind::NotFound,
                },
                StructuralError {
                    egid: Egid::new(4, GroupId::new(1)),
                    op: StructuralOp::Swap,
                    kind: StructuralErrorKind::DestinationOccupied(Egid::new(4, GroupId::new(2))),
                },
            ],
            ..SubmissionReport::default()
        };

        let text = report.to_string();
        assert!(text.starts_with("submission rejected 2 operation(s)"));
        assert!(text.contains("remove of 3@g1: entity not found"));
        assert!(text.contains("destination 4@g2 is occupied"));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(EcsError::EmptyDescriptor.is_configuration());
        assert!(EcsError::EngineNotInOrder("a".into()).is_configuration());
        assert!(!EcsError::DatabaseDisposed.is_configuration());
        assert!(!EcsError::EntityNotFound {
            egid: Egid::new(0, GroupId::new(0))
        }
        .is_configuration());
    }
}
