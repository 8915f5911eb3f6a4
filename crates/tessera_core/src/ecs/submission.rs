//! # Structural Submission
//!
//! Entity creation, removal and group swaps are never applied on the spot.
//! They are queued as [`StructuralCommand`]s and applied together at the next
//! flush ([`EntitiesDb::submit_entities`]), so engines iterating a group never
//! see slots move under them.
//!
//! ## Flush order
//!
//! ```text
//! queue:   [build a] [remove b] [swap c g1->g2] [build d] [remove-group g3]
//!
//! pass 1:  remove b, swap c, remove-group g3     (enqueue order)
//! pass 2:  build a, build d                      (enqueue order)
//! ```
//!
//! Removes and swaps land before builds so a swap never leaves the entity in
//! two groups at once. Each applied command updates the reference map in the
//! same step. Invalid commands are skipped without touching storage and end
//! up in the [`SubmissionReport`].
//!
//! An EGID takes at most one build, remove or swap per batch. Any later
//! command on an EGID already claimed in the batch is rejected with
//! [`StructuralErrorKind::MultipleStructuralChanges`] before anything is
//! applied, so reordering builds behind removes never changes the outcome
//! for a single entity.
//!
//! [`EntitiesDb::submit_entities`]: super::EntitiesDb::submit_entities

use std::collections::HashSet;

use crossbeam_channel::Sender;

use super::component::Component;
use super::db::{EntitiesView, ReactOnStructuralChange};
use super::descriptor::EntityDescriptor;
use super::egid::{Egid, GroupId};
use crate::error::{EcsError, EcsResult, StructuralError, StructuralErrorKind, StructuralOp, SubmissionReport};
use crate::sync::{EntityReference, EntityReferenceMap};

/// Where the database is in its buffer/flush cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubmissionState {
    /// Nothing queued.
    Idle,
    /// Commands queued, waiting for the next flush.
    Buffering,
    /// Commands being applied. Observers see this state.
    Flushing,
}

/// One buffered structural change.
#[derive(Debug)]
pub(crate) enum StructuralCommand {
    Build {
        egid: Egid,
        reference: EntityReference,
        descriptor: EntityDescriptor,
        row: Vec<u8>,
    },
    Remove {
        egid: Egid,
    },
    Swap {
        from: Egid,
        to: Egid,
    },
    RemoveGroup {
        group: GroupId,
    },
    SwapGroup {
        from: GroupId,
        to: GroupId,
    },
    /// A claimed reference whose build was cancelled.
    Discard {
        reference: EntityReference,
    },
}

impl StructuralCommand {
    fn is_build(&self) -> bool {
        matches!(self, Self::Build { .. })
    }

    /// Entities this command changes one by one. Group commands have none.
    fn entities(&self) -> [Option<Egid>; 2] {
        match *self {
            Self::Build { egid, .. } | Self::Remove { egid } => [Some(egid), None],
            Self::Swap { from, to } => [Some(from), Some(to).filter(|&to| to != from)],
            Self::RemoveGroup { .. } | Self::SwapGroup { .. } | Self::Discard { .. } => [None, None],
        }
    }
}

pub(crate) type CommandSender = Sender<StructuralCommand>;

fn send(sender: &CommandSender, command: StructuralCommand) -> EcsResult<()> {
    sender.send(command).map_err(|_| EcsError::DatabaseDisposed)
}

// ============================================================================
// ISSUERS
// ============================================================================

/// Queues entity builds.
///
/// Borrowed from the database; the references it hands out can be claimed
/// from any thread.
#[derive(Clone, Copy)]
pub struct EntityFactory<'a> {
    references: &'a EntityReferenceMap,
    sender: &'a CommandSender,
}

impl<'a> EntityFactory<'a> {
    pub(crate) fn new(references: &'a EntityReferenceMap, sender: &'a CommandSender) -> Self {
        Self { references, sender }
    }

    /// Starts building an entity at `egid`.
    ///
    /// The entity exists after the next flush. Its reference is claimed now
    /// and can be stored before that.
    #[must_use]
    pub fn build_entity(&self, egid: Egid, descriptor: &EntityDescriptor) -> EntityInitializer {
        EntityInitializer {
            egid,
            reference: self.references.claim_reference(),
            descriptor: descriptor.clone(),
            row: descriptor.default_row(),
            sender: Some(self.sender.clone()),
        }
    }
}

/// Initial values of an entity under construction.
///
/// The build is queued by [`EntityInitializer::submit`] or on drop.
pub struct EntityInitializer {
    egid: Egid,
    reference: EntityReference,
    descriptor: EntityDescriptor,
    row: Vec<u8>,
    sender: Option<CommandSender>,
}

impl EntityInitializer {
    /// Target of the build.
    #[must_use]
    pub fn egid(&self) -> Egid {
        self.egid
    }

    /// Reference claimed for the entity. Resolves once the build is flushed.
    #[must_use]
    pub fn reference(&self) -> EntityReference {
        self.reference
    }

    /// Descriptor the entity is built from.
    #[must_use]
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Sets the initial value of `C`.
    ///
    /// # Errors
    ///
    /// [`EcsError::ComponentNotInDescriptor`] if the descriptor lacks `C`.
    pub fn init<C: Component>(&mut self, value: C) -> EcsResult<&mut Self> {
        self.descriptor.write_component(&mut self.row, value)?;
        Ok(self)
    }

    /// Current initial value of `C`.
    #[must_use]
    pub fn get<C: Component>(&self) -> Option<C> {
        self.descriptor.read_component(&self.row)
    }

    pub(crate) fn row_mut(&mut self) -> &mut [u8] {
        &mut self.row
    }

    /// Queues the build and returns the entity's reference.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn submit(mut self) -> EcsResult<EntityReference> {
        self.enqueue()?;
        Ok(self.reference)
    }

    /// Abandons the build. The claimed reference is recycled at the next flush.
    pub fn cancel(mut self) {
        if let Some(sender) = self.sender.take() {
            // A dropped database has no reference map left to recycle into.
            let _ = send(&sender, StructuralCommand::Discard {
                reference: self.reference,
            });
        }
    }

    fn enqueue(&mut self) -> EcsResult<()> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        send(
            &sender,
            StructuralCommand::Build {
                egid: self.egid,
                reference: self.reference,
                descriptor: self.descriptor.clone(),
                row: std::mem::take(&mut self.row),
            },
        )
    }
}

impl Drop for EntityInitializer {
    fn drop(&mut self) {
        if self.enqueue().is_err() {
            tracing::warn!(egid = %self.egid, "entity build dropped: database disposed");
        }
    }
}

impl std::fmt::Debug for EntityInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityInitializer")
            .field("egid", &self.egid)
            .field("reference", &self.reference)
            .field("descriptor", &self.descriptor.name())
            .finish_non_exhaustive()
    }
}

/// Queues removals and group swaps.
///
/// Owns its end of the queue, so it can be cloned into other threads and kept
/// past the database. Once the database is gone every call fails with
/// [`EcsError::DatabaseDisposed`].
#[derive(Clone, Debug)]
pub struct EntityFunctions {
    sender: CommandSender,
}

impl EntityFunctions {
    pub(crate) fn new(sender: CommandSender) -> Self {
        Self { sender }
    }

    /// Queues the removal of `egid`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn remove_entity(&self, egid: Egid) -> EcsResult<()> {
        send(&self.sender, StructuralCommand::Remove { egid })
    }

    /// Queues a move of `from` to `to`. The entity id may change.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn swap_entity_group(&self, from: Egid, to: Egid) -> EcsResult<()> {
        send(&self.sender, StructuralCommand::Swap { from, to })
    }

    /// Queues a move of `from` into `group`, keeping its entity id.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn swap_entity_to_group(&self, from: Egid, group: GroupId) -> EcsResult<()> {
        self.swap_entity_group(from, Egid::new(from.entity_id, group))
    }

    /// Queues the removal of every entity in `group`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn remove_entities_from_group(&self, group: GroupId) -> EcsResult<()> {
        send(&self.sender, StructuralCommand::RemoveGroup { group })
    }

    /// Queues a move of every entity in `from` to `to`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] if the database was dropped.
    pub fn swap_entities_in_group(&self, from: GroupId, to: GroupId) -> EcsResult<()> {
        send(&self.sender, StructuralCommand::SwapGroup { from, to })
    }
}

// ============================================================================
// FLUSH
// ============================================================================

/// Applies one batch of commands.
pub(crate) struct Submitter<'a> {
    pub(crate) view: &'a mut EntitiesView,
    pub(crate) observers: &'a mut [Box<dyn ReactOnStructuralChange>],
    pub(crate) report: &'a mut SubmissionReport,
    /// Entities removed or swapped (both ends) in this flush.
    touched: HashSet<Egid>,
}

impl<'a> Submitter<'a> {
    pub(crate) fn new(
        view: &'a mut EntitiesView,
        observers: &'a mut [Box<dyn ReactOnStructuralChange>],
        report: &'a mut SubmissionReport,
    ) -> Self {
        Self {
            view,
            observers,
            report,
            touched: HashSet::new(),
        }
    }

    /// Applies `commands`: everything but builds first, then builds, each
    /// pass in enqueue order. A second per-entity command on the same EGID
    /// is rejected up front.
    pub(crate) fn apply(&mut self, commands: Vec<StructuralCommand>) {
        let mut claimed: HashSet<Egid> = HashSet::new();
        let mut builds = Vec::new();
        let mut others = Vec::new();
        for command in commands {
            let entities = command.entities();
            if entities.iter().flatten().any(|egid| claimed.contains(egid)) {
                self.reject_conflict(command);
                continue;
            }
            claimed.extend(entities.into_iter().flatten());
            if command.is_build() {
                builds.push(command);
            } else {
                others.push(command);
            }
        }
        for command in others.into_iter().chain(builds) {
            self.apply_one(command);
        }
    }

    fn reject_conflict(&mut self, command: StructuralCommand) {
        let (egid, op) = match command {
            StructuralCommand::Build { egid, reference, .. } => {
                self.view.references.discard_reference(reference);
                (egid, StructuralOp::Build)
            }
            StructuralCommand::Remove { egid } => (egid, StructuralOp::Remove),
            StructuralCommand::Swap { from, .. } => (from, StructuralOp::Swap),
            StructuralCommand::RemoveGroup { .. }
            | StructuralCommand::SwapGroup { .. }
            | StructuralCommand::Discard { .. } => return,
        };
        self.reject(egid, op, StructuralErrorKind::MultipleStructuralChanges);
    }

    fn apply_one(&mut self, command: StructuralCommand) {
        match command {
            StructuralCommand::Build {
                egid,
                reference,
                descriptor,
                row,
            } => self.build(egid, reference, &descriptor, &row),
            StructuralCommand::Remove { egid } => self.remove(egid),
            StructuralCommand::Swap { from, to } => self.swap(from, to),
            StructuralCommand::RemoveGroup { group } => self.remove_group(group),
            StructuralCommand::SwapGroup { from, to } => self.swap_group(from, to),
            StructuralCommand::Discard { reference } => self.view.references.discard_reference(reference),
        }
    }

    fn reject(&mut self, egid: Egid, op: StructuralOp, kind: StructuralErrorKind) {
        tracing::trace!(%egid, %op, ?kind, "structural command rejected");
        self.report.errors.push(StructuralError { egid, op, kind });
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn ReactOnStructuralChange, &EntitiesView)) {
        for observer in self.observers.iter_mut() {
            f(observer.as_mut(), self.view);
        }
    }

    fn build(&mut self, egid: Egid, reference: EntityReference, descriptor: &EntityDescriptor, row: &[u8]) {
        if let Err(kind) = self.view.registry.insert_row(egid, descriptor, row) {
            self.view.references.discard_reference(reference);
            return self.reject(egid, StructuralOp::Build, kind);
        }
        self.view.references.set_reference(reference, egid);
        self.report.built += 1;
        tracing::trace!(%egid, descriptor = descriptor.name(), "entity built");
        self.notify(|o, view| o.on_added(egid, view));
    }

    fn remove(&mut self, egid: Egid) {
        if self.touched.contains(&egid) {
            return self.reject(egid, StructuralOp::Remove, StructuralErrorKind::MultipleStructuralChanges);
        }
        if !self.view.registry.exists(egid) {
            return self.reject(egid, StructuralOp::Remove, StructuralErrorKind::NotFound);
        }

        self.notify(|o, view| o.on_removed(egid, view));
        if let Err(kind) = self.view.registry.remove_entity(egid) {
            return self.reject(egid, StructuralOp::Remove, kind);
        }
        self.view.references.remove_reference(egid);
        self.touched.insert(egid);
        self.report.removed += 1;
        tracing::trace!(%egid, "entity removed");
    }

    fn swap(&mut self, from: Egid, to: Egid) {
        if self.touched.contains(&from) || self.touched.contains(&to) {
            return self.reject(from, StructuralOp::Swap, StructuralErrorKind::MultipleStructuralChanges);
        }
        if let Err(kind) = self.view.registry.move_entity(from, to) {
            return self.reject(from, StructuralOp::Swap, kind);
        }
        self.view.references.update_reference(from, to);
        self.touched.insert(from);
        self.touched.insert(to);
        self.report.swapped += 1;
        tracing::trace!(%from, %to, "entity swapped");
        self.notify(|o, view| o.on_swapped(from, to, view));
    }

    fn remove_group(&mut self, group: GroupId) {
        let marker = Egid::new(0, group);
        if !self.view.registry.contains_group(group) {
            tracing::trace!(%group, "remove-group on a group without storage");
            return;
        }

        let ids = self.view.registry.entity_ids(group).to_vec();
        if let Some(&id) = ids.iter().find(|&&id| self.touched.contains(&Egid::new(id, group))) {
            return self.reject(
                Egid::new(id, group),
                StructuralOp::RemoveGroup,
                StructuralErrorKind::MultipleStructuralChanges,
            );
        }
        for &id in &ids {
            self.notify(|o, view| o.on_removed(Egid::new(id, group), view));
        }
        if let Err(kind) = self.view.registry.clear_group(group) {
            return self.reject(marker, StructuralOp::RemoveGroup, kind);
        }
        self.view.references.remove_group_references(group);
        self.touched.extend(ids.iter().map(|&id| Egid::new(id, group)));
        self.report.removed += ids.len();
        tracing::trace!(%group, count = ids.len(), "group removed");
    }

    fn swap_group(&mut self, from: GroupId, to: GroupId) {
        let marker = Egid::new(0, from);
        if !self.view.registry.contains_group(from) {
            tracing::trace!(%from, %to, "swap-group on a group without storage");
            return;
        }
        if let Some(&id) = self
            .view
            .registry
            .entity_ids(from)
            .iter()
            .find(|&&id| self.touched.contains(&Egid::new(id, from)) || self.touched.contains(&Egid::new(id, to)))
        {
            return self.reject(
                Egid::new(id, from),
                StructuralOp::SwapGroup,
                StructuralErrorKind::MultipleStructuralChanges,
            );
        }

        let ids = match self.view.registry.move_group(from, to) {
            Ok(ids) => ids,
            Err(kind) => return self.reject(marker, StructuralOp::SwapGroup, kind),
        };
        if from == to {
            return;
        }
        self.view.references.update_group_references(from, to);
        for &id in &ids {
            self.touched.insert(Egid::new(id, from));
            self.touched.insert(Egid::new(id, to));
        }
        self.report.swapped += ids.len();
        tracing::trace!(%from, %to, count = ids.len(), "group swapped");
        for &id in &ids {
            self.notify(|o, view| o.on_swapped(Egid::new(id, from), Egid::new(id, to), view));
        }
    }
}
