//! # Entities Database
//!
//! ```text
//!  ┌──────────────────── EntitiesDb ────────────────────┐
//!  │  EntitiesView (what engines see)                   │
//!  │    registry    references    streams    sender ───┼──► queue
//!  │                                                    │      │
//!  │  observers   config   receiver ◄────────────────────┼──────┘
//!  └────────────────────────────────────────────────────┘
//! ```
//!
//! Engines step against `&mut EntitiesView`: they read and write component
//! values, resolve references, publish on streams and queue structural
//! changes. Only the database can flush, so storage never moves while an
//! engine iterates it.

use std::ops::{Deref, DerefMut};

use crossbeam_channel::Receiver;

use super::component::Component;
use super::descriptor::EntityDescriptor;
use super::egid::{Egid, GroupId};
use super::group::GroupRegistry;
use super::submission::{
    CommandSender, EntityFactory, EntityFunctions, StructuralCommand, SubmissionState, Submitter,
};
use crate::config::{DatabaseConfig, StructuralPolicy};
use crate::error::{EcsError, EcsResult, SubmissionReport};
use crate::sync::{EntityReference, EntityReferenceMap, EntityStreams};

/// Callbacks fired while a flush applies structural changes.
///
/// Removals are reported before the data disappears, additions and swaps
/// after they land. Observers may queue further commands through
/// [`EntitiesView::functions`] or [`EntitiesView::factory`]; those run in a
/// later pass of the same flush.
pub trait ReactOnStructuralChange: Send {
    /// An entity was built.
    fn on_added(&mut self, _egid: Egid, _view: &EntitiesView) {}

    /// An entity is about to be removed.
    fn on_removed(&mut self, _egid: Egid, _view: &EntitiesView) {}

    /// An entity moved from `from` to `to`.
    fn on_swapped(&mut self, _from: Egid, _to: Egid, _view: &EntitiesView) {}

    /// The flush finished.
    fn on_submitted(&mut self, _report: &SubmissionReport) {}
}

// ============================================================================
// VIEW
// ============================================================================

/// Step-time access to the database.
pub struct EntitiesView {
    pub(crate) registry: GroupRegistry,
    pub(crate) references: EntityReferenceMap,
    pub(crate) streams: EntityStreams,
    pub(crate) sender: CommandSender,
    /// Set while [`EntitiesDb::submit_entities`] runs.
    pub(crate) flushing: bool,
    /// Commands held back by the iteration limit.
    pub(crate) deferred: usize,
}

impl EntitiesView {
    /// Component storages.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    /// Component storages, for in-place value updates.
    #[inline]
    pub fn registry_mut(&mut self) -> &mut GroupRegistry {
        &mut self.registry
    }

    /// Dense array of `C` in `group`.
    #[must_use]
    pub fn query<C: Component>(&self, group: GroupId) -> (&[C], usize) {
        self.registry.query(group)
    }

    /// Dense array of `C` in `group`, mutably.
    pub fn query_mut<C: Component>(&mut self, group: GroupId) -> (&mut [C], usize) {
        self.registry.query_mut(group)
    }

    /// Component of one entity.
    #[must_use]
    pub fn try_query_entity<C: Component>(&self, egid: Egid) -> Option<&C> {
        self.registry.try_query_entity(egid)
    }

    /// Component of one entity, mutably.
    pub fn try_query_entity_mut<C: Component>(&mut self, egid: Egid) -> Option<&mut C> {
        self.registry.try_query_entity_mut(egid)
    }

    /// Reference map.
    #[inline]
    #[must_use]
    pub fn references(&self) -> &EntityReferenceMap {
        &self.references
    }

    /// Resolves a reference to the entity's current location.
    #[must_use]
    pub fn try_resolve(&self, reference: EntityReference) -> Option<Egid> {
        self.references.try_resolve(reference)
    }

    /// Reads `C` of the entity behind `reference`.
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleReference`] if the reference does not resolve,
    /// otherwise the errors of [`GroupRegistry::query_entity`].
    pub fn query_by_reference<C: Component>(&self, reference: EntityReference) -> EcsResult<&C> {
        let egid = self.try_resolve(reference).ok_or(EcsError::StaleReference {
            index: reference.index(),
            version: reference.version(),
        })?;
        self.registry.query_entity(egid)
    }

    /// Queues entity builds for the next flush.
    #[must_use]
    pub fn factory(&self) -> EntityFactory<'_> {
        EntityFactory::new(&self.references, &self.sender)
    }

    /// Queues removals and swaps for the next flush.
    #[must_use]
    pub fn functions(&self) -> EntityFunctions {
        EntityFunctions::new(self.sender.clone())
    }

    /// Entity streams.
    #[inline]
    #[must_use]
    pub fn streams(&self) -> &EntityStreams {
        &self.streams
    }

    /// Checks for queued structural commands.
    #[must_use]
    pub fn has_pending_submission(&self) -> bool {
        !self.sender.is_empty() || self.deferred > 0
    }

    /// Current submission state.
    ///
    /// Engines see [`SubmissionState::Idle`] or [`SubmissionState::Buffering`];
    /// observers called during a flush see [`SubmissionState::Flushing`].
    #[must_use]
    pub fn state(&self) -> SubmissionState {
        if self.flushing {
            SubmissionState::Flushing
        } else if self.has_pending_submission() {
            SubmissionState::Buffering
        } else {
            SubmissionState::Idle
        }
    }

    /// Publishes the current value of `C` at `egid` to its stream.
    ///
    /// # Returns
    ///
    /// Number of consumers that received it.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::ComponentNotFound`] if there
    /// is no such value.
    pub fn publish_entity_change<C: Component>(&self, egid: Egid) -> EcsResult<usize> {
        let value = *self.registry.query_entity::<C>(egid)?;
        Ok(self.streams.publish(value, egid))
    }
}

// ============================================================================
// DATABASE
// ============================================================================

/// Owner of all entity state.
///
/// Dereferences to [`EntitiesView`] for queries and command issuing.
///
/// # Example
///
/// ```rust,ignore
/// let mut db = EntitiesDb::new();
/// let reference = db
///     .factory()
///     .build_entity(Egid::new(0, SHIPS), &ship)
///     .submit()?;
/// db.submit_entities()?;
/// assert!(db.try_resolve(reference).is_some());
/// ```
pub struct EntitiesDb {
    view: EntitiesView,
    receiver: Receiver<StructuralCommand>,
    /// Commands left over when the iteration limit was hit.
    carry_over: Vec<StructuralCommand>,
    observers: Vec<Box<dyn ReactOnStructuralChange>>,
    config: DatabaseConfig,
}

impl EntitiesDb {
    /// Creates a database with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(DatabaseConfig::default())
    }

    /// Creates a database from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(config: DatabaseConfig) -> EcsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: DatabaseConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let view = EntitiesView {
            registry: GroupRegistry::new(config.initial_group_capacity),
            references: EntityReferenceMap::with_capacity(config.reference_preallocation),
            streams: EntityStreams::new(),
            sender,
            flushing: false,
            deferred: 0,
        };
        tracing::debug!(policy = ?config.policy, "entities database created");
        Self {
            view,
            receiver,
            carry_over: Vec::new(),
            observers: Vec::new(),
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Step-time view.
    #[inline]
    pub fn view(&mut self) -> &mut EntitiesView {
        &mut self.view
    }

    /// Registers a structural change observer.
    pub fn add_observer(&mut self, observer: impl ReactOnStructuralChange + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Attaches a debug label to a group.
    pub fn name_group(&mut self, group: GroupId, label: impl Into<String>) {
        self.view.registry.name_group(group, label);
    }

    /// Creates the storages of `descriptor` in `group` ahead of time and
    /// reserves room for `count` entities and references.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidConfig`] if `group` already stores another component set.
    pub fn preallocate(&mut self, group: GroupId, descriptor: &EntityDescriptor, count: usize) -> EcsResult<()> {
        self.view
            .registry
            .preallocate(group, descriptor, count)
            .map_err(|_| {
                EcsError::InvalidConfig(format!(
                    "group {group} stores a component set other than `{}`",
                    descriptor.name()
                ))
            })?;
        self.view.references.preallocate(count);
        Ok(())
    }

    /// Applies every queued structural command.
    ///
    /// Commands queued by observers during the flush are applied in further
    /// passes, up to `max_submission_iterations`. Anything still queued after
    /// that stays queued for the next call and is counted as deferred.
    ///
    /// # Errors
    ///
    /// With [`StructuralPolicy::Strict`], [`EcsError::Submission`] when any
    /// command was rejected or deferred. Valid commands are applied either way.
    pub fn submit_entities(&mut self) -> EcsResult<SubmissionReport> {
        let mut report = SubmissionReport::default();
        self.view.flushing = true;

        loop {
            let mut commands = std::mem::take(&mut self.carry_over);
            commands.extend(self.receiver.try_iter());
            if commands.is_empty() {
                break;
            }
            if report.iterations == self.config.max_submission_iterations {
                report.deferred = commands.len();
                self.carry_over = commands;
                break;
            }
            report.iterations += 1;
            Submitter::new(&mut self.view, &mut self.observers, &mut report).apply(commands);
        }

        self.view.flushing = false;
        self.view.deferred = self.carry_over.len();
        for observer in &mut self.observers {
            observer.on_submitted(&report);
        }
        tracing::debug!(
            built = report.built,
            removed = report.removed,
            swapped = report.swapped,
            iterations = report.iterations,
            rejected = report.errors.len(),
            "entities submitted"
        );
        self.finish(report)
    }

    fn finish(&self, report: SubmissionReport) -> EcsResult<SubmissionReport> {
        if report.is_clean() {
            return Ok(report);
        }
        match self.config.policy {
            StructuralPolicy::Strict => Err(EcsError::Submission(report)),
            StructuralPolicy::Lenient => {
                for error in &report.errors {
                    tracing::warn!(%error, "structural command ignored");
                }
                if report.deferred > 0 {
                    tracing::warn!(deferred = report.deferred, "submission iteration limit reached");
                }
                Ok(report)
            }
        }
    }
}

impl Default for EntitiesDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for EntitiesDb {
    type Target = EntitiesView;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl DerefMut for EntitiesDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StructuralError, StructuralErrorKind, StructuralOp};
    use bytemuck::{Pod, Zeroable};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Hp(u32);

    const G1: GroupId = GroupId::new(1);
    const G2: GroupId = GroupId::new(2);

    fn unit() -> EntityDescriptor {
        EntityDescriptor::builder("unit").with::<Hp>().build().unwrap()
    }

    fn strict() -> EntitiesDb {
        EntitiesDb::with_config(DatabaseConfig::default().with_policy(StructuralPolicy::Strict)).unwrap()
    }

    #[test]
    fn test_state_follows_queue() {
        let mut db = strict();
        assert_eq!(db.state(), SubmissionState::Idle);
        db.functions().remove_entities_from_group(G1).unwrap();
        assert_eq!(db.state(), SubmissionState::Buffering);
        let _ = db.submit_entities();
        assert_eq!(db.state(), SubmissionState::Idle);
    }

    #[test]
    fn test_second_change_to_same_entity_is_rejected() {
        let d = unit();
        let mut db = strict();
        let original = db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();
        db.submit_entities().unwrap();

        // Build queued before the remove: the remove must not jump ahead of it.
        let mut init = db.factory().build_entity(Egid::new(1, G1), &d);
        init.init(Hp(9)).unwrap();
        let rebuilt = init.submit().unwrap();
        db.functions().remove_entity(Egid::new(1, G1)).unwrap();

        let Err(EcsError::Submission(report)) = db.submit_entities() else {
            panic!("expected submission error");
        };
        assert_eq!((report.removed, report.built), (0, 0));
        assert!(report.errors.contains(&StructuralError {
            egid: Egid::new(1, G1),
            op: StructuralOp::Remove,
            kind: StructuralErrorKind::MultipleStructuralChanges,
        }));
        assert_eq!(db.try_query_entity::<Hp>(Egid::new(1, G1)), Some(&Hp(0)));
        assert_eq!(db.try_resolve(original), Some(Egid::new(1, G1)));
        assert_eq!(db.try_resolve(rebuilt), None);
    }

    #[test]
    fn test_build_after_remove_in_one_flush_is_rejected() {
        let d = unit();
        let mut db = strict();
        db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();
        db.submit_entities().unwrap();

        db.functions().remove_entity(Egid::new(1, G1)).unwrap();
        let rebuilt = db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();

        let Err(EcsError::Submission(report)) = db.submit_entities() else {
            panic!("expected submission error");
        };
        assert_eq!((report.removed, report.built), (1, 0));
        assert_eq!(report.errors[0].op, StructuralOp::Build);
        assert_eq!(report.errors[0].kind, StructuralErrorKind::MultipleStructuralChanges);
        assert!(!db.registry().exists(Egid::new(1, G1)));
        assert_eq!(db.try_resolve(rebuilt), None);
    }

    #[test]
    fn test_swap_of_pending_build_is_rejected() {
        let d = unit();
        let mut db = strict();
        db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();
        db.functions().swap_entity_to_group(Egid::new(1, G1), G2).unwrap();

        let Err(EcsError::Submission(report)) = db.submit_entities() else {
            panic!("expected submission error");
        };
        assert_eq!((report.built, report.swapped), (1, 0));
        assert_eq!(report.errors[0].op, StructuralOp::Swap);
        assert!(db.registry().exists(Egid::new(1, G1)));
        assert!(!db.registry().exists(Egid::new(1, G2)));
    }

    #[test]
    fn test_group_commands_on_absent_group_are_noops() {
        let mut db = strict();
        let functions = db.functions();
        functions.remove_entities_from_group(G1).unwrap();
        functions.swap_entities_in_group(G1, G2).unwrap();

        let report = db.submit_entities().unwrap();
        assert!(report.is_clean());
        assert_eq!((report.removed, report.swapped), (0, 0));
        assert!(!db.registry().contains_group(G2));
    }

    #[test]
    fn test_lenient_policy_reports_without_error() {
        let mut db = EntitiesDb::with_config(DatabaseConfig::default().with_policy(StructuralPolicy::Lenient)).unwrap();
        db.functions().remove_entity(Egid::new(3, G1)).unwrap();
        let report = db.submit_entities().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].op, StructuralOp::Remove);
        assert_eq!(report.errors[0].kind, StructuralErrorKind::NotFound);
    }

    #[test]
    fn test_failed_build_recycles_reference() {
        let d = unit();
        let mut db = strict();
        let first = db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();
        let second = db.factory().build_entity(Egid::new(1, G1), &d).submit().unwrap();

        let err = db.submit_entities().unwrap_err();
        let EcsError::Submission(report) = err else {
            panic!("expected submission error");
        };
        assert_eq!(report.built, 1);
        assert_eq!(report.errors[0].kind, StructuralErrorKind::MultipleStructuralChanges);
        assert_eq!(db.try_resolve(first), Some(Egid::new(1, G1)));
        assert_eq!(db.try_resolve(second), None);
    }

    #[test]
    fn test_cancelled_build_is_not_applied() {
        let d = unit();
        let mut db = strict();
        let init = db.factory().build_entity(Egid::new(1, G1), &d);
        let reference = init.reference();
        init.cancel();

        let report = db.submit_entities().unwrap();
        assert_eq!(report.built, 0);
        assert_eq!(db.try_resolve(reference), None);
        assert_eq!(db.factory().build_entity(Egid::new(2, G1), &d).reference().index(), reference.index());
    }

    struct Chain {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ReactOnStructuralChange for Chain {
        fn on_added(&mut self, egid: Egid, view: &EntitiesView) {
            self.log.lock().unwrap().push(format!("added {egid}"));
            if egid.group == G1 {
                view.functions().swap_entity_to_group(egid, G2).unwrap();
            }
        }

        fn on_swapped(&mut self, from: Egid, to: Egid, _view: &EntitiesView) {
            self.log.lock().unwrap().push(format!("swapped {from} {to}"));
        }
    }

    #[test]
    fn test_observer_commands_run_in_next_pass() {
        let d = unit();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = strict();
        db.add_observer(Chain { log: Arc::clone(&log) });

        db.factory().build_entity(Egid::new(4, G1), &d).submit().unwrap();
        let report = db.submit_entities().unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(db.registry().group_count(G2), 1);
        assert_eq!(*log.lock().unwrap(), vec!["added 4@g1", "swapped 4@g1 4@g2"]);
    }

    struct Echo;

    impl ReactOnStructuralChange for Echo {
        fn on_added(&mut self, egid: Egid, view: &EntitiesView) {
            let next = Egid::new(egid.entity_id + 1, egid.group);
            drop(view.factory().build_entity(next, &unit()));
        }
    }

    struct StateRecorder {
        seen: Arc<Mutex<Vec<SubmissionState>>>,
    }

    impl ReactOnStructuralChange for StateRecorder {
        fn on_added(&mut self, _egid: Egid, view: &EntitiesView) {
            self.seen.lock().unwrap().push(view.state());
        }
    }

    #[test]
    fn test_observers_see_flushing_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut db = strict();
        db.add_observer(StateRecorder { seen: Arc::clone(&seen) });

        db.factory().build_entity(Egid::new(0, G1), &unit()).submit().unwrap();
        assert_eq!(db.view().state(), SubmissionState::Buffering);
        db.submit_entities().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![SubmissionState::Flushing]);
        assert_eq!(db.state(), SubmissionState::Idle);
    }

    #[test]
    fn test_iteration_limit_defers_work() {
        let config = DatabaseConfig {
            max_submission_iterations: 3,
            ..DatabaseConfig::default()
        }
        .with_policy(StructuralPolicy::Lenient);
        let mut db = EntitiesDb::with_config(config).unwrap();
        db.add_observer(Echo);

        db.factory().build_entity(Egid::new(0, G1), &unit()).submit().unwrap();
        let report = db.submit_entities().unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.built, 3);
        assert_eq!(report.deferred, 1);
        assert!(db.has_pending_submission());
        assert_eq!(db.state(), SubmissionState::Buffering);
    }

    #[test]
    fn test_publish_entity_change() {
        let d = unit();
        let mut db = strict();
        let consumer = db.streams().generate_consumer::<Hp>("hp", 4).unwrap();
        db.factory().build_entity(Egid::new(0, G1), &d).submit().unwrap();
        db.submit_entities().unwrap();

        db.try_query_entity_mut::<Hp>(Egid::new(0, G1)).unwrap().0 = 40;
        assert_eq!(db.publish_entity_change::<Hp>(Egid::new(0, G1)), Ok(1));
        assert_eq!(consumer.try_dequeue(), Some((Hp(40), Egid::new(0, G1))));
        assert_eq!(
            db.publish_entity_change::<Hp>(Egid::new(5, G1)),
            Err(EcsError::EntityNotFound {
                egid: Egid::new(5, G1)
            })
        );
    }

    #[test]
    fn test_functions_outlive_database() {
        let functions = strict().functions();
        assert_eq!(functions.remove_entity(Egid::new(0, G1)), Err(EcsError::DatabaseDisposed));
    }
}
