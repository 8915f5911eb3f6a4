//! # Engines Root
//!
//! Owns the database and the top-level engine groups and drives ticks:
//!
//! ```text
//! tick():  submit_entities()  ──►  group 1.step(view)  ──►  group 2.step(view) ...
//! ```
//!
//! Lifecycle listeners are owned by the root, notified on registration and
//! on dispose, then dropped.

use super::engine::StepEngine;
use crate::ecs::{EntitiesDb, EntitiesView};
use crate::error::{EcsError, EcsResult, SubmissionReport};

/// Receives root lifecycle events.
pub trait EngineLifecycle: Send {
    /// The listener was added to a live root.
    fn on_context_initialized(&mut self, _view: &mut EntitiesView) {}

    /// The root is being disposed.
    fn on_context_disposed(&mut self) {}
}

/// Tick driver.
pub struct EnginesRoot {
    db: EntitiesDb,
    groups: Vec<Box<dyn StepEngine<EntitiesView>>>,
    listeners: Vec<Box<dyn EngineLifecycle>>,
    ticks: u64,
    disposed: bool,
}

impl EnginesRoot {
    /// Wraps `db`.
    #[must_use]
    pub fn new(db: EntitiesDb) -> Self {
        Self {
            db,
            groups: Vec::new(),
            listeners: Vec::new(),
            ticks: 0,
            disposed: false,
        }
    }

    /// Appends a top-level group (or single engine). Steps in registration order.
    pub fn add_group(&mut self, group: impl StepEngine<EntitiesView> + 'static) {
        self.groups.push(Box::new(group));
    }

    /// Registers a lifecycle listener and notifies it right away.
    pub fn add_listener(&mut self, listener: impl EngineLifecycle + 'static) {
        let mut listener = Box::new(listener);
        listener.on_context_initialized(self.db.view());
        self.listeners.push(listener);
    }

    /// Flushes queued structural changes, then steps every group.
    ///
    /// # Errors
    ///
    /// [`EcsError::DatabaseDisposed`] after [`EnginesRoot::dispose`]; a strict
    /// flush error from [`EntitiesDb::submit_entities`], in which case no
    /// group is stepped.
    pub fn tick(&mut self) -> EcsResult<SubmissionReport> {
        if self.disposed {
            return Err(EcsError::DatabaseDisposed);
        }
        let report = self.db.submit_entities()?;
        for group in &mut self.groups {
            group.step(self.db.view());
        }
        self.ticks += 1;
        Ok(report)
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Names of the top-level groups.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    /// The database.
    #[must_use]
    pub fn db(&self) -> &EntitiesDb {
        &self.db
    }

    /// The database, mutably.
    pub fn db_mut(&mut self) -> &mut EntitiesDb {
        &mut self.db
    }

    /// Checks whether the root was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Notifies and drops every listener, then drops every group.
    /// Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for mut listener in self.listeners.drain(..) {
            listener.on_context_disposed();
        }
        self.groups.clear();
        self.disposed = true;
        tracing::info!(ticks = self.ticks, "engines root disposed");
    }
}

impl Drop for EnginesRoot {
    fn drop(&mut self) {
        self.dispose();
    }
}
