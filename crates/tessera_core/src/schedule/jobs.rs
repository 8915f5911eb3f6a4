//! # Jobs
//!
//! Handle-chaining for engines that hand work to background threads.
//!
//! ```text
//! JobHandle::completed()
//!     │
//!     ├─► engine A: schedule(dep) ──► job a   (waits for dep)
//!     │                                  │
//!     └─► engine B: schedule(a) ─────► job b  (waits for a)
//!                                        │
//! group.step(): b.complete() ◄───────────┘
//! ```
//!
//! A job starts on its own thread and first waits for its dependency. If the
//! dependency failed, the job does not run and the failure propagates.

use std::thread::JoinHandle;

use super::engine::StepEngine;
use crate::ecs::EntitiesView;
use crate::error::{EcsError, EcsResult};

type JobResult = Result<(), String>;

enum Job {
    Running(JoinHandle<JobResult>),
    Failed(String),
}

/// Completion handle of zero or more background jobs.
#[must_use = "a job handle must be completed or passed on as a dependency"]
#[derive(Default)]
pub struct JobHandle {
    jobs: Vec<Job>,
}

impl JobHandle {
    /// A handle with nothing to wait for.
    pub fn completed() -> Self {
        Self::default()
    }

    /// Runs `job` on a new thread once `dependency` completed successfully.
    pub fn schedule<F>(dependency: JobHandle, job: F) -> Self
    where
        F: FnOnce() -> JobResult + Send + 'static,
    {
        let spawned = std::thread::Builder::new()
            .name("tessera-job".into())
            .spawn(move || {
                dependency.complete().map_err(|e| e.to_string())?;
                job()
            });
        let job = match spawned {
            Ok(handle) => Job::Running(handle),
            Err(e) => Job::Failed(format!("spawn failed: {e}")),
        };
        Self { jobs: vec![job] }
    }

    /// A handle that completes when every handle in `handles` has.
    pub fn combine(handles: impl IntoIterator<Item = JobHandle>) -> Self {
        Self {
            jobs: handles.into_iter().flat_map(|h| h.jobs).collect(),
        }
    }

    /// Chains `job` after this handle.
    pub fn then<F>(self, job: F) -> Self
    where
        F: FnOnce() -> JobResult + Send + 'static,
    {
        Self::schedule(self, job)
    }

    /// Checks whether every job has finished, without blocking.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.jobs.iter().all(|job| match job {
            Job::Running(handle) => handle.is_finished(),
            Job::Failed(_) => true,
        })
    }

    /// Blocks until every job has finished.
    ///
    /// # Errors
    ///
    /// [`EcsError::JobFailed`] with the first failure, in combine order. A
    /// panicking job counts as failed.
    pub fn complete(self) -> EcsResult<()> {
        let mut first_error = None;
        for job in self.jobs {
            let outcome = match job {
                Job::Running(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err("job panicked".to_owned())),
                Job::Failed(reason) => Err(reason),
            };
            if let Err(reason) = outcome {
                first_error.get_or_insert(reason);
            }
        }
        match first_error {
            Some(reason) => Err(EcsError::JobFailed(reason)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("jobs", &self.jobs.len())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// An engine that schedules background work instead of stepping inline.
pub trait JobEngine<C: ?Sized = EntitiesView>: Send {
    /// Engine name.
    fn name(&self) -> &str;

    /// Schedules this tick's work after `dependency` and returns its handle.
    ///
    /// Component data the job needs must be copied out of `ctx`; jobs do not
    /// borrow the database.
    fn schedule(&mut self, ctx: &mut C, dependency: JobHandle) -> JobHandle;
}

/// Job engines chained in registration order.
///
/// Stepping the group schedules every engine, each depending on the previous
/// one, then waits for the last handle.
pub struct JobifiedEnginesGroup<C: ?Sized + 'static = EntitiesView> {
    name: String,
    engines: Vec<Box<dyn JobEngine<C>>>,
}

impl<C: ?Sized + 'static> JobifiedEnginesGroup<C> {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engines: Vec::new(),
        }
    }

    /// Appends an engine, builder style.
    #[must_use]
    pub fn with(mut self, engine: impl JobEngine<C> + 'static) -> Self {
        self.engines.push(Box::new(engine));
        self
    }

    /// Number of engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Checks for an empty group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Schedules every engine and waits for all of them.
    ///
    /// # Errors
    ///
    /// [`EcsError::JobFailed`] if any job failed.
    pub fn run(&mut self, ctx: &mut C) -> EcsResult<()> {
        JobEngine::schedule(self, ctx, JobHandle::completed()).complete()
    }
}

impl<C: ?Sized + 'static> JobEngine<C> for JobifiedEnginesGroup<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&mut self, ctx: &mut C, dependency: JobHandle) -> JobHandle {
        let mut handle = dependency;
        for engine in &mut self.engines {
            handle = engine.schedule(ctx, handle);
        }
        handle
    }
}

impl<C: ?Sized + 'static> StepEngine<C> for JobifiedEnginesGroup<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, ctx: &mut C) {
        if let Err(error) = self.run(ctx) {
            tracing::error!(group = %self.name, %error, "job group failed");
        }
    }
}
