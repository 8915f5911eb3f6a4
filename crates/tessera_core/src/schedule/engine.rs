//! Step-able logic units.

use crate::ecs::EntitiesView;

/// A unit of logic stepped once per tick.
///
/// `C` is the context handed to every step; engines driven by
/// [`EnginesRoot`](super::EnginesRoot) use [`EntitiesView`].
pub trait StepEngine<C: ?Sized = EntitiesView>: Send {
    /// Name used for ordering and diagnostics. Unique within a group.
    fn name(&self) -> &str;

    /// Runs one step.
    fn step(&mut self, ctx: &mut C);
}

impl<C: ?Sized> StepEngine<C> for Box<dyn StepEngine<C>> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn step(&mut self, ctx: &mut C) {
        (**self).step(ctx);
    }
}

/// A [`StepEngine`] backed by a closure.
///
/// # Example
///
/// ```rust,ignore
/// let gravity = FnEngine::new("gravity", |view: &mut EntitiesView| {
///     let (velocities, _) = view.query_mut::<Velocity>(BODIES);
///     for v in velocities {
///         v.y -= 9.81 * DT;
///     }
/// });
/// ```
pub struct FnEngine<F> {
    name: String,
    f: F,
}

impl<F> FnEngine<F> {
    /// Wraps `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<C: ?Sized, F> StepEngine<C> for FnEngine<F>
where
    F: FnMut(&mut C) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, ctx: &mut C) {
        (self.f)(ctx);
    }
}

impl<F> std::fmt::Debug for FnEngine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnEngine").field("name", &self.name).finish_non_exhaustive()
    }
}
