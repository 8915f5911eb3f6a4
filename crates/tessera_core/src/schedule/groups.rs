//! # Engine Groups
//!
//! Containers that step their engines one after another. A group is itself a
//! [`StepEngine`], so groups nest.
//!
//! - [`UnsortedEnginesGroup`]: registration order, for independent engines.
//! - [`SortedEnginesGroup`]: an explicit [`EngineOrder`] of names, for engines
//!   with data dependencies. Names are resolved once at construction; any
//!   mismatch between the order and the registered engines is an error.
//!
//! Nothing here runs engines in parallel.

use std::collections::{HashMap, HashSet};

use super::engine::StepEngine;
use crate::ecs::EntitiesView;
use crate::error::{EcsError, EcsResult};

/// Engines stepped in registration order.
pub struct UnsortedEnginesGroup<C: ?Sized + 'static = EntitiesView> {
    name: String,
    engines: Vec<Box<dyn StepEngine<C>>>,
}

impl<C: ?Sized + 'static> UnsortedEnginesGroup<C> {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engines: Vec::new(),
        }
    }

    /// Appends an engine.
    pub fn add(&mut self, engine: impl StepEngine<C> + 'static) -> &mut Self {
        self.engines.push(Box::new(engine));
        self
    }

    /// Appends an engine, builder style.
    #[must_use]
    pub fn with(mut self, engine: impl StepEngine<C> + 'static) -> Self {
        self.add(engine);
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

    /// Engine names in step order.
    #[must_use]
    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
    }
}

impl<C: ?Sized + 'static> StepEngine<C> for UnsortedEnginesGroup<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, ctx: &mut C) {
        for engine in &mut self.engines {
            engine.step(ctx);
        }
    }
}

/// Declared total order of engine names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOrder {
    names: Vec<String>,
}

impl EngineOrder {
    /// Creates an order from names, first to last.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateEngine`] if a name appears twice.
    pub fn new<I, S>(names: I) -> EcsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        if let Some(duplicate) = names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(EcsError::DuplicateEngine(duplicate.clone()));
        }
        Ok(Self { names })
    }

    /// Names, first to last.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name` in the order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Engines stepped in a declared order.
pub struct SortedEnginesGroup<C: ?Sized + 'static = EntitiesView> {
    name: String,
    engines: Vec<Box<dyn StepEngine<C>>>,
}

impl<C: ?Sized + 'static> SortedEnginesGroup<C> {
    /// Starts a group that will be sorted by `order`.
    pub fn builder(name: impl Into<String>, order: EngineOrder) -> SortedEnginesGroupBuilder<C> {
        SortedEnginesGroupBuilder {
            name: name.into(),
            order,
            engines: Vec::new(),
        }
    }

    /// Engine names in step order.
    #[must_use]
    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
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
}

impl<C: ?Sized + 'static> StepEngine<C> for SortedEnginesGroup<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, ctx: &mut C) {
        for engine in &mut self.engines {
            engine.step(ctx);
        }
    }
}

/// Registration table for a [`SortedEnginesGroup`].
pub struct SortedEnginesGroupBuilder<C: ?Sized + 'static = EntitiesView> {
    name: String,
    order: EngineOrder,
    engines: Vec<Box<dyn StepEngine<C>>>,
}

impl<C: ?Sized + 'static> SortedEnginesGroupBuilder<C> {
    /// Registers an engine. Registration order does not matter.
    #[must_use]
    pub fn with(mut self, engine: impl StepEngine<C> + 'static) -> Self {
        self.engines.push(Box::new(engine));
        self
    }

    /// Resolves every engine against the order.
    ///
    /// # Errors
    ///
    /// - [`EcsError::DuplicateEngine`] if two engines share a name
    /// - [`EcsError::EngineNotInOrder`] if an engine is missing from the order
    /// - [`EcsError::UnknownEngineInOrder`] if the order names an engine that
    ///   was not registered
    pub fn build(self) -> EcsResult<SortedEnginesGroup<C>> {
        let mut slots: HashMap<usize, Box<dyn StepEngine<C>>> = HashMap::with_capacity(self.engines.len());
        for engine in self.engines {
            let name = engine.name().to_owned();
            let position = self
                .order
                .position(&name)
                .ok_or_else(|| EcsError::EngineNotInOrder(name.clone()))?;
            if slots.insert(position, engine).is_some() {
                return Err(EcsError::DuplicateEngine(name));
            }
        }

        let mut engines = Vec::with_capacity(slots.len());
        for (position, name) in self.order.names().iter().enumerate() {
            let engine = slots
                .remove(&position)
                .ok_or_else(|| EcsError::UnknownEngineInOrder(name.clone()))?;
            engines.push(engine);
        }

        tracing::debug!(group = %self.name, engines = engines.len(), "sorted engine group built");
        Ok(SortedEnginesGroup {
            name: self.name,
            engines,
        })
    }
}
