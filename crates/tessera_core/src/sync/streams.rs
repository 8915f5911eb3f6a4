//! # Entity Streams
//!
//! Typed publish/consume channels for decoupled communication between engines.
//!
//! ```text
//! publish::<Hit>(hit, 3@g1)
//!        │
//!        ├──► consumer "audio"   [h0 h1 h2 _ ]   (all groups)
//!        ├──► consumer "ui"      [h1 h2 h3 h4]   full: oldest dropped
//!        └─╳  consumer "ai"      paused
//! ```
//!
//! Every consumer owns a bounded ring. A full ring drops its oldest entry;
//! overflow is not an error. The pause flag is a single atomic so any thread
//! can pause or resume a consumer.
//!
//! Consumers dispose themselves on drop. The stream prunes disposed
//! consumers lazily on the next publish.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::ecs::{Component, Egid, GroupId};
use crate::error::{EcsError, EcsResult};

struct Ring<C> {
    entries: VecDeque<(C, Egid)>,
    capacity: usize,
    dropped: u64,
}

impl<C> Ring<C> {
    fn push(&mut self, entry: (C, Egid)) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }
}

struct ConsumerShared<C> {
    name: String,
    group: Option<GroupId>,
    ring: Mutex<Ring<C>>,
    paused: AtomicBool,
    disposed: AtomicBool,
}

impl<C> ConsumerShared<C> {
    fn accepts(&self, egid: Egid) -> bool {
        !self.paused.load(Ordering::Acquire) && self.group.map_or(true, |g| g == egid.group)
    }
}

/// Receiving end of an entity stream.
///
/// Dropping the consumer disposes it.
pub struct Consumer<C: Component> {
    shared: Arc<ConsumerShared<C>>,
}

impl<C: Component> Consumer<C> {
    /// Pops the oldest pending entry.
    pub fn try_dequeue(&self) -> Option<(C, Egid)> {
        self.shared.ring.lock().entries.pop_front()
    }

    /// Stops receiving. Entries published while paused are lost.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Resumes receiving.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    /// Checks the pause flag.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shared.ring.lock().entries.len()
    }

    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.lock().capacity
    }

    /// Entries overwritten because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.ring.lock().dropped
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Group filter, if any.
    #[must_use]
    pub fn group(&self) -> Option<GroupId> {
        self.shared.group
    }

    /// Discards every pending entry.
    pub fn flush(&self) {
        self.shared.ring.lock().entries.clear();
    }

    /// Detaches the consumer from its stream.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<C: Component> Drop for Consumer<C> {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.ring.lock().entries.clear();
    }
}

impl<C: Component> std::fmt::Debug for Consumer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.shared.name)
            .field("component", &C::type_name())
            .field("group", &self.shared.group)
            .finish_non_exhaustive()
    }
}

struct EntityStream<C> {
    consumers: Mutex<Vec<Arc<ConsumerShared<C>>>>,
}

/// Per-component-type streams of one database.
#[derive(Default)]
pub struct EntityStreams {
    streams: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl EntityStreams {
    /// Creates an empty stream set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a consumer of `C` for every group.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidCapacity`] when `capacity` is 0.
    pub fn generate_consumer<C: Component>(&self, name: impl Into<String>, capacity: usize) -> EcsResult<Consumer<C>> {
        self.register(name.into(), capacity, None)
    }

    /// Creates a consumer of `C` that only receives entries of `group`.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidCapacity`] when `capacity` is 0.
    pub fn generate_consumer_for_group<C: Component>(
        &self,
        name: impl Into<String>,
        capacity: usize,
        group: GroupId,
    ) -> EcsResult<Consumer<C>> {
        self.register(name.into(), capacity, Some(group))
    }

    fn register<C: Component>(&self, name: String, capacity: usize, group: Option<GroupId>) -> EcsResult<Consumer<C>> {
        if capacity == 0 {
            return Err(EcsError::InvalidCapacity {
                what: "stream consumer",
                capacity,
            });
        }
        let shared = Arc::new(ConsumerShared {
            name,
            group,
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
            }),
            paused: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        let mut streams = self.streams.write();
        let stream = streams
            .entry(TypeId::of::<C>())
            .or_insert_with(|| {
                Box::new(EntityStream::<C> {
                    consumers: Mutex::new(Vec::new()),
                }) as Box<dyn Any + Send + Sync>
            })
            .downcast_ref::<EntityStream<C>>();
        if let Some(stream) = stream {
            stream.consumers.lock().push(Arc::clone(&shared));
        }
        tracing::debug!(consumer = %shared.name, component = C::type_name(), capacity, "stream consumer generated");
        Ok(Consumer { shared })
    }

    /// Broadcasts `value` to every live, unpaused consumer of `C` whose group
    /// filter matches `egid`.
    ///
    /// # Returns
    ///
    /// Number of consumers that received the entry.
    pub fn publish<C: Component>(&self, value: C, egid: Egid) -> usize {
        let streams = self.streams.read();
        let Some(stream) = streams
            .get(&TypeId::of::<C>())
            .and_then(|s| s.downcast_ref::<EntityStream<C>>())
        else {
            return 0;
        };

        let mut consumers = stream.consumers.lock();
        consumers.retain(|c| !c.disposed.load(Ordering::Acquire));
        let mut delivered = 0;
        for consumer in consumers.iter().filter(|c| c.accepts(egid)) {
            consumer.ring.lock().push((value, egid));
            delivered += 1;
        }
        delivered
    }

    /// Number of live consumers of `C`.
    #[must_use]
    pub fn consumer_count<C: Component>(&self) -> usize {
        self.streams
            .read()
            .get(&TypeId::of::<C>())
            .and_then(|s| s.downcast_ref::<EntityStream<C>>())
            .map_or(0, |s| {
                s.consumers
                    .lock()
                    .iter()
                    .filter(|c| !c.disposed.load(Ordering::Acquire))
                    .count()
            })
    }
}

impl std::fmt::Debug for EntityStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStreams")
            .field("component_types", &self.streams.read().len())
            .finish()
    }
}
