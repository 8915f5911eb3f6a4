//! # Component Serialization
//!
//! Per-component byte codecs used by [`EntityDescriptor::serialize_entity`]
//! and [`EntityDescriptor::deserialize_entity`].
//!
//! Components are serialized one after another in descriptor order. Each
//! serializer reports how many bytes it consumed so the next one can start
//! where it stopped; there is no framing beyond that.
//!
//! [`EntityDescriptor::serialize_entity`]: crate::ecs::EntityDescriptor::serialize_entity
//! [`EntityDescriptor::deserialize_entity`]: crate::ecs::EntityDescriptor::deserialize_entity

use std::marker::PhantomData;

use crate::ecs::{Component, ComponentStorage, ErasedStorage};
use crate::error::{EcsError, EcsResult};

/// Encodes and decodes one component type.
pub trait ComponentSerializer<C: Component>: Send + Sync + 'static {
    /// Appends the encoding of `component` to `buffer`.
    fn serialize(&self, component: &C, buffer: &mut Vec<u8>);

    /// Decodes a component from the front of `bytes`.
    ///
    /// # Returns
    ///
    /// The component and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// [`EcsError::Serialization`] on truncated or malformed input.
    fn deserialize(&self, bytes: &[u8]) -> EcsResult<(C, usize)>;
}

/// Byte-exact codec: the component's in-memory representation.
#[derive(Clone, Copy, Debug, Default)]
pub struct PodSerializer;

impl<C: Component> ComponentSerializer<C> for PodSerializer {
    fn serialize(&self, component: &C, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(bytemuck::bytes_of(component));
    }

    fn deserialize(&self, bytes: &[u8]) -> EcsResult<(C, usize)> {
        let size = std::mem::size_of::<C>();
        let Some(head) = bytes.get(..size) else {
            return Err(EcsError::Serialization {
                component: C::type_name(),
                reason: format!("need {size} bytes, got {}", bytes.len()),
            });
        };
        Ok((bytemuck::pod_read_unaligned(head), size))
    }
}

/// Serializer with the component type erased, stored inside descriptors.
pub(crate) trait ErasedSerializer: Send + Sync {
    /// Serializes `entity_id` from `storage`. Returns `false` if the storage
    /// has another component type or lacks the entity.
    fn serialize_from(&self, storage: &dyn ErasedStorage, entity_id: u32, buffer: &mut Vec<u8>) -> bool;

    /// Decodes one component from `bytes` into its raw row slot.
    fn deserialize_into(&self, bytes: &[u8], slot: &mut [u8]) -> EcsResult<usize>;
}

pub(crate) struct TypedSerializer<C, S> {
    serializer: S,
    _component: PhantomData<fn() -> C>,
}

impl<C, S> TypedSerializer<C, S> {
    pub(crate) fn new(serializer: S) -> Self {
        Self {
            serializer,
            _component: PhantomData,
        }
    }
}

impl<C: Component, S: ComponentSerializer<C>> ErasedSerializer for TypedSerializer<C, S> {
    fn serialize_from(&self, storage: &dyn ErasedStorage, entity_id: u32, buffer: &mut Vec<u8>) -> bool {
        let component = storage
            .as_any()
            .downcast_ref::<ComponentStorage<C>>()
            .and_then(|s| s.get(entity_id));
        match component {
            Some(component) => {
                self.serializer.serialize(component, buffer);
                true
            }
            None => false,
        }
    }

    fn deserialize_into(&self, bytes: &[u8], slot: &mut [u8]) -> EcsResult<usize> {
        let (component, consumed) = self.serializer.deserialize(bytes)?;
        slot.copy_from_slice(bytemuck::bytes_of(&component));
        Ok(consumed)
    }
}
