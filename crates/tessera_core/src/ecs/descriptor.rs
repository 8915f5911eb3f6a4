//! # Entity Descriptors
//!
//! A descriptor is the static, ordered list of components an entity kind is
//! built from. The order is a contract: initial values, serialization and
//! group storage creation all walk components in descriptor order, and it is
//! never rearranged.
//!
//! Initial values travel as a packed byte row laid out like an archetype row:
//!
//! ```text
//! descriptor "ship" = [Position(16B), Velocity(16B), Hull(4B)]
//! row:                [   0..16     |   16..32     | 32..36  ]
//! ```
//!
//! Components are `Pod`, so writing and reading a row is a plain byte copy.

use std::any::TypeId;
use std::sync::Arc;

use super::component::Component;
use super::egid::{Egid, GroupId};
use super::group::GroupRegistry;
use super::storage::{ComponentStorage, ErasedStorage};
use super::submission::EntityInitializer;
use crate::error::{EcsError, EcsResult};
use crate::serialization::{ComponentSerializer, ErasedSerializer, PodSerializer, TypedSerializer};

/// Build instructions for one component of a descriptor.
#[derive(Clone)]
pub struct ComponentBuilder {
    type_id: TypeId,
    name: &'static str,
    size: usize,
    offset: usize,
    new_storage: fn(GroupId, usize) -> Box<dyn ErasedStorage>,
    insert: fn(&mut dyn ErasedStorage, u32, &[u8]) -> bool,
    write_default: fn(&mut [u8]),
    serializer: Arc<dyn ErasedSerializer>,
}

impl ComponentBuilder {
    fn of<C: Component, S: ComponentSerializer<C>>(serializer: S) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: C::type_name(),
            size: std::mem::size_of::<C>(),
            offset: 0,
            new_storage: new_storage_of::<C>,
            insert: insert_from_bytes::<C>,
            write_default: write_default_of::<C>,
            serializer: Arc::new(TypedSerializer::new(serializer)),
        }
    }

    /// Type name of the component.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Size of the component in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte offset of the component inside an initializer row.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }

    pub(crate) fn new_storage(&self, group: GroupId, capacity: usize) -> Box<dyn ErasedStorage> {
        (self.new_storage)(group, capacity)
    }

    /// Appends this component's slice of `row` to `storage`.
    pub(crate) fn insert(&self, storage: &mut dyn ErasedStorage, entity_id: u32, row: &[u8]) -> bool {
        (self.insert)(storage, entity_id, &row[self.range()])
    }
}

fn new_storage_of<C: Component>(group: GroupId, capacity: usize) -> Box<dyn ErasedStorage> {
    Box::new(ComponentStorage::<C>::with_capacity(group, capacity))
}

fn insert_from_bytes<C: Component>(storage: &mut dyn ErasedStorage, entity_id: u32, bytes: &[u8]) -> bool {
    let Some(storage) = storage.as_any_mut().downcast_mut::<ComponentStorage<C>>() else {
        return false;
    };
    let component: C = bytemuck::pod_read_unaligned(bytes);
    storage.add(entity_id, component).is_ok()
}

fn write_default_of<C: Component>(bytes: &mut [u8]) {
    bytes.copy_from_slice(bytemuck::bytes_of(&C::default()));
}

struct DescriptorInner {
    name: String,
    components: Vec<ComponentBuilder>,
    row_size: usize,
    default_row: Vec<u8>,
}

/// Ordered, immutable list of the components an entity kind is made of.
///
/// Cloning is cheap (shared).
///
/// # Example
///
/// ```rust,ignore
/// let ship = EntityDescriptor::builder("ship")
///     .with::<Position>()
///     .with::<Velocity>()
///     .build()?;
/// ```
#[derive(Clone)]
pub struct EntityDescriptor(Arc<DescriptorInner>);

impl EntityDescriptor {
    /// Starts a new descriptor.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            components: Vec::new(),
            error: None,
        }
    }

    /// Descriptor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.components.len()
    }

    /// Descriptors always declare at least one component.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.components.is_empty()
    }

    /// Components in declaration order.
    #[must_use]
    pub fn components(&self) -> &[ComponentBuilder] {
        &self.0.components
    }

    /// Component type names in declaration order.
    #[must_use]
    pub fn component_names(&self) -> Vec<&'static str> {
        self.0.components.iter().map(ComponentBuilder::name).collect()
    }

    /// Size of an initializer row in bytes.
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.0.row_size
    }

    /// Position of `C` in the descriptor.
    #[must_use]
    pub fn position<C: Component>(&self) -> Option<usize> {
        let type_id = TypeId::of::<C>();
        self.0.components.iter().position(|b| b.type_id == type_id)
    }

    /// Checks whether the descriptor declares `C`.
    #[must_use]
    pub fn contains<C: Component>(&self) -> bool {
        self.position::<C>().is_some()
    }

    pub(crate) fn type_ids(&self) -> impl ExactSizeIterator<Item = &TypeId> {
        self.0.components.iter().map(|b| &b.type_id)
    }

    /// Checks whether two descriptors declare the same components in the same order.
    #[must_use]
    pub fn same_layout(&self, other: &EntityDescriptor) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.type_ids().eq(other.type_ids())
    }

    /// A row holding every component's default value.
    pub(crate) fn default_row(&self) -> Vec<u8> {
        self.0.default_row.clone()
    }

    fn builder_of<C: Component>(&self) -> EcsResult<&ComponentBuilder> {
        let type_id = TypeId::of::<C>();
        self.0
            .components
            .iter()
            .find(|b| b.type_id == type_id)
            .ok_or(EcsError::ComponentNotInDescriptor {
                component: C::type_name(),
            })
    }

    /// Writes `value` into its slot of `row`.
    pub(crate) fn write_component<C: Component>(&self, row: &mut [u8], value: C) -> EcsResult<()> {
        let builder = self.builder_of::<C>()?;
        row[builder.range()].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Reads `C` back from `row`.
    pub(crate) fn read_component<C: Component>(&self, row: &[u8]) -> Option<C> {
        let builder = self.builder_of::<C>().ok()?;
        Some(bytemuck::pod_read_unaligned(&row[builder.range()]))
    }

    // ========================================================================
    // SERIALIZATION
    // ========================================================================

    /// Serializes the entity at `egid`, component by component in descriptor
    /// order, with each component's serializer.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] if the entity does not exist,
    /// [`EcsError::ComponentNotFound`] if its group lacks a declared component.
    pub fn serialize_entity(&self, registry: &GroupRegistry, egid: Egid, buffer: &mut Vec<u8>) -> EcsResult<()> {
        if !registry.exists(egid) {
            return Err(EcsError::EntityNotFound { egid });
        }
        for builder in &self.0.components {
            let written = registry
                .erased_storage(egid.group, builder.type_id)
                .is_some_and(|storage| builder.serializer.serialize_from(storage, egid.entity_id, buffer));
            if !written {
                return Err(EcsError::ComponentNotFound {
                    egid,
                    component: builder.name,
                });
            }
        }
        Ok(())
    }

    /// Decodes bytes produced by [`EntityDescriptor::serialize_entity`] into
    /// the initial values of `initializer`.
    ///
    /// # Returns
    ///
    /// Number of bytes consumed.
    ///
    /// # Errors
    ///
    /// [`EcsError::ComponentNotInDescriptor`] if the initializer was built from a
    /// descriptor with another layout, [`EcsError::Serialization`] on
    /// truncated or malformed input.
    pub fn deserialize_entity(&self, bytes: &[u8], initializer: &mut EntityInitializer) -> EcsResult<usize> {
        if !self.same_layout(initializer.descriptor()) {
            let component = self
                .0
                .components
                .iter()
                .find(|b| !initializer.descriptor().type_ids().any(|t| *t == b.type_id))
                .or_else(|| self.0.components.first())
                .map_or("<layout>", ComponentBuilder::name);
            return Err(EcsError::ComponentNotInDescriptor { component });
        }

        let row = initializer.row_mut();
        let mut consumed = 0;
        for builder in &self.0.components {
            let read = builder
                .serializer
                .deserialize_into(bytes.get(consumed..).unwrap_or_default(), &mut row[builder.range()])?;
            consumed += read;
        }
        Ok(consumed)
    }
}

impl std::fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.0.name)
            .field("components", &self.component_names())
            .finish()
    }
}

/// Builder for [`EntityDescriptor`].
pub struct DescriptorBuilder {
    name: String,
    components: Vec<ComponentBuilder>,
    error: Option<EcsError>,
}

impl DescriptorBuilder {
    /// Appends component `C`, serialized byte-exact.
    #[must_use]
    pub fn with<C: Component>(self) -> Self {
        self.with_serializer::<C, _>(PodSerializer)
    }

    /// Appends component `C` with a custom serializer.
    #[must_use]
    pub fn with_serializer<C: Component, S: ComponentSerializer<C>>(mut self, serializer: S) -> Self {
        self.push(ComponentBuilder::of::<C, S>(serializer));
        self
    }

    /// Appends every component of `other`, keeping its order.
    #[must_use]
    pub fn extend(mut self, other: &EntityDescriptor) -> Self {
        for builder in other.components() {
            self.push(builder.clone());
        }
        self
    }

    fn push(&mut self, builder: ComponentBuilder) {
        if self.components.iter().any(|b| b.type_id == builder.type_id) {
            self.error.get_or_insert(EcsError::DuplicateComponent {
                component: builder.name,
            });
            return;
        }
        self.components.push(builder);
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if a type was added twice,
    /// [`EcsError::EmptyDescriptor`] if no component was added.
    pub fn build(self) -> EcsResult<EntityDescriptor> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.components.is_empty() {
            return Err(EcsError::EmptyDescriptor);
        }

        let mut components = self.components;
        let mut offset = 0;
        for builder in &mut components {
            builder.offset = offset;
            offset += builder.size;
        }

        let mut default_row = vec![0u8; offset];
        for builder in &components {
            (builder.write_default)(&mut default_row[builder.range()]);
        }

        Ok(EntityDescriptor(Arc::new(DescriptorInner {
            name: self.name,
            components,
            row_size: offset,
            default_row,
        })))
    }
}
