//! # Component System
//!
//! Components are pure data containers with no behavior.
//! They must be Copy and have a fixed size so they can be stored in dense
//! arrays, moved between groups bitwise and serialized byte-exact.

use bytemuck::{Pod, Zeroable};

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Copy`: No heap allocations, bitwise copyable
/// - `Pod`: Plain old data, safe to view as bytes
/// - `Zeroable`: Can be safely zeroed
/// - `Default`: Used when an entity is built without an explicit initial value
///
/// Every such type is a component; no registration is needed.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: u32,
///     max: u32,
/// }
/// ```
pub trait Component: Copy + Pod + Zeroable + Default + Send + Sync + 'static {
    /// Human readable type name used in diagnostics.
    #[inline]
    #[must_use]
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T> Component for T where T: Copy + Pod + Zeroable + Default + Send + Sync + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Speed {
        value: f32,
    }

    fn name_of<C: Component>() -> &'static str {
        C::type_name()
    }

    #[test]
    fn test_component_blanket_impl() {
        assert!(name_of::<Speed>().ends_with("Speed"));
        assert_eq!(name_of::<u32>(), "u32");
    }
}
