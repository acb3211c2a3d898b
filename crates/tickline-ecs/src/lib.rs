//! Tickline ECS -- entity ids, component and archetype bookkeeping, and the
//! per-tick mutation buffer.
//!
//! This crate holds the pure, storage-agnostic half of the entity layer.
//! Component types are registered by name in a [`ComponentRegistry`], each
//! distinct component set maps to an [`ArchetypeId`] through the
//! [`ArchetypeIndex`], and every write made during a tick is queued in a
//! [`MutationBuffer`] until the engine commits it.
//!
//! # Quick Start
//!
//! ```
//! use tickline_ecs::prelude::*;
//!
//! let mut components = ComponentRegistry::new();
//! let health = components.register("health").unwrap();
//! let position = components.register("position").unwrap();
//!
//! let mut archetypes = ArchetypeIndex::new();
//! let a = archetypes.get_or_insert(&[position, health]).unwrap();
//! let b = archetypes.get_or_insert(&[health, position]).unwrap();
//! assert_eq!(a, b);
//!
//! let mut buf = MutationBuffer::new();
//! buf.create(EntityId::new(0), a, vec![("health".to_owned(), serde_json::json!(100))]);
//! assert_eq!(buf.len(), 1);
//! ```
//!
//! [`ComponentRegistry`]: component::ComponentRegistry
//! [`ArchetypeId`]: archetype::ArchetypeId
//! [`ArchetypeIndex`]: archetype::ArchetypeIndex
//! [`MutationBuffer`]: mutation::MutationBuffer

#![deny(unsafe_code)]

pub mod archetype;
pub mod component;
pub mod entity;
pub mod mutation;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// A component name was registered twice.
    #[error("component type '{name}' is already registered")]
    DuplicateComponent { name: String },

    /// The entity does not exist (never created, or removed).
    #[error("entity {entity:?} does not exist")]
    NoSuchEntity { entity: entity::EntityId },

    /// The entity's archetype does not include the component.
    #[error("entity {entity:?} has no component '{component}'")]
    ComponentNotOnEntity {
        entity: entity::EntityId,
        component: String,
    },

    /// The entity's archetype already includes the component.
    #[error("entity {entity:?} already has component '{component}'")]
    ComponentAlreadyOnEntity {
        entity: entity::EntityId,
        component: String,
    },

    /// An entity must carry at least one component.
    #[error("an archetype needs at least one component")]
    EmptyArchetype,

    /// An archetype id that was never assigned.
    #[error("archetype {archetype:?} does not exist")]
    UnknownArchetype { archetype: archetype::ArchetypeId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{ArchetypeId, ArchetypeIndex};
    pub use crate::component::{ComponentRegistry, ComponentTypeId};
    pub use crate::entity::EntityId;
    pub use crate::mutation::{
        ArchetypeLookup, FlushReport, Mutation, MutationBuffer, MutationKind, ValueLookup,
    };
    pub use crate::EcsError;
}
