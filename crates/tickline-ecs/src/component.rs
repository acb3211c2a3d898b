//! Component type registration.
//!
//! Components are identified by name on the wire and in storage keys. The
//! [`ComponentRegistry`] assigns each name a compact [`ComponentTypeId`] used
//! for archetype matching, and rejects names nobody registered.

use std::collections::HashMap;
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component names to [`ComponentTypeId`]s.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    /// Name -> ComponentTypeId.
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    names: Vec<String>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component name.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponent`] if the name is taken.
    pub fn register(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateComponent {
                name: name.to_owned(),
            });
        }
        let id = ComponentTypeId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Resolve a name to its id.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnknownComponent`] listing the registered names.
    pub fn id(&self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.names.join(", "),
            })
    }

    /// The name registered for `id`.
    pub fn name(&self, id: ComponentTypeId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no components are registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
