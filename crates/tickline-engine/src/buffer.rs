//! The entity command buffer.
//!
//! [`EntityCommandBuffer`] sits between the simulation and the backend.
//! Systems record entity/component mutations through it while a tick is in
//! flight; reads see those buffered mutations layered over the last
//! committed state. Nothing reaches storage until
//! [`finalize_tick`](EntityCommandBuffer::finalize_tick) flushes the whole
//! mutation set together with the end-counter increment.
//!
//! Storage layout (see [`StorageKeys`]):
//!
//! - `ARCHETYPE-ID-TO-COMPONENTS`: JSON list of component-name lists, one per
//!   archetype id.
//! - `ARCHETYPE-ID:ENTITY-ID-{id}`: the entity's archetype id.
//! - `COMPONENT-VALUE:TYPE-{name}:ENTITY-ID-{id}`: JSON component value.
//! - `NEXT-ENTITY-ID`: the next id to allocate.

use serde::de::DeserializeOwned;
use tickline_ecs::archetype::{ArchetypeId, ArchetypeIndex};
use tickline_ecs::component::{ComponentRegistry, ComponentTypeId};
use tickline_ecs::entity::EntityId;
use tickline_ecs::mutation::{
    ArchetypeLookup, FlushReport, MutationBuffer, MutationKind, ValueLookup,
};
use tickline_ecs::EcsError;
use tickline_storage::{KvBackend, WriteBatch};
use tracing::debug;

use crate::keys::{BufferConfig, StorageKeys};
use crate::tick::TickCounters;
use crate::TickError;

/// Tick-scoped command buffer over a transactional backend.
pub struct EntityCommandBuffer<S> {
    pub(crate) storage: S,
    pub(crate) keys: StorageKeys,
    components: ComponentRegistry,
    archetypes: ArchetypeIndex,
    archetypes_loaded: bool,
    mutations: MutationBuffer,
    /// Next entity id to allocate; `None` until read from storage.
    next_entity_id: Option<u64>,
    next_entity_id_dirty: bool,
    /// In-process view of the durable tick counters; `None` until read.
    pub(crate) counters: Option<TickCounters>,
}

impl<S: KvBackend> EntityCommandBuffer<S> {
    /// Wrap `storage`. Nothing is read until first use.
    pub fn new(storage: S, config: BufferConfig) -> Self {
        Self {
            storage,
            keys: config.keys,
            components: ComponentRegistry::new(),
            archetypes: ArchetypeIndex::new(),
            archetypes_loaded: false,
            mutations: MutationBuffer::new(),
            next_entity_id: None,
            next_entity_id_dirty: false,
            counters: None,
        }
    }

    /// Register a component name. Must happen before any entity uses it.
    pub fn register_component(&mut self, name: &str) -> Result<ComponentTypeId, TickError> {
        Ok(self.components.register(name)?)
    }

    /// The component registry.
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Mutations buffered for the current tick.
    pub fn mutations(&self) -> &MutationBuffer {
        &self.mutations
    }

    /// The key layout.
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// The backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the backend (failure injection in tests).
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Give the backend back, dropping every buffered mutation.
    pub fn into_storage(self) -> S {
        self.storage
    }

    // -- recording ------------------------------------------------------------

    /// Create an entity carrying `components` and return its id.
    ///
    /// # Errors
    ///
    /// [`EcsError::EmptyArchetype`] for an empty list,
    /// [`EcsError::UnknownComponent`] for an unregistered name.
    pub fn create_entity(
        &mut self,
        components: Vec<(&str, serde_json::Value)>,
    ) -> Result<EntityId, TickError> {
        let type_ids = components
            .iter()
            .map(|(name, _)| self.components.id(name))
            .collect::<Result<Vec<_>, _>>()?;
        self.ensure_archetypes()?;
        let archetype = self.archetypes.get_or_insert(&type_ids)?;
        let entity = self.allocate_entity_id()?;
        let values = components
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect();
        self.mutations.create(entity, archetype, values);
        debug!(entity = %entity, archetype = %archetype, "created entity");
        Ok(entity)
    }

    /// Overwrite a component the entity already carries.
    pub fn set_component(
        &mut self,
        entity: EntityId,
        component: &str,
        value: serde_json::Value,
    ) -> Result<(), TickError> {
        let type_id = self.components.id(component)?;
        let current = self.component_ids_of(entity)?;
        if !current.contains(&type_id) {
            return Err(EcsError::ComponentNotOnEntity {
                entity,
                component: component.to_owned(),
            }
            .into());
        }
        self.mutations.set_component(entity, component, value);
        Ok(())
    }

    /// Attach a new component, moving the entity to a wider archetype.
    pub fn add_component(
        &mut self,
        entity: EntityId,
        component: &str,
        value: serde_json::Value,
    ) -> Result<(), TickError> {
        let type_id = self.components.id(component)?;
        let mut ids = self.component_ids_of(entity)?;
        if ids.contains(&type_id) {
            return Err(EcsError::ComponentAlreadyOnEntity {
                entity,
                component: component.to_owned(),
            }
            .into());
        }
        ids.push(type_id);
        let archetype = self.archetypes.get_or_insert(&ids)?;
        self.mutations.add_component(entity, component, value, archetype);
        Ok(())
    }

    /// Detach a component, moving the entity to a narrower archetype.
    ///
    /// Removing an entity's last component is rejected with
    /// [`EcsError::EmptyArchetype`]; use [`remove_entity`](Self::remove_entity).
    pub fn remove_component(&mut self, entity: EntityId, component: &str) -> Result<(), TickError> {
        let type_id = self.components.id(component)?;
        let mut ids = self.component_ids_of(entity)?;
        if !ids.contains(&type_id) {
            return Err(EcsError::ComponentNotOnEntity {
                entity,
                component: component.to_owned(),
            }
            .into());
        }
        ids.retain(|id| *id != type_id);
        let archetype = self.archetypes.get_or_insert(&ids)?;
        self.mutations.remove_component(entity, component, archetype);
        Ok(())
    }

    /// Delete an entity and all of its components.
    pub fn remove_entity(&mut self, entity: EntityId) -> Result<(), TickError> {
        let names = self.components_of(entity)?;
        self.mutations.remove_entity(entity, names);
        debug!(entity = %entity, "removed entity");
        Ok(())
    }

    // -- reads ----------------------------------------------------------------

    /// The entity's archetype, buffered mutations included.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] if the entity was never created or has been
    /// removed.
    pub fn archetype_of(&mut self, entity: EntityId) -> Result<ArchetypeId, TickError> {
        match self.mutations.latest_archetype(entity) {
            ArchetypeLookup::Archetype(id) => Ok(id),
            ArchetypeLookup::Removed => Err(EcsError::NoSuchEntity { entity }.into()),
            ArchetypeLookup::Untouched => self
                .storage
                .get_u64(&self.keys.entity_archetype(entity))
                .map_err(TickError::storage("failed to get entity archetype"))?
                .map(ArchetypeId)
                .ok_or_else(|| TickError::from(EcsError::NoSuchEntity { entity })),
        }
    }

    /// Names of the components the entity carries.
    pub fn components_of(&mut self, entity: EntityId) -> Result<Vec<String>, TickError> {
        let ids = self.component_ids_of(entity)?;
        Ok(self.names_of(&ids))
    }

    /// The current value of `component` on `entity`.
    pub fn get_component(
        &mut self,
        entity: EntityId,
        component: &str,
    ) -> Result<serde_json::Value, TickError> {
        let type_id = self.components.id(component)?;
        let not_on_entity = || -> TickError {
            EcsError::ComponentNotOnEntity {
                entity,
                component: component.to_owned(),
            }
            .into()
        };
        if !self.component_ids_of(entity)?.contains(&type_id) {
            return Err(not_on_entity());
        }
        match self.mutations.latest_value(entity, component) {
            ValueLookup::Value(value) => Ok(value.clone()),
            ValueLookup::Absent => Err(not_on_entity()),
            ValueLookup::Untouched => {
                let bytes = self
                    .storage
                    .get_bytes(&self.keys.component_value(component, entity))
                    .map_err(TickError::storage("failed to get component value"))?
                    .ok_or_else(not_on_entity)?;
                serde_json::from_slice(&bytes).map_err(|source| TickError::ComponentValue {
                    component: component.to_owned(),
                    source,
                })
            }
        }
    }

    /// [`get_component`](Self::get_component) deserialized into `T`.
    pub fn get_component_as<T: DeserializeOwned>(
        &mut self,
        entity: EntityId,
        component: &str,
    ) -> Result<T, TickError> {
        let value = self.get_component(entity, component)?;
        serde_json::from_value(value).map_err(|source| TickError::ComponentValue {
            component: component.to_owned(),
            source,
        })
    }

    // -- housekeeping ---------------------------------------------------------

    /// Drop every buffered mutation, pending archetype and allocated entity id.
    ///
    /// Afterwards the buffer reflects exactly the last committed state.
    pub fn discard_pending(&mut self) {
        let dropped = self.mutations.len();
        self.mutations.clear();
        self.archetypes.discard_pending();
        self.next_entity_id = None;
        self.next_entity_id_dirty = false;
        if dropped > 0 {
            debug!(mutations = dropped, "discarded pending mutations");
        }
    }

    /// Queue the buffered mutation set as backend commands on `batch`.
    pub(crate) fn stage_mutations(&self, batch: &mut WriteBatch) -> Result<(), TickError> {
        for mutation in self.mutations.mutations() {
            let entity = mutation.target;
            match &mutation.kind {
                MutationKind::Create {
                    archetype,
                    components,
                } => {
                    self.stage_archetype(batch, entity, *archetype);
                    for (name, value) in components {
                        self.stage_value(batch, entity, name, value)?;
                    }
                }
                MutationKind::SetComponent { component, value } => {
                    self.stage_value(batch, entity, component, value)?;
                }
                MutationKind::AddComponent {
                    component,
                    value,
                    archetype,
                } => {
                    self.stage_value(batch, entity, component, value)?;
                    self.stage_archetype(batch, entity, *archetype);
                }
                MutationKind::RemoveComponent {
                    component,
                    archetype,
                } => {
                    batch.delete(self.keys.component_value(component, entity));
                    self.stage_archetype(batch, entity, *archetype);
                }
                MutationKind::RemoveEntity { components } => {
                    batch.delete(self.keys.entity_archetype(entity));
                    for name in components {
                        batch.delete(self.keys.component_value(name, entity));
                    }
                }
            }
        }

        if self.archetypes.has_pending() {
            let table: Vec<Vec<String>> = self
                .archetypes
                .definitions()
                .iter()
                .map(|ids| self.names_of(ids))
                .collect();
            let bytes = serde_json::to_vec(&table).map_err(TickError::ArchetypeTable)?;
            batch.set(self.keys.archetype_table(), bytes);
        }
        if self.next_entity_id_dirty {
            if let Some(next) = self.next_entity_id {
                batch.set(self.keys.next_entity_id(), next.to_string().into_bytes());
            }
        }
        Ok(())
    }

    /// Clear the mutation set after its batch committed.
    pub(crate) fn mark_flushed(&mut self) -> FlushReport {
        self.archetypes.mark_persisted();
        self.next_entity_id_dirty = false;
        self.mutations.clear_flushed()
    }

    // -- internal helpers -----------------------------------------------------

    fn ensure_archetypes(&mut self) -> Result<(), TickError> {
        if self.archetypes_loaded {
            return Ok(());
        }
        let raw = self
            .storage
            .get_bytes(&self.keys.archetype_table())
            .map_err(TickError::storage("failed to get archetype table"))?;
        let table: Vec<Vec<String>> = match raw {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(TickError::ArchetypeTable)?,
            None => Vec::new(),
        };
        let mut definitions = Vec::with_capacity(table.len());
        for names in &table {
            let ids = names
                .iter()
                .map(|name| self.components.id(name))
                .collect::<Result<Vec<_>, _>>()?;
            definitions.push(ids);
        }
        debug!(archetypes = definitions.len(), "loaded archetype table");
        self.archetypes = ArchetypeIndex::from_persisted(definitions);
        self.archetypes_loaded = true;
        Ok(())
    }

    fn allocate_entity_id(&mut self) -> Result<EntityId, TickError> {
        let next = match self.next_entity_id {
            Some(next) => next,
            None => self
                .storage
                .get_u64(&self.keys.next_entity_id())
                .map_err(TickError::storage("failed to get next entity id"))?
                .unwrap_or(0),
        };
        self.next_entity_id = Some(next + 1);
        self.next_entity_id_dirty = true;
        Ok(EntityId::new(next))
    }

    fn component_ids_of(&mut self, entity: EntityId) -> Result<Vec<ComponentTypeId>, TickError> {
        let archetype = self.archetype_of(entity)?;
        self.ensure_archetypes()?;
        Ok(self.archetypes.components(archetype)?.to_vec())
    }

    fn names_of(&self, ids: &[ComponentTypeId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.components.name(*id))
            .map(str::to_owned)
            .collect()
    }

    fn stage_archetype(&self, batch: &mut WriteBatch, entity: EntityId, archetype: ArchetypeId) {
        batch.set(
            self.keys.entity_archetype(entity),
            archetype.0.to_string().into_bytes(),
        );
    }

    fn stage_value(
        &self,
        batch: &mut WriteBatch,
        entity: EntityId,
        component: &str,
        value: &serde_json::Value,
    ) -> Result<(), TickError> {
        let bytes = serde_json::to_vec(value).map_err(|source| TickError::ComponentValue {
            component: component.to_owned(),
            source,
        })?;
        batch.set(self.keys.component_value(component, entity), bytes);
        Ok(())
    }
}
