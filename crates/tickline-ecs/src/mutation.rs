//! Mutation buffer for the entity/component writes of one tick.
//!
//! The [`MutationBuffer`] collects every entity and component mutation the
//! simulation produces while a tick is in flight. Nothing here touches
//! storage: the engine turns the buffered mutations into backend commands
//! and commits them, together with the tick's end counter, as one atomic
//! batch. Only after that commit succeeds is the buffer cleared, so a failed
//! commit can be retried with the exact same write set.
//!
//! Mutations keep strict insertion order (FIFO). Because storage commands are
//! emitted in the same order, repeated writes to one (entity, component) pair
//! resolve last-write-wins.
//!
//! # Example
//!
//! ```
//! use tickline_ecs::prelude::*;
//!
//! let entity = EntityId::new(7);
//! let mut buf = MutationBuffer::new();
//! buf.set_component(entity, "health", serde_json::json!(50));
//! buf.set_component(entity, "health", serde_json::json!(40));
//!
//! assert_eq!(
//!     buf.latest_value(entity, "health"),
//!     ValueLookup::Value(&serde_json::json!(40)),
//! );
//!
//! let report = buf.clear_flushed();
//! assert_eq!(report.mutation_count, 2);
//! assert_eq!(report.conflict_count, 1);
//! assert!(buf.is_empty());
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::archetype::ArchetypeId;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// MutationKind
// ---------------------------------------------------------------------------

/// What a mutation does to its target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Create the entity with an initial archetype and component values.
    Create {
        /// The entity's archetype.
        archetype: ArchetypeId,
        /// Initial `(component name, value)` pairs.
        components: Vec<(String, serde_json::Value)>,
    },
    /// Overwrite a component the entity already has.
    SetComponent {
        /// Registered component name.
        component: String,
        /// New value.
        value: serde_json::Value,
    },
    /// Attach a new component, moving the entity to `archetype`.
    AddComponent {
        /// Registered component name.
        component: String,
        /// Initial value.
        value: serde_json::Value,
        /// The entity's archetype after the move.
        archetype: ArchetypeId,
    },
    /// Detach a component, moving the entity to `archetype`.
    RemoveComponent {
        /// Registered component name.
        component: String,
        /// The entity's archetype after the move.
        archetype: ArchetypeId,
    },
    /// Delete the entity and every component it carried.
    RemoveEntity {
        /// Names of the components the entity carried when removed.
        components: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// The entity this mutation targets.
    pub target: EntityId,
    /// What to do.
    pub kind: MutationKind,
    /// Sequential index within the buffer (set on insertion).
    pub mutation_index: u32,
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Result of reading a component through the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueLookup<'a> {
    /// The buffer holds no mutation for this pair; storage is authoritative.
    Untouched,
    /// The latest buffered write for this pair.
    Value(&'a serde_json::Value),
    /// The pair was removed (or the entity created without it) this tick.
    Absent,
}

/// Result of reading an entity's archetype through the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchetypeLookup {
    /// No buffered mutation changed the entity's archetype.
    Untouched,
    /// The entity's archetype as of the latest buffered mutation.
    Archetype(ArchetypeId),
    /// The entity was removed this tick.
    Removed,
}

// ---------------------------------------------------------------------------
// FlushReport
// ---------------------------------------------------------------------------

/// Summary of the last flushed buffer.
///
/// `conflict_count` is the number of (entity, component) pairs written by
/// more than one mutation in the tick. Last-write-wins applies, so conflicts
/// are warnings, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Number of mutations flushed.
    pub mutation_count: usize,
    /// Number of (entity, component) pairs targeted by multiple writes.
    pub conflict_count: usize,
}

// ---------------------------------------------------------------------------
// MutationBuffer
// ---------------------------------------------------------------------------

/// Collects the mutations of one tick in insertion order.
#[derive(Debug, Default)]
pub struct MutationBuffer {
    mutations: Vec<Mutation>,
    next_index: u32,
    last_flush_report: FlushReport,
}

impl MutationBuffer {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entity creation.
    pub fn create(
        &mut self,
        target: EntityId,
        archetype: ArchetypeId,
        components: Vec<(String, serde_json::Value)>,
    ) {
        self.push(target, MutationKind::Create {
            archetype,
            components,
        });
    }

    /// Queue a component overwrite.
    pub fn set_component(&mut self, target: EntityId, component: &str, value: serde_json::Value) {
        self.push(target, MutationKind::SetComponent {
            component: component.to_owned(),
            value,
        });
    }

    /// Queue a component attach.
    pub fn add_component(
        &mut self,
        target: EntityId,
        component: &str,
        value: serde_json::Value,
        archetype: ArchetypeId,
    ) {
        self.push(target, MutationKind::AddComponent {
            component: component.to_owned(),
            value,
            archetype,
        });
    }

    /// Queue a component detach.
    pub fn remove_component(&mut self, target: EntityId, component: &str, archetype: ArchetypeId) {
        self.push(target, MutationKind::RemoveComponent {
            component: component.to_owned(),
            archetype,
        });
    }

    /// Queue an entity removal.
    pub fn remove_entity(&mut self, target: EntityId, components: Vec<String>) {
        self.push(target, MutationKind::RemoveEntity { components });
    }

    /// All queued mutations in insertion order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Number of queued mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Report from the last [`clear_flushed`](Self::clear_flushed) call.
    pub fn last_flush_report(&self) -> &FlushReport {
        &self.last_flush_report
    }

    /// The latest buffered state of `(target, component)`.
    ///
    /// Scans newest to oldest; the first mutation that decides the pair wins.
    pub fn latest_value(&self, target: EntityId, component: &str) -> ValueLookup<'_> {
        for m in self.mutations.iter().rev().filter(|m| m.target == target) {
            match &m.kind {
                MutationKind::SetComponent { component: c, value }
                | MutationKind::AddComponent {
                    component: c,
                    value,
                    ..
                } if c == component => return ValueLookup::Value(value),
                MutationKind::RemoveComponent { component: c, .. } if c == component => {
                    return ValueLookup::Absent
                }
                MutationKind::RemoveEntity { .. } => return ValueLookup::Absent,
                MutationKind::Create { components, .. } => {
                    return components
                        .iter()
                        .rev()
                        .find(|(name, _)| name == component)
                        .map_or(ValueLookup::Absent, |(_, v)| ValueLookup::Value(v));
                }
                _ => {}
            }
        }
        ValueLookup::Untouched
    }

    /// The latest buffered archetype of `target`.
    pub fn latest_archetype(&self, target: EntityId) -> ArchetypeLookup {
        for m in self.mutations.iter().rev().filter(|m| m.target == target) {
            match &m.kind {
                MutationKind::Create { archetype, .. }
                | MutationKind::AddComponent { archetype, .. }
                | MutationKind::RemoveComponent { archetype, .. } => {
                    return ArchetypeLookup::Archetype(*archetype)
                }
                MutationKind::RemoveEntity { .. } => return ArchetypeLookup::Removed,
                MutationKind::SetComponent { .. } => {}
            }
        }
        ArchetypeLookup::Untouched
    }

    /// Clear the buffer after its contents were committed.
    ///
    /// Runs conflict detection over the flushed mutations, logs each conflict
    /// as a warning, and stores the resulting [`FlushReport`].
    pub fn clear_flushed(&mut self) -> FlushReport {
        let mut seen: HashMap<(EntityId, &str), Vec<u32>> = HashMap::new();
        for m in &self.mutations {
            match &m.kind {
                MutationKind::SetComponent { component, .. }
                | MutationKind::AddComponent { component, .. }
                | MutationKind::RemoveComponent { component, .. } => {
                    seen.entry((m.target, component.as_str()))
                        .or_default()
                        .push(m.mutation_index);
                }
                MutationKind::Create { components, .. } => {
                    for (component, _) in components {
                        seen.entry((m.target, component.as_str()))
                            .or_default()
                            .push(m.mutation_index);
                    }
                }
                MutationKind::RemoveEntity { .. } => {}
            }
        }

        let mut conflict_count = 0;
        for ((entity, component), indices) in &seen {
            if indices.len() > 1 {
                conflict_count += 1;
                warn!(
                    entity = ?entity,
                    component = %component,
                    mutation_indices = ?indices,
                    "conflict: {} mutations target the same entity+component in this tick (last-write-wins)",
                    indices.len()
                );
            }
        }

        let report = FlushReport {
            mutation_count: self.mutations.len(),
            conflict_count,
        };
        self.clear();
        self.last_flush_report = report.clone();
        report
    }

    /// Drop every queued mutation without flushing.
    pub fn clear(&mut self) {
        self.mutations.clear();
        self.next_index = 0;
    }

    // -- internal helpers ---------------------------------------------------

    fn push(&mut self, target: EntityId, kind: MutationKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.mutations.push(Mutation {
            target,
            kind,
            mutation_index: index,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn e(raw: u64) -> EntityId {
        EntityId::new(raw)
    }

    // -- 1. Basic mutation creation -----------------------------------------

    #[test]
    fn basic_mutation_creation() {
        let mut buf = MutationBuffer::new();
        buf.create(e(1), ArchetypeId(0), vec![("health".to_owned(), json!(100))]);
        buf.set_component(e(1), "health", json!(90));
        buf.add_component(e(1), "position", json!({"x": 0}), ArchetypeId(1));
        buf.remove_component(e(1), "position", ArchetypeId(0));
        buf.remove_entity(e(1), vec!["health".to_owned()]);

        assert_eq!(buf.len(), 5);
        let m = buf.mutations();
        for (i, mutation) in m.iter().enumerate() {
            assert_eq!(mutation.mutation_index, i as u32);
        }
        assert!(matches!(m[0].kind, MutationKind::Create { .. }));
        assert!(matches!(m[1].kind, MutationKind::SetComponent { .. }));
        assert!(matches!(m[2].kind, MutationKind::AddComponent { .. }));
        assert!(matches!(m[3].kind, MutationKind::RemoveComponent { .. }));
        assert!(matches!(m[4].kind, MutationKind::RemoveEntity { .. }));
    }

    // -- 2. Read-through lookups --------------------------------------------

    #[test]
    fn untouched_pair_defers_to_storage() {
        let mut buf = MutationBuffer::new();
        buf.set_component(e(1), "health", json!(1));
        assert_eq!(buf.latest_value(e(2), "health"), ValueLookup::Untouched);
        assert_eq!(buf.latest_value(e(1), "mana"), ValueLookup::Untouched);
        assert_eq!(buf.latest_archetype(e(1)), ArchetypeLookup::Untouched);
    }

    #[test]
    fn latest_write_wins() {
        let mut buf = MutationBuffer::new();
        buf.set_component(e(1), "health", json!(10));
        buf.set_component(e(1), "health", json!(20));
        assert_eq!(buf.latest_value(e(1), "health"), ValueLookup::Value(&json!(20)));
    }

    #[test]
    fn create_answers_for_its_components_only() {
        let mut buf = MutationBuffer::new();
        buf.create(e(3), ArchetypeId(4), vec![("health".to_owned(), json!(5))]);

        assert_eq!(buf.latest_value(e(3), "health"), ValueLookup::Value(&json!(5)));
        assert_eq!(buf.latest_value(e(3), "position"), ValueLookup::Absent);
        assert_eq!(buf.latest_archetype(e(3)), ArchetypeLookup::Archetype(ArchetypeId(4)));
    }

    #[test]
    fn removal_hides_earlier_writes() {
        let mut buf = MutationBuffer::new();
        buf.set_component(e(1), "health", json!(10));
        buf.remove_component(e(1), "health", ArchetypeId(2));
        assert_eq!(buf.latest_value(e(1), "health"), ValueLookup::Absent);
        assert_eq!(buf.latest_archetype(e(1)), ArchetypeLookup::Archetype(ArchetypeId(2)));

        buf.remove_entity(e(1), vec![]);
        assert_eq!(buf.latest_archetype(e(1)), ArchetypeLookup::Removed);
    }

    // -- 3. Flush bookkeeping -----------------------------------------------

    #[test]
    fn clear_flushed_reports_and_empties() {
        let mut buf = MutationBuffer::new();
        buf.create(e(1), ArchetypeId(0), vec![("health".to_owned(), json!(100))]);
        buf.set_component(e(1), "health", json!(90));
        buf.set_component(e(2), "health", json!(90));

        let report = buf.clear_flushed();
        assert_eq!(report.mutation_count, 3);
        assert_eq!(report.conflict_count, 1);
        assert!(buf.is_empty());
        assert_eq!(buf.last_flush_report(), &report);

        // Indices restart after a flush.
        buf.set_component(e(1), "health", json!(1));
        assert_eq!(buf.mutations()[0].mutation_index, 0);
    }

    #[test]
    fn plain_clear_keeps_last_report() {
        let mut buf = MutationBuffer::new();
        buf.set_component(e(1), "health", json!(1));
        buf.clear_flushed();
        buf.set_component(e(1), "health", json!(2));
        buf.clear();

        assert!(buf.is_empty());
        assert_eq!(buf.last_flush_report().mutation_count, 1);
    }

    #[test]
    fn empty_flush_is_noop() {
        let mut buf = MutationBuffer::new();
        let report = buf.clear_flushed();
        assert_eq!(report, FlushReport::default());
    }
}
