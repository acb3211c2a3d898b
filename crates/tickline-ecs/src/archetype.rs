//! Archetype index.
//!
//! An archetype is the exact set of component types an entity carries. The
//! [`ArchetypeIndex`] assigns each distinct set a sequential [`ArchetypeId`].
//! Ids below the *persisted* watermark are known to storage; ids created
//! during the current tick are *pending* until the tick is finalized, at which
//! point the engine writes the new definitions in the same atomic batch as the
//! entity data that references them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype. Index into the archetype table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u64);

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ArchetypeIndex
// ---------------------------------------------------------------------------

/// Table of known archetypes plus the set created since the last persist.
#[derive(Debug, Default, Clone)]
pub struct ArchetypeIndex {
    /// Sorted component sets, indexed by `ArchetypeId.0`.
    archetypes: Vec<Vec<ComponentTypeId>>,
    /// Sorted component set -> id.
    lookup: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    /// Number of leading archetypes already in storage.
    persisted: usize,
}

impl ArchetypeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from definitions loaded from storage.
    ///
    /// Every loaded archetype counts as persisted.
    pub fn from_persisted(definitions: Vec<Vec<ComponentTypeId>>) -> Self {
        let mut index = Self::new();
        for components in definitions {
            let key = canonical(&components);
            let id = ArchetypeId(index.archetypes.len() as u64);
            index.lookup.insert(key.clone(), id);
            index.archetypes.push(key);
        }
        index.persisted = index.archetypes.len();
        index
    }

    /// Find the archetype for `components`, creating a pending one if needed.
    ///
    /// Order and duplicates in `components` do not matter.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EmptyArchetype`] for an empty set.
    pub fn get_or_insert(
        &mut self,
        components: &[ComponentTypeId],
    ) -> Result<ArchetypeId, EcsError> {
        let key = canonical(components);
        if key.is_empty() {
            return Err(EcsError::EmptyArchetype);
        }
        if let Some(&id) = self.lookup.get(&key) {
            return Ok(id);
        }
        let id = ArchetypeId(self.archetypes.len() as u64);
        self.lookup.insert(key.clone(), id);
        self.archetypes.push(key);
        Ok(id)
    }

    /// Sorted component set of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnknownArchetype`] if the id was never assigned.
    pub fn components(&self, id: ArchetypeId) -> Result<&[ComponentTypeId], EcsError> {
        self.archetypes
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .ok_or(EcsError::UnknownArchetype { archetype: id })
    }

    /// Every definition in id order.
    pub fn definitions(&self) -> &[Vec<ComponentTypeId>] {
        &self.archetypes
    }

    /// Ids created since the last [`mark_persisted`](Self::mark_persisted).
    pub fn pending_ids(&self) -> impl Iterator<Item = ArchetypeId> + '_ {
        (self.persisted..self.archetypes.len()).map(|i| ArchetypeId(i as u64))
    }

    /// Whether any archetype is waiting to be persisted.
    pub fn has_pending(&self) -> bool {
        self.archetypes.len() > self.persisted
    }

    /// Record that every current archetype is now in storage.
    pub fn mark_persisted(&mut self) {
        self.persisted = self.archetypes.len();
    }

    /// Forget archetypes created since the last persist.
    pub fn discard_pending(&mut self) {
        for dropped in self.archetypes.drain(self.persisted..) {
            self.lookup.remove(&dropped);
        }
    }

    /// Number of known archetypes, pending included.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }
}

fn canonical(components: &[ComponentTypeId]) -> Vec<ComponentTypeId> {
    let mut key = components.to_vec();
    key.sort_unstable();
    key.dedup();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<ComponentTypeId> {
        raw.iter().map(|&r| ComponentTypeId(r)).collect()
    }

    #[test]
    fn same_set_same_id_regardless_of_order() {
        let mut index = ArchetypeIndex::new();
        let a = index.get_or_insert(&ids(&[2, 0, 1])).unwrap();
        let b = index.get_or_insert(&ids(&[1, 2, 0, 0])).unwrap();
        assert_eq!(a, b);
        assert_eq!(index.len(), 1);
        assert_eq!(index.components(a).unwrap(), ids(&[0, 1, 2]).as_slice());
    }

    #[test]
    fn empty_set_rejected() {
        let mut index = ArchetypeIndex::new();
        assert!(matches!(index.get_or_insert(&[]), Err(EcsError::EmptyArchetype)));
    }

    #[test]
    fn pending_tracking() {
        let mut index = ArchetypeIndex::from_persisted(vec![ids(&[0])]);
        assert!(!index.has_pending());

        let new = index.get_or_insert(&ids(&[0, 1])).unwrap();
        assert_eq!(new, ArchetypeId(1));
        assert_eq!(index.pending_ids().collect::<Vec<_>>(), vec![ArchetypeId(1)]);

        index.mark_persisted();
        assert!(!index.has_pending());
        assert_eq!(index.pending_ids().count(), 0);
    }

    #[test]
    fn discard_pending_rolls_back_ids() {
        let mut index = ArchetypeIndex::from_persisted(vec![ids(&[0])]);
        index.get_or_insert(&ids(&[1])).unwrap();
        index.get_or_insert(&ids(&[2])).unwrap();
        index.discard_pending();

        assert_eq!(index.len(), 1);
        assert!(index.components(ArchetypeId(1)).is_err());
        // The freed id is reassigned to the next new set.
        assert_eq!(index.get_or_insert(&ids(&[2])).unwrap(), ArchetypeId(1));
        // Persisted archetypes survive.
        assert_eq!(index.get_or_insert(&ids(&[0])).unwrap(), ArchetypeId(0));
    }
}
