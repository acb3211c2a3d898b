//! Storage key layout and buffer configuration.

use tickline_ecs::entity::EntityId;

const DEFAULT_PREFIX: &str = "ECB";

/// Names of every key the command buffer owns.
///
/// The three tick keys (start counter, end counter, journal) are the durable
/// tick state; the rest hold the flushed entity/component data. No other
/// subsystem may write any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl Default for StorageKeys {
    /// Unprefixed `ECB:*` keys.
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }
}

impl StorageKeys {
    /// Keys scoped under `namespace`, so several worlds can share one backend.
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            prefix: format!("{namespace}:{DEFAULT_PREFIX}"),
        }
    }

    pub fn start_tick(&self) -> String {
        format!("{}:START-TICK", self.prefix)
    }

    pub fn end_tick(&self) -> String {
        format!("{}:END-TICK", self.prefix)
    }

    pub fn pending_transactions(&self) -> String {
        format!("{}:PENDING-TRANSACTIONS", self.prefix)
    }

    pub fn next_entity_id(&self) -> String {
        format!("{}:NEXT-ENTITY-ID", self.prefix)
    }

    pub fn archetype_table(&self) -> String {
        format!("{}:ARCHETYPE-ID-TO-COMPONENTS", self.prefix)
    }

    /// Key holding the archetype id of `entity`.
    pub fn entity_archetype(&self, entity: EntityId) -> String {
        format!("{}:ARCHETYPE-ID:ENTITY-ID-{}", self.prefix, entity.to_raw())
    }

    /// Key holding the value of `component` on `entity`.
    pub fn component_value(&self, component: &str, entity: EntityId) -> String {
        format!(
            "{}:COMPONENT-VALUE:TYPE-{}:ENTITY-ID-{}",
            self.prefix,
            component,
            entity.to_raw()
        )
    }
}

/// Configuration for an [`EntityCommandBuffer`](crate::buffer::EntityCommandBuffer).
#[derive(Debug, Clone, Default)]
pub struct BufferConfig {
    /// Key layout in the backend.
    pub keys: StorageKeys,
}
