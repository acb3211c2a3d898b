//! Tickline Engine -- tick-synchronized, crash-recoverable command buffer.
//!
//! Each simulation step ("tick") applies a batch of transactions and commits
//! the resulting entity/component mutations to a transactional key-value
//! backend as one atomic unit. Two durable counters track progress:
//!
//! - `start` is bumped together with the pending-transaction journal when a
//!   tick begins ([`EntityCommandBuffer::start_next_tick`]).
//! - `end` is bumped together with the flushed mutations when it completes
//!   ([`EntityCommandBuffer::finalize_tick`]).
//!
//! `start == end + 1` after a restart means a tick was interrupted;
//! [`EntityCommandBuffer::recover`] rebuilds its transaction pool from the
//! journal so the simulation can redo it. The [`TickLoop`] driver does this
//! automatically before its first tick.
//!
//! # Quick Start
//!
//! ```
//! use tickline_engine::prelude::*;
//! use tickline_storage::MemoryBackend;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Spawn { hp: u32 }
//!
//! let mut messages = MessageRegistry::new();
//! let spawn = messages.register::<Spawn>("spawn").unwrap();
//!
//! let mut ecb = EntityCommandBuffer::new(MemoryBackend::new(), BufferConfig::default());
//! ecb.register_component("health").unwrap();
//!
//! let mut pool = TxPool::new();
//! pool.add_transaction(
//!     spawn,
//!     serde_json::json!({"hp": 10}),
//!     SignedTransaction::new("alice", "w1", 0, serde_json::json!({"hp": 10})),
//! );
//!
//! ecb.start_next_tick(&messages, &pool).unwrap();
//! let entity = ecb.create_entity(vec![("health", serde_json::json!(10))]).unwrap();
//! ecb.finalize_tick().unwrap();
//!
//! assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters { start: 1, end: 1 });
//! assert_eq!(ecb.get_component(entity, "health").unwrap(), serde_json::json!(10));
//! ```
//!
//! [`TickLoop`]: runner::TickLoop

#![deny(unsafe_code)]

pub mod buffer;
pub mod keys;
pub mod pending;
pub mod runner;
pub mod tick;

pub use buffer::EntityCommandBuffer;

use tickline_ecs::EcsError;
use tickline_storage::StorageError;
use tickline_tx::message::MessageId;
use tickline_tx::TxError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the tick protocol and the command buffer.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A backend call failed. `context` names the operation.
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StorageError,
    },

    /// A pooled payload could not be encoded by its message type.
    #[error("failed to encode pending transaction: {0}")]
    Encode(#[source] TxError),

    /// A journaled payload could not be decoded by its message type.
    #[error("failed to decode pending transaction: {0}")]
    Decode(#[source] TxError),

    /// The journal value is not a valid pending-transaction sequence.
    #[error("malformed pending-transaction journal: {0}")]
    Journal(#[source] serde_json::Error),

    /// A message type is missing from the registry.
    #[error("message type {id} not found in registry")]
    MessageNotFound { id: MessageId },

    /// `start_next_tick` was called before the previous tick was finalized.
    #[error("tick {start} is still in flight (end tick is {end}); recover or finalize it first")]
    TickInFlight { start: u64, end: u64 },

    /// `finalize_tick` was called with no tick in flight.
    #[error("no tick in flight (last completed tick is {tick})")]
    NoTickInFlight { tick: u64 },

    /// Stored counters violate `end <= start <= end + 1`.
    #[error("corrupt tick counters: start={start}, end={end}")]
    CorruptCounters { start: u64, end: u64 },

    /// A component value could not be (de)serialized.
    #[error("invalid value for component '{component}': {source}")]
    ComponentValue {
        component: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored archetype table is not valid JSON.
    #[error("malformed archetype table: {0}")]
    ArchetypeTable(#[source] serde_json::Error),

    /// A system reported a failure.
    #[error("system '{system}' failed: {message}")]
    System { system: String, message: String },

    /// An entity/component operation was rejected.
    #[error(transparent)]
    Ecs(#[from] EcsError),
}

impl TickError {
    /// Adapter for `map_err` that wraps a [`StorageError`] with `context`.
    pub(crate) fn storage(context: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Storage { context, source }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::buffer::EntityCommandBuffer;
    pub use crate::keys::{BufferConfig, StorageKeys};
    pub use crate::pending::PendingTransaction;
    pub use crate::runner::{SystemFn, TickConfig, TickDiagnostics, TickLoop, TickReport};
    pub use crate::tick::TickCounters;
    pub use crate::TickError;
    pub use tickline_ecs::prelude::{EntityId, FlushReport};
    pub use tickline_tx::prelude::*;
}
