//! Tickline Tx -- message types, signed transactions, and the per-tick pool.
//!
//! A *message type* is the schema of one kind of player-submitted
//! transaction (e.g. `"move"`, `"attack"`). The [`MessageRegistry`] maps each
//! type's [`MessageId`] to a [`MessageDescriptor`]: a capability pair that can
//! encode a structured payload to bytes and decode it back. The tick engine
//! resolves descriptors by id lookup, never by runtime type inspection.
//!
//! Every accepted transaction lands in the [`TxPool`] for the tick that will
//! process it, grouped by message type with submission order preserved.
//!
//! # Example
//!
//! ```
//! use tickline_tx::prelude::*;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Move { direction: String }
//!
//! let mut registry = MessageRegistry::new();
//! let move_id = registry.register::<Move>("move").unwrap();
//!
//! let tx = SignedTransaction::new("alice", "world-1", 0, serde_json::json!({"direction": "up"}));
//! let mut pool = TxPool::new();
//! pool.add_transaction(move_id, serde_json::json!({"direction": "up"}), tx);
//!
//! assert_eq!(pool.for_id(move_id).len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod message;
pub mod pool;
pub mod sign;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by message registration and payload codecs.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// A message type with the same name is already registered.
    #[error("message type '{name}' is already registered as {id}")]
    DuplicateMessage {
        /// The clashing name.
        name: String,
        /// The id the name is already bound to.
        id: message::MessageId,
    },

    /// A payload does not match the message type's schema.
    #[error("failed to encode payload for message '{message}': {source}")]
    Encode {
        /// Name of the message type.
        message: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A payload encodes, but decoding the bytes does not give it back
    /// (unknown fields, integers in float fields, and the like).
    #[error("payload for message '{message}' is not in canonical form")]
    Lossy {
        /// Name of the message type.
        message: String,
    },

    /// Stored bytes do not decode as the message type's schema.
    #[error("failed to decode payload for message '{message}': {source}")]
    Decode {
        /// Name of the message type.
        message: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::message::{MessageDescriptor, MessageId, MessageRegistry, TypedMessage};
    pub use crate::pool::{TxData, TxPool};
    pub use crate::sign::{SignedTransaction, TxHash};
    pub use crate::TxError;
}
