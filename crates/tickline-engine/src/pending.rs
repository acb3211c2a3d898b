//! The pending-transaction journal.
//!
//! When a tick starts, every transaction in its pool is encoded by its
//! message type into a [`PendingTransaction`] and the whole ordered sequence
//! is written as one JSON value under the journal key. Recovery reverses the
//! process: decode the sequence, resolve each entry's message type by id, and
//! rebuild a [`TxPool`] equal to the one the interrupted tick started with.
//!
//! Entries are grouped by message type (ascending id) and keep submission
//! order within a type, which is exactly the iteration order of [`TxPool`].

use serde::{Deserialize, Serialize};
use tickline_tx::message::{MessageId, MessageRegistry};
use tickline_tx::pool::{TxData, TxPool};
use tickline_tx::sign::{SignedTransaction, TxHash};
use tickline_tx::TxError;

use crate::TickError;

/// One journaled transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Message type of the transaction.
    pub type_id: MessageId,
    /// Hash of the source transaction, carried over unchanged.
    pub tx_hash: TxHash,
    /// Payload encoded by the message type's descriptor.
    pub data: Vec<u8>,
    /// The source transaction as submitted.
    pub tx: SignedTransaction,
}

/// Encode every pooled transaction with its message type's descriptor.
///
/// # Errors
///
/// [`TickError::MessageNotFound`] if the pool holds a type `messages` does not
/// know, [`TickError::Encode`] if a payload does not fit its type or would not
/// decode back to itself (see
/// [`MessageDescriptor::normalize`](tickline_tx::message::MessageDescriptor::normalize)).
pub fn collect_pending(
    messages: &MessageRegistry,
    pool: &TxPool,
) -> Result<Vec<PendingTransaction>, TickError> {
    let mut pending = Vec::with_capacity(pool.len());
    for id in pool.message_ids() {
        let descriptor = messages
            .get(id)
            .ok_or(TickError::MessageNotFound { id })?;
        for entry in pool.for_id(id) {
            let data = descriptor.encode(&entry.msg).map_err(TickError::Encode)?;
            if descriptor.decode(&data).map_err(TickError::Encode)? != entry.msg {
                return Err(TickError::Encode(TxError::Lossy {
                    message: descriptor.name().to_owned(),
                }));
            }
            pending.push(PendingTransaction {
                type_id: id,
                tx_hash: entry.tx_hash.clone(),
                data,
                tx: entry.tx.clone(),
            });
        }
    }
    Ok(pending)
}

/// Serialize a pending sequence into the journal value.
pub fn encode_journal(pending: &[PendingTransaction]) -> Result<Vec<u8>, TickError> {
    serde_json::to_vec(pending).map_err(TickError::Journal)
}

/// Parse a journal value back into its pending sequence.
pub fn decode_journal(bytes: &[u8]) -> Result<Vec<PendingTransaction>, TickError> {
    serde_json::from_slice(bytes).map_err(TickError::Journal)
}

/// Rebuild the pool a pending sequence was collected from.
///
/// # Errors
///
/// [`TickError::MessageNotFound`] if an entry's type is no longer registered
/// (removed and renamed types alike), [`TickError::Decode`] if its payload no
/// longer fits the type.
pub fn rebuild_pool(
    messages: &MessageRegistry,
    pending: Vec<PendingTransaction>,
) -> Result<TxPool, TickError> {
    let mut pool = TxPool::new();
    for entry in pending {
        let descriptor = messages
            .get(entry.type_id)
            .ok_or(TickError::MessageNotFound { id: entry.type_id })?;
        let msg = descriptor.decode(&entry.data).map_err(TickError::Decode)?;
        pool.push(entry.type_id, TxData {
            msg,
            tx_hash: entry.tx_hash,
            tx: entry.tx,
        });
    }
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
