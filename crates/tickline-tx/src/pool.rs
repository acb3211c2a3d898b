//! The per-tick transaction pool.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::MessageId;
use crate::sign::{SignedTransaction, TxHash};

/// One pooled transaction: its decoded payload plus the source transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    /// The structured message payload.
    pub msg: serde_json::Value,
    /// Hash of the source transaction.
    pub tx_hash: TxHash,
    /// The source transaction as submitted.
    pub tx: SignedTransaction,
}

/// Transactions submitted for one tick, grouped by message type.
///
/// Within a type, entries keep submission order. Two pools compare equal when
/// they hold the same types with the same ordered entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxPool {
    by_type: BTreeMap<MessageId, Vec<TxData>>,
    len: usize,
}

impl TxPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction under `id` and return its hash.
    pub fn add_transaction(
        &mut self,
        id: MessageId,
        msg: serde_json::Value,
        tx: SignedTransaction,
    ) -> TxHash {
        let tx_hash = tx.hash();
        self.push(id, TxData {
            msg,
            tx_hash: tx_hash.clone(),
            tx,
        });
        tx_hash
    }

    /// Append a pre-built entry, keeping its recorded hash.
    pub fn push(&mut self, id: MessageId, data: TxData) {
        self.by_type.entry(id).or_default().push(data);
        self.len += 1;
    }

    /// Entries submitted under `id`, in submission order.
    pub fn for_id(&self, id: MessageId) -> &[TxData] {
        self.by_type.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Message types with at least one entry, in id order.
    pub fn message_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.by_type.keys().copied()
    }

    /// Total number of entries across all types.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(persona: &str, nonce: u64) -> SignedTransaction {
        SignedTransaction::new(persona, "w1", nonce, serde_json::json!({"n": nonce}))
    }

    #[test]
    fn empty_pool() {
        let pool = TxPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert!(pool.for_id(MessageId(1)).is_empty());
        assert_eq!(pool.message_ids().count(), 0);
    }

    #[test]
    fn submission_order_kept_per_type() {
        let mut pool = TxPool::new();
        pool.add_transaction(MessageId(2), serde_json::json!("b0"), tx("bob", 0));
        pool.add_transaction(MessageId(1), serde_json::json!("a0"), tx("alice", 0));
        pool.add_transaction(MessageId(2), serde_json::json!("b1"), tx("bob", 1));

        assert_eq!(pool.len(), 3);
        let msgs: Vec<_> = pool.for_id(MessageId(2)).iter().map(|d| d.msg.clone()).collect();
        assert_eq!(msgs, vec![serde_json::json!("b0"), serde_json::json!("b1")]);
        assert_eq!(
            pool.message_ids().collect::<Vec<_>>(),
            vec![MessageId(1), MessageId(2)]
        );
    }

    #[test]
    fn add_returns_source_hash() {
        let mut pool = TxPool::new();
        let source = tx("alice", 9);
        let hash = pool.add_transaction(MessageId(1), serde_json::json!(null), source.clone());
        assert_eq!(hash, source.hash());
        assert_eq!(pool.for_id(MessageId(1))[0].tx_hash, hash);
    }

    #[test]
    fn equality_depends_on_order() {
        let mut a = TxPool::new();
        a.add_transaction(MessageId(1), serde_json::json!(1), tx("alice", 1));
        a.add_transaction(MessageId(1), serde_json::json!(2), tx("alice", 2));

        let mut b = TxPool::new();
        b.add_transaction(MessageId(1), serde_json::json!(2), tx("alice", 2));
        b.add_transaction(MessageId(1), serde_json::json!(1), tx("alice", 1));

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
