//! Signed source transactions and their content hashes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TxHash
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest identifying a transaction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.short())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TxHash {
    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// A transaction as submitted by a player, before its body is decoded into a
/// message payload.
///
/// Signature verification happens upstream; the engine stores the signature
/// so a recovered tick carries the exact same source transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The persona that signed the transaction.
    pub persona_tag: String,
    /// The world namespace the transaction targets.
    pub namespace: String,
    /// Per-persona replay-protection nonce.
    pub nonce: u64,
    /// Hex-encoded signature over the hashed fields.
    pub signature: String,
    /// The message body as submitted.
    pub body: serde_json::Value,
}

/// The fields covered by the hash, in a fixed order.
#[derive(Serialize)]
struct HashedFields<'a> {
    persona_tag: &'a str,
    namespace: &'a str,
    nonce: u64,
    body: &'a serde_json::Value,
}

impl SignedTransaction {
    /// Build an unsigned transaction (empty signature).
    pub fn new(persona_tag: &str, namespace: &str, nonce: u64, body: serde_json::Value) -> Self {
        Self {
            persona_tag: persona_tag.to_owned(),
            namespace: namespace.to_owned(),
            nonce,
            signature: String::new(),
            body,
        }
    }

    /// Attach a signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// BLAKE3 digest of the persona, namespace, nonce and body.
    ///
    /// The signature is excluded so the hash is what gets signed.
    pub fn hash(&self) -> TxHash {
        let fields = HashedFields {
            persona_tag: &self.persona_tag,
            namespace: &self.namespace,
            nonce: self.nonce,
            body: &self.body,
        };
        // Serializing plain strings, integers and a `Value` cannot fail.
        let bytes = serde_json::to_vec(&fields).unwrap_or_default();
        TxHash(blake3::hash(&bytes).to_hex().to_string())
    }
}
