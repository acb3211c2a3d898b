//! Message type descriptors and the registry that resolves them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::TxError;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Stable identifier of a message type.
///
/// [`MessageRegistry::register`] assigns ids sequentially from 1, so a process
/// that registers the same types in the same order gets the same ids across
/// restarts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u32);

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageDescriptor
// ---------------------------------------------------------------------------

/// Codec capability for one message type.
///
/// Payloads travel through the engine as [`serde_json::Value`]; the
/// descriptor validates them against the concrete schema on the way to and
/// from bytes.
pub trait MessageDescriptor: Send + Sync {
    /// The type's identifier.
    fn id(&self) -> MessageId;

    /// The type's registered name.
    fn name(&self) -> &str;

    /// Encode a structured payload into raw bytes.
    fn encode(&self, payload: &serde_json::Value) -> Result<Vec<u8>, TxError>;

    /// Decode raw bytes into a structured payload.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, TxError>;

    /// Canonical form of `payload`: what decoding its encoding yields.
    ///
    /// Pooling normalized payloads guarantees the journal reproduces them
    /// exactly.
    fn normalize(&self, payload: &serde_json::Value) -> Result<serde_json::Value, TxError> {
        self.decode(&self.encode(payload)?)
    }
}

/// Descriptor backed by a `serde` input type.
pub struct TypedMessage<In> {
    id: MessageId,
    name: String,
    _input: PhantomData<fn() -> In>,
}

impl<In> TypedMessage<In> {
    /// Create a descriptor for `In` with the given id and name.
    pub fn new(id: MessageId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            _input: PhantomData,
        }
    }
}

impl<In> MessageDescriptor for TypedMessage<In>
where
    In: Serialize + DeserializeOwned,
{
    fn id(&self) -> MessageId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, payload: &serde_json::Value) -> Result<Vec<u8>, TxError> {
        let encode_err = |source| TxError::Encode {
            message: self.name.clone(),
            source,
        };
        let typed: In = serde_json::from_value(payload.clone()).map_err(encode_err)?;
        serde_json::to_vec(&typed).map_err(encode_err)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, TxError> {
        let decode_err = |source| TxError::Decode {
            message: self.name.clone(),
            source,
        };
        let typed: In = serde_json::from_slice(bytes).map_err(decode_err)?;
        serde_json::to_value(typed).map_err(decode_err)
    }
}

// ---------------------------------------------------------------------------
// MessageRegistry
// ---------------------------------------------------------------------------

/// Maps message ids to their descriptors.
#[derive(Default)]
pub struct MessageRegistry {
    by_id: BTreeMap<MessageId, Box<dyn MessageDescriptor>>,
    by_name: HashMap<String, MessageId>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_id.iter().map(|(id, d)| (id, d.name())))
            .finish()
    }
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type backed by the `serde` type `In`.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::DuplicateMessage`] if `name` is already taken.
    pub fn register<In>(&mut self, name: &str) -> Result<MessageId, TxError>
    where
        In: Serialize + DeserializeOwned + 'static,
    {
        let id = MessageId(self.by_id.keys().next_back().map_or(1, |last| last.0 + 1));
        self.register_descriptor(Box::new(TypedMessage::<In>::new(id, name)))
    }

    /// Register a hand-written descriptor under its own id.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::DuplicateMessage`] if the descriptor's name or id is
    /// already taken.
    pub fn register_descriptor(
        &mut self,
        descriptor: Box<dyn MessageDescriptor>,
    ) -> Result<MessageId, TxError> {
        let id = descriptor.id();
        let name = descriptor.name().to_owned();
        if let Some(&existing) = self.by_name.get(&name) {
            return Err(TxError::DuplicateMessage { name, id: existing });
        }
        if self.by_id.contains_key(&id) {
            return Err(TxError::DuplicateMessage { name, id });
        }
        tracing::debug!(message = %name, id = id.0, "registered message type");
        self.by_name.insert(name, id);
        self.by_id.insert(id, descriptor);
        Ok(id)
    }

    /// Look up a descriptor by id.
    pub fn get(&self, id: MessageId) -> Option<&dyn MessageDescriptor> {
        self.by_id.get(&id).map(|d| d.as_ref())
    }

    /// Look up a message id by registered name.
    pub fn by_name(&self, name: &str) -> Option<MessageId> {
        self.by_name.get(name).copied()
    }

    /// Iterate over descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn MessageDescriptor> {
        self.by_id.values().map(|d| d.as_ref())
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no message types are registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
