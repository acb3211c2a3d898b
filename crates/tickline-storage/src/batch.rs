//! Pipelined write batches.

/// A single queued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCommand {
    /// Overwrite `key` with `value`.
    Set {
        /// Target key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Increment the counter at `key` (absent counts as zero).
    Incr {
        /// Target key.
        key: String,
    },
    /// Remove `key`.
    Delete {
        /// Target key.
        key: String,
    },
}

impl KvCommand {
    /// The key this command writes.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Incr { key } | Self::Delete { key } => key,
        }
    }
}

/// An ordered batch of commands committed as one atomic unit.
///
/// Built locally and handed to [`KvBackend::commit`](crate::KvBackend::commit)
/// in one piece; nothing reaches the backend until then.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    commands: Vec<KvCommand>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Queue a write.
    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.commands.push(KvCommand::Set {
            key: key.into(),
            value,
        });
    }

    /// Queue a counter increment.
    pub fn incr(&mut self, key: impl Into<String>) {
        self.commands.push(KvCommand::Incr { key: key.into() });
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.commands.push(KvCommand::Delete { key: key.into() });
    }

    /// Queued commands in submission order.
    pub fn commands(&self) -> &[KvCommand] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn into_commands(self) -> Vec<KvCommand> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_keep_submission_order() {
        let mut batch = WriteBatch::new();
        batch.set("a", vec![1]);
        batch.incr("b");
        batch.delete("a");

        assert_eq!(batch.len(), 3);
        let keys: Vec<&str> = batch.commands().iter().map(KvCommand::key).collect();
        assert_eq!(keys, vec!["a", "b", "a"]);
        assert!(matches!(batch.commands()[2], KvCommand::Delete { .. }));
    }

    #[test]
    fn new_batch_is_empty() {
        let batch = WriteBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
