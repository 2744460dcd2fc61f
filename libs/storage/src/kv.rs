//! Ordered key-value store capability.

/// A set of writes applied atomically.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    pub(crate) ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push((key.into(), Some(value.into())));
        self
    }

    /// Removes `key`.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push((key.into(), None));
        self
    }

    /// Returns true if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Persistent key-value store with keys ordered bytewise.
/// Implementations must apply each batch atomically.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Value of `key`.
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// Applies the batch atomically.
    fn write(&self, batch: WriteBatch) -> anyhow::Result<()>;

    /// Entries with keys in `[from, to)`, in ascending key order.
    fn range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Entry with the greatest key in `[from, to)`.
    fn last_in_range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Sets `key` to `value`.
    fn put(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }
}
