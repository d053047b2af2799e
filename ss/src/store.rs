//! The StateStore trait

use crate::error::StoreError;

/// Key-value surface a task applies its records to
///
/// Writes are buffered until `flush`, which makes them durable. Writes not
/// made durable by `flush` are discarded on `close`.
pub trait StateStore: Send {
    /// Store name, unique within a task directory
    fn name(&self) -> &str;

    /// Insert or overwrite a key
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key; deleting a missing key is not an error
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Read a key, including buffered writes
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries ordered by key, including buffered writes
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Force buffered writes to durable storage
    fn flush(&mut self) -> Result<(), StoreError>;

    /// Close the store; later operations fail with `StoreError::Closed`
    fn close(&mut self) -> Result<(), StoreError>;

    /// Whether the store is still open
    fn is_open(&self) -> bool;
}
