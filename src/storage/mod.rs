#![forbid(unsafe_code)]

//! Durable key-value backends for the task store.
//!
//! A backend stores opaque blobs under string keys. It knows nothing about
//! tasks; the store decides what the bytes mean.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` when nothing has ever been written under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces the value under `key`. Durable once the future resolves.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Keys double as file names in [`FileStore`], so the same rules apply everywhere.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let reason = if key.trim().is_empty() {
        "must not be empty"
    } else if key.contains('/') || key.contains('\\') {
        "must not contain path separators"
    } else if key.contains("..") {
        "must not contain '..'"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidKey {
        key: key.to_owned(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_keys() {
        assert!(validate_key("TASKS").is_ok());
        assert!(validate_key("tasks-v1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("   ").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("..").is_err());
    }
}
