//! Business logic behind the HTTP handlers.

pub mod accumulator;
pub mod audit;
pub mod chats;
pub mod generation;
pub mod messages;
pub mod models;

use parley_core::ChatError;

/// Converts persistence-layer failures into [`ChatError::Storage`].
pub(crate) trait StorageExt<T> {
    fn storage(self) -> Result<T, ChatError>;
}

impl<T> StorageExt<T> for anyhow::Result<T> {
    fn storage(self) -> Result<T, ChatError> {
        self.map_err(|e| ChatError::Storage(format!("{e:#}")))
    }
}
