//! Durable token stores

use async_trait::async_trait;

use crate::{StoreError, TokenPair};

#[cfg(feature = "cookies")]
pub mod cookie;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "cookies")]
pub use cookie::CookieTokenStore;
#[cfg(feature = "file")]
pub use file::FileTokenStore;
pub use memory::InMemoryTokenStore;

/// Durable storage for the current token pair
///
/// Stores perform no coordination of their own. The session manager is the
/// only writer, and the last write wins.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Loads the persisted pair, if any
    async fn get(&self) -> Result<Option<TokenPair>, StoreError>;

    /// Replaces the persisted pair
    async fn set(&self, pair: &TokenPair) -> Result<(), StoreError>;

    /// Removes any persisted pair
    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for std::sync::Arc<T> {
    async fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        (**self).get().await
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        (**self).set(pair).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}
