//! An in-memory token store

use std::sync::Mutex;

use async_trait::async_trait;

use super::TokenStore;
use crate::{StoreError, TokenPair};

/// A token store that lives only as long as the process
///
/// Useful for ephemeral sessions and for tests.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl InMemoryTokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store already holding `pair`
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TokenPair>> {
        self.pair.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.slot().clone())
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        *self.slot() = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}
