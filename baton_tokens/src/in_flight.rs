//! Requests in flight under the session's access tokens
//!
//! Every client sending requests for a session registers them here. When one
//! of them is rejected, the others sent with the same access token can be
//! cancelled at once instead of each being rejected in turn.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio_util::sync::CancellationToken;

use crate::{AccessToken, AccessTokenRef};

#[derive(Debug)]
struct Entry {
    token: AccessToken,
    cancel: CancellationToken,
}

/// Requests currently awaiting a response, keyed by the access token they
/// were sent with
#[derive(Debug, Default)]
pub struct InFlight {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl InFlight {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tracks a request until the returned registration is dropped
    pub fn register(self: &Arc<Self>, token: &AccessTokenRef) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        self.entries().insert(
            id,
            Entry {
                token: token.to_owned(),
                cancel: cancel.clone(),
            },
        );

        Registration {
            registry: Arc::clone(self),
            id,
            cancel,
        }
    }

    /// Cancels every tracked request sent with `stale`
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_wave(&self, stale: &AccessTokenRef) -> usize {
        let entries = self.entries();
        let mut cancelled = 0;
        for entry in entries.values().filter(|e| e.token.as_str() == stale.as_str()) {
            if !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// The number of requests being tracked
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no requests are being tracked
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// A tracked request, which stops being tracked when dropped
#[derive(Debug)]
pub struct Registration {
    registry: Arc<InFlight>,
    id: u64,
    cancel: CancellationToken,
}

impl Registration {
    /// Completes once another request has cancelled this one
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.entries().remove(&self.id);
    }
}
