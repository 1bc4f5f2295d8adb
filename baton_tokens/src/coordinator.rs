//! Single-flight refresh coordination
//!
//! At most one refresh is ever in flight for a session. Every caller that asks
//! for a refresh while one is running waits on the same flight and receives
//! the same outcome once it settles.
//!
//! The flight itself runs on its own task. A caller giving up on its wait does
//! not affect the flight or any other waiter. A panicking authority is denied
//! like any other failure, and a flight whose task ends without settling
//! resolves its waiters with [`Denial::Abandoned`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::sync::watch;

use crate::{session::SessionState, AccessTokenRef, Denial, TokenPair};

/// The settled result of a refresh
#[derive(Clone, Debug)]
pub enum RefreshOutcome {
    /// A new pair is in place
    Renewed(Arc<TokenPair>),
    /// No new pair could be obtained and the session has been cleared
    Denied(Denial),
}

impl RefreshOutcome {
    /// Whether a new pair is in place
    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed(_))
    }

    /// Converts the outcome into a `Result`
    pub fn into_result(self) -> Result<Arc<TokenPair>, Denial> {
        match self {
            Self::Renewed(pair) => Ok(pair),
            Self::Denied(denial) => Err(denial),
        }
    }
}

type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;
type OutcomeSender = watch::Sender<Option<RefreshOutcome>>;

#[derive(Debug)]
struct RefreshFlight {
    id: u64,
    outcome: OutcomeReceiver,
}

/// Holds the slot for the one refresh that may be in flight
#[derive(Debug)]
pub(crate) struct RefreshCoordinator {
    slot: Mutex<Option<RefreshFlight>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a refresh is currently in flight
    pub(crate) fn in_flight(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<RefreshFlight>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
        }
    }

    /// Destroys the flight and publishes its outcome in one step, so that a
    /// caller never observes an empty slot alongside an unpublished outcome
    fn settle(&self, id: u64, tx: &OutcomeSender, outcome: RefreshOutcome) {
        let mut slot = self.slot();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
        }
        tx.send_replace(Some(outcome));
    }
}

/// Renews the session, unless the access token `seen` has already been
/// replaced
///
/// Passing `None` forces a renewal of whatever pair is current.
pub(crate) async fn refresh_stale(
    state: &Arc<SessionState>,
    seen: Option<&AccessTokenRef>,
) -> RefreshOutcome {
    let mut outcome = {
        let mut slot = state.coordinator.slot();

        let current = state.current.borrow().clone();
        let Some(current) = current else {
            tracing::debug!("no session to refresh");
            return RefreshOutcome::Denied(Denial::NoSession);
        };

        if let Some(seen) = seen {
            if !current.carries(seen) {
                tracing::trace!("access token already renewed");
                return RefreshOutcome::Renewed(current);
            }
        }

        match slot.as_ref() {
            Some(flight) => {
                tracing::debug!(flight = flight.id, "joining refresh in flight");
                flight.outcome.clone()
            }
            None => {
                let id = state.coordinator.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                *slot = Some(RefreshFlight {
                    id,
                    outcome: rx.clone(),
                });

                tracing::debug!(flight = id, "starting refresh");
                tokio::spawn(run_flight(Arc::clone(state), id, current, tx));
                rx
            }
        }
    };

    let settled = outcome
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|o| o.clone());

    settled.unwrap_or(RefreshOutcome::Denied(Denial::Abandoned))
}

/// Frees the slot if the flight task is torn down before it settles
struct FlightGuard {
    state: Arc<SessionState>,
    id: u64,
    armed: bool,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(flight = self.id, "refresh ended without settling");
            self.state.coordinator.release(self.id);
        }
    }
}

async fn run_flight(
    state: Arc<SessionState>,
    id: u64,
    presented: Arc<TokenPair>,
    tx: OutcomeSender,
) {
    let mut guard = FlightGuard {
        state: Arc::clone(&state),
        id,
        armed: true,
    };

    let outcome = exchange(&state, &presented).await;

    match &outcome {
        RefreshOutcome::Renewed(_) => tracing::debug!(flight = id, "refresh settled"),
        RefreshOutcome::Denied(denial) => {
            tracing::warn!(flight = id, %denial, "refresh denied")
        }
    }

    state.coordinator.settle(id, &tx, outcome);
    guard.armed = false;
}

async fn exchange(state: &Arc<SessionState>, presented: &Arc<TokenPair>) -> RefreshOutcome {
    let mut upstream = tokio::spawn({
        let state = Arc::clone(state);
        let presented = Arc::clone(presented);
        async move {
            state
                .authority
                .refresh(Some(presented.access()), presented.refresh())
                .await
        }
    });

    let result = match tokio::time::timeout(state.coordinator.timeout(), &mut upstream).await {
        Ok(Ok(Ok(pair))) => match state.validator.inspect(pair.access().as_str()) {
            Ok(_) => Ok(pair),
            Err(rejection) => Err(Denial::invalid_pair(rejection)),
        },
        Ok(Ok(Err(err))) => Err(Denial::from(err)),
        Ok(Err(err)) => {
            if err.is_panic() {
                tracing::error!("authority panicked during refresh");
            }
            Err(Denial::Abandoned)
        }
        Err(_) => {
            upstream.abort();
            Err(Denial::Timeout)
        }
    };

    match result {
        Ok(pair) => state.adopt_renewed(presented, pair).await,
        Err(denial) => {
            state.abandon(presented, &denial).await;
            RefreshOutcome::Denied(denial)
        }
    }
}
