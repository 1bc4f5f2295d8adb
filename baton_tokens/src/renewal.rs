//! Background renewal of the access token before it expires

use std::time::Duration;

use aliri_clock::{Clock, System, UnixTime};
use tokio::task::JoinHandle;

use crate::{RefreshOutcome, RenewalSchedule, SessionManager};

/// A type that provides some jittering of time
pub trait JitterSource {
    /// Jitters a given input time
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// A jitter source that does not do any jittering of time
#[derive(Debug)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use std::time::Duration;

    use aliri_clock::UnixTime;
    use rand::{Rng, SeedableRng};

    /// Jitters a value earlier by a random amount
    ///
    /// Times jittered by this type will have a value with a uniform distribution
    /// in the interval `(time - max_jitter, time]`.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R> {
        max_jitter: Duration,
        rand_source: R,
    }

    impl RandomEarlyJitter<rand::rngs::StdRng> {
        /// Constructs a new instance that will jitter times early up to `max_jitter`.
        pub fn new(max_jitter: Duration) -> Self {
            Self {
                max_jitter,
                rand_source: rand::rngs::StdRng::from_entropy(),
            }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&mut self, time: UnixTime) -> UnixTime {
            let max = self.max_jitter.as_secs();
            if max == 0 {
                return time;
            }

            let jitter = self.rand_source.gen_range(0..max);
            UnixTime(time.0.saturating_sub(jitter))
        }
    }
}

#[cfg(feature = "rand")]
pub use random::RandomEarlyJitter;

/// A running renewal task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct RenewalHandle {
    join: JoinHandle<()>,
}

impl RenewalHandle {
    /// Whether the renewal task has stopped
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Renews the session's access token shortly before it goes stale
#[derive(Debug)]
pub struct RenewalWatcher;

impl RenewalWatcher {
    /// Spawns a watcher for `session`
    ///
    /// Renewals go through the session's refresh coordinator, so a renewal
    /// that coincides with a rejected request joins the same refresh. A
    /// denied renewal ends the session; the watcher then waits for the next
    /// login.
    pub fn spawn<C, J>(
        session: SessionManager,
        schedule: RenewalSchedule<C>,
        jitter_source: J,
    ) -> RenewalHandle
    where
        C: Clock + Send + Sync + 'static,
        J: JitterSource + Send + 'static,
    {
        RenewalHandle {
            join: tokio::spawn(forever_renew(session, schedule, jitter_source)),
        }
    }

    /// Spawns a watcher with the default schedule and no jitter
    pub fn spawn_default(session: SessionManager) -> RenewalHandle {
        Self::spawn(session, RenewalSchedule::<System>::default(), NullJitter)
    }
}

/// The shortest time allowed between two renewals
const MIN_GAP: u64 = 5;

async fn forever_renew<C, J>(session: SessionManager, schedule: RenewalSchedule<C>, mut jitter: J)
where
    C: Clock,
    J: JitterSource,
{
    let lenient = session.validator().ignoring_expiry();
    let mut changes = session.subscribe();
    let mut not_before = UnixTime(0);

    loop {
        let current = changes.borrow_and_update().clone();

        let claims = current
            .as_ref()
            .and_then(|pair| match lenient.inspect(pair.access().as_str()) {
                Ok(claims) => Some(claims),
                Err(rejection) => {
                    tracing::warn!(%rejection, "cannot schedule renewal of unverifiable token");
                    None
                }
            });

        let (Some(pair), Some(claims)) = (current, claims) else {
            tracing::trace!("no renewable session, waiting for login");
            if changes.changed().await.is_err() {
                return;
            }
            continue;
        };

        let renew_at = jitter.jitter(schedule.stale_at(&claims)).max(not_before);
        tracing::debug!(
            renew_at = renew_at.0,
            expiry = claims.expiry().0,
            "waiting for access token to become stale"
        );

        tokio::select! {
            _ = sleep_until(&schedule, renew_at) => {}
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                tracing::trace!("session changed, rescheduling");
                continue;
            }
        }

        tracing::debug!("renewing access token");
        not_before = UnixTime(schedule.now().0.saturating_add(MIN_GAP));
        match session.refresh_stale(pair.access()).await {
            RefreshOutcome::Renewed(_) => tracing::trace!("access token renewed"),
            RefreshOutcome::Denied(denial) => {
                tracing::warn!(%denial, "renewal denied, waiting for next login")
            }
        }
    }
}

async fn sleep_until<C: Clock>(schedule: &RenewalSchedule<C>, t: UnixTime) {
    // The timer does not advance while a host is suspended, so long waits are
    // broken into heartbeats that re-check the wall clock.
    const HEARTBEAT: u64 = 30;
    loop {
        let now = schedule.now();
        if now >= t {
            tracing::trace!("token now stale");
            return;
        }

        let until_stale = t.0 - now.0;
        let delay = until_stale.min(HEARTBEAT);
        tracing::trace!(delay, until_stale, "token not yet stale, sleeping…");
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}
