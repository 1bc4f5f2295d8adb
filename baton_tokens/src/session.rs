//! The session context shared by every consumer of the current token pair

use std::{error, fmt, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::{
    coordinator::{self, RefreshCoordinator},
    AccessTokenRef, AuthorityError, Credentials, Denial, InFlight, InMemoryTokenStore,
    RefreshOutcome, StoreError, TokenAuthority, TokenPair, TokenRejection, TokenStore,
    TokenValidator,
};

/// A receiver notified whenever the current pair changes
pub type PairReceiver = watch::Receiver<Option<Arc<TokenPair>>>;

/// An error while logging in
#[derive(Debug, Error)]
pub enum LoginError {
    /// The authority refused the credentials or could not be reached
    #[error("authority refused login")]
    Authority(#[from] AuthorityError),
    /// The authority issued an access token that does not validate locally
    #[error("authority issued an invalid access token")]
    InvalidToken(#[from] TokenRejection),
    /// The new pair could not be persisted
    #[error("unable to persist token pair")]
    Store(#[from] StoreError),
}

pub(crate) struct SessionState {
    pub(crate) authority: Box<dyn TokenAuthority>,
    pub(crate) validator: TokenValidator,
    pub(crate) store: Box<dyn TokenStore>,
    pub(crate) current: watch::Sender<Option<Arc<TokenPair>>>,
    pub(crate) coordinator: RefreshCoordinator,
    in_flight: Arc<InFlight>,
    /// Serializes changes to the current pair with their store writes
    write: Mutex<()>,
}

impl SessionState {
    /// Installs a renewed pair, unless the session moved on while the refresh
    /// was in flight
    pub(crate) async fn adopt_renewed(
        &self,
        presented: &TokenPair,
        pair: TokenPair,
    ) -> RefreshOutcome {
        let pair = Arc::new(pair);
        let mut adopted = false;
        let _write = self.write.lock().await;

        self.current.send_if_modified(|current| {
            let still_current = current
                .as_ref()
                .is_some_and(|c| c.carries(presented.access()));
            if still_current {
                *current = Some(Arc::clone(&pair));
                adopted = true;
            }
            still_current
        });

        if !adopted {
            tracing::debug!("session changed during refresh, discarding renewed pair");
            return match self.current.borrow().clone() {
                Some(current) => RefreshOutcome::Renewed(current),
                None => RefreshOutcome::Denied(Denial::NoSession),
            };
        }

        if let Err(error) = self.store.set(&pair).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to persist renewed token pair"
            );
        }

        tracing::info!("token pair rotated");
        RefreshOutcome::Renewed(pair)
    }

    /// Clears the session after a denial, unless it has already moved on
    pub(crate) async fn abandon(&self, presented: &TokenPair, denial: &Denial) {
        let mut cleared = false;
        let _write = self.write.lock().await;

        self.current.send_if_modified(|current| {
            let still_current = current
                .as_ref()
                .is_some_and(|c| c.carries(presented.access()));
            if still_current {
                *current = None;
                cleared = true;
            }
            still_current
        });

        if cleared {
            tracing::warn!(%denial, "clearing session");
            if let Err(error) = self.store.clear().await {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to clear persisted token pair"
                );
            }
        }
    }
}

/// The session context
///
/// Owns the token store, the authority, the validator, the refresh
/// coordinator and the registry of in-flight requests, along with the
/// current pair held in memory. Cloning is cheap and every clone refers to the
/// same session.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<SessionState>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("current", &*self.state.current.borrow())
            .field("refresh_in_flight", &self.state.coordinator.in_flight())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Starts building a session that obtains tokens from `authority` and
    /// verifies them with `validator`
    pub fn builder<A>(authority: A, validator: TokenValidator) -> SessionBuilder
    where
        A: TokenAuthority + 'static,
    {
        SessionBuilder {
            authority: Box::new(authority),
            validator,
            store: None,
            refresh_timeout: RefreshCoordinator::DEFAULT_TIMEOUT,
        }
    }

    /// The current pair, if any
    pub fn current(&self) -> Option<Arc<TokenPair>> {
        self.state.current.borrow().clone()
    }

    /// Subscribes to changes of the current pair
    pub fn subscribe(&self) -> PairReceiver {
        self.state.current.subscribe()
    }

    /// The validator used for locally verifying access tokens
    pub fn validator(&self) -> &TokenValidator {
        &self.state.validator
    }

    /// Whether a session is present and its access token currently validates
    pub fn is_authenticated(&self) -> bool {
        self.current()
            .is_some_and(|pair| self.state.validator.validate(pair.access().as_str()))
    }

    /// Whether a refresh is currently in flight
    pub fn refresh_in_flight(&self) -> bool {
        self.state.coordinator.in_flight()
    }

    /// The requests currently in flight under this session's access tokens
    ///
    /// Shared by every client of the session, so a rejection seen by one
    /// client cancels the requests of the others.
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.state.in_flight
    }

    /// Exchanges credentials for a new session
    ///
    /// The issued access token must validate locally before it is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority refuses the credentials, issues an
    /// unusable token, or the pair cannot be persisted. The previous session,
    /// if any, is left untouched in that case.
    #[tracing::instrument(skip_all, fields(username = %credentials.username()))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Arc<TokenPair>, LoginError> {
        let pair = self.state.authority.login(credentials).await?;
        self.state.validator.inspect(pair.access().as_str())?;

        let _write = self.state.write.lock().await;
        self.state.store.set(&pair).await?;

        let pair = Arc::new(pair);
        self.state.current.send_replace(Some(Arc::clone(&pair)));
        tracing::info!("logged in");
        Ok(pair)
    }

    /// Ends the session
    ///
    /// The in-memory pair is dropped even if the store cannot be cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted pair could not be removed.
    pub async fn logout(&self) -> Result<(), StoreError> {
        let _write = self.state.write.lock().await;
        self.state.current.send_replace(None);
        self.state.store.clear().await?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Renews the current pair
    ///
    /// Joins the refresh already in flight, if there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        coordinator::refresh_stale(&self.state, None).await
    }

    /// Renews the pair issued with the access token `seen`
    ///
    /// If the current pair no longer carries `seen`, it was already renewed
    /// and is returned without contacting the authority.
    pub async fn refresh_stale(&self, seen: &AccessTokenRef) -> RefreshOutcome {
        coordinator::refresh_stale(&self.state, Some(seen)).await
    }
}

/// Builds a [`SessionManager`]
pub struct SessionBuilder {
    authority: Box<dyn TokenAuthority>,
    validator: TokenValidator,
    store: Option<Box<dyn TokenStore>>,
    refresh_timeout: Duration,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("validator", &self.validator)
            .field("refresh_timeout", &self.refresh_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    /// Persists the session in `store`
    ///
    /// Without a store, the session lives only in memory.
    pub fn with_store<S: TokenStore + 'static>(self, store: S) -> Self {
        Self {
            store: Some(Box::new(store)),
            ..self
        }
    }

    /// Bounds how long a refresh may wait on the authority
    pub fn with_refresh_timeout(self, refresh_timeout: Duration) -> Self {
        Self {
            refresh_timeout,
            ..self
        }
    }

    /// Builds a session with no current pair, ignoring anything persisted
    pub fn build(self) -> SessionManager {
        self.build_with(None)
    }

    /// Builds a session, resuming the pair persisted in the store
    ///
    /// A persisted pair that can no longer be read is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be accessed.
    pub async fn restore(self) -> Result<SessionManager, StoreError> {
        let persisted = match self.store.as_deref() {
            Some(store) => match store.get().await {
                Ok(pair) => pair,
                Err(StoreError::Format(error)) => {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "discarding unreadable persisted token pair"
                    );
                    store.clear().await?;
                    None
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        tracing::debug!(restored = persisted.is_some(), "session restored");
        Ok(self.build_with(persisted))
    }

    fn build_with(self, pair: Option<TokenPair>) -> SessionManager {
        let (current, _) = watch::channel(pair.map(Arc::new));
        let store = self
            .store
            .unwrap_or_else(|| Box::new(InMemoryTokenStore::new()));

        SessionManager {
            state: Arc::new(SessionState {
                authority: self.authority,
                validator: self.validator,
                store,
                current,
                coordinator: RefreshCoordinator::new(self.refresh_timeout),
                in_flight: Arc::default(),
                write: Mutex::new(()),
            }),
        }
    }
}
