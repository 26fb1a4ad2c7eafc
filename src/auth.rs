//! Access token lifecycle.
//!
//! [`TokenManager`] owns the current token pair. Every successful login or
//! refresh persists the pair and arms a single refresh timer `margin`
//! seconds before expiry. A refresh that fails in transit is retried after
//! `retry_delay`; one the server rejects is reported as
//! [`TokenEvent::Invalidated`] and never retried, leaving the forced logout
//! to whoever listens. Logging out cancels the timer, and a refresh still in
//! flight at that moment has its result discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiError, TokenEndpoint};
use crate::config::TokenConfig;
use crate::credentials::CredentialStore;
use crate::model::AccessToken;

/// Floor for any armed timer so an already-expired token cannot spin.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("token endpoint unavailable: {0}")]
    Transient(#[source] ApiError),
    #[error("token rejected: {0}")]
    Invalid(#[source] ApiError),
}

impl TokenError {
    fn from_api(err: ApiError) -> Self {
        if err.is_invalid_grant() {
            TokenError::Invalid(err)
        } else {
            TokenError::Transient(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    LoggedIn,
    Refreshed,
    /// The server refused the refresh token. The session is unusable.
    Invalidated,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// How long before expiry to refresh
    pub margin: Duration,
    /// Wait after a refresh that failed in transit
    pub retry_delay: Duration,
}

impl From<&TokenConfig> for RefreshPolicy {
    fn from(config: &TokenConfig) -> Self {
        Self {
            margin: Duration::from_secs(config.refresh_margin_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&TokenConfig::default())
    }
}

struct ScheduledRefresh {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    current: Option<AccessToken>,
    /// Bumped on every login and logout
    session: u64,
    scheduled: Option<ScheduledRefresh>,
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,
    credentials: Arc<dyn CredentialStore>,
    policy: RefreshPolicy,
    state: Mutex<State>,
    /// Serializes exchanges with the token endpoint
    exchange: AsyncMutex<()>,
    events: broadcast::Sender<TokenEvent>,
    next_timer_id: AtomicU64,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        credentials: Arc<dyn CredentialStore>,
        policy: RefreshPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                credentials,
                policy,
                state: Mutex::new(State::default()),
                exchange: AsyncMutex::new(()),
                events,
                next_timer_id: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resume the persisted session, if any, and arm its refresh.
    /// Must run inside a Tokio runtime.
    pub fn restore(&self) -> anyhow::Result<bool> {
        let Some(token) = self.inner.credentials.load()? else {
            return Ok(false);
        };
        let delay = token.refresh_delay(self.inner.policy.margin);

        let mut state = self.state();
        state.session += 1;
        state.current = Some(token);
        self.schedule_locked(&mut state, delay);
        info!(refresh_in_secs = delay.as_secs(), "restored saved session");
        Ok(true)
    }

    /// Exchange an authorization code and start a new session.
    pub async fn login(&self, code: &str) -> Result<AccessToken, TokenError> {
        let _exchange = self.inner.exchange.lock().await;

        let token = self
            .inner
            .endpoint
            .exchange_code(code)
            .await
            .map_err(|err| {
                warn!(error = %err, "authorization code exchange failed");
                TokenError::from_api(err)
            })?;

        {
            let mut state = self.state();
            state.session += 1;
            self.install_locked(&mut state, &token);
        }
        self.emit(TokenEvent::LoggedIn);
        info!("logged in");
        Ok(token)
    }

    /// Refresh now. Any pending timer is replaced by the outcome.
    pub async fn refresh(&self) -> Result<AccessToken, TokenError> {
        let _exchange = self.inner.exchange.lock().await;
        self.refresh_exclusive().await
    }

    /// The current access token, refreshed first if it is within `margin`
    /// of expiry. Concurrent callers share a single refresh.
    pub async fn valid_access_token(&self) -> Result<String, TokenError> {
        let current = self.current().ok_or(TokenError::NotLoggedIn)?;
        if !self.is_stale(&current) {
            return Ok(current.access_token);
        }

        let _exchange = self.inner.exchange.lock().await;
        match self.current() {
            Some(current) if !self.is_stale(&current) => Ok(current.access_token),
            Some(_) => {
                debug!("access token about to expire, refreshing before use");
                self.refresh_exclusive().await.map(|t| t.access_token)
            }
            None => Err(TokenError::NotLoggedIn),
        }
    }

    fn is_stale(&self, token: &AccessToken) -> bool {
        token.refresh_delay(self.inner.policy.margin).is_zero()
    }

    /// Caller holds the exchange lock.
    async fn refresh_exclusive(&self) -> Result<AccessToken, TokenError> {
        let (refresh_token, session) = {
            let state = self.state();
            let Some(current) = state.current.as_ref() else {
                return Err(TokenError::NotLoggedIn);
            };
            (current.refresh_token.clone(), state.session)
        };

        match self.inner.endpoint.refresh(&refresh_token).await {
            Ok(token) => {
                {
                    let mut state = self.state();
                    if state.session != session || state.current.is_none() {
                        debug!("session ended during refresh, discarding token");
                        return Err(TokenError::NotLoggedIn);
                    }
                    self.install_locked(&mut state, &token);
                }
                self.emit(TokenEvent::Refreshed);
                debug!(expires_in = token.expires_in, "access token refreshed");
                Ok(token)
            }
            Err(err) if err.is_invalid_grant() => {
                warn!(error = %err, "refresh token rejected");
                {
                    let mut state = self.state();
                    if let Some(scheduled) = state.scheduled.take() {
                        scheduled.handle.abort();
                    }
                }
                self.emit(TokenEvent::Invalidated);
                Err(TokenError::Invalid(err))
            }
            Err(err) => {
                let retry = self.inner.policy.retry_delay;
                warn!(error = %err, retry_in_secs = retry.as_secs(), "token refresh failed");
                let mut state = self.state();
                if state.session == session && state.current.is_some() {
                    self.schedule_locked(&mut state, retry);
                }
                Err(TokenError::Transient(err))
            }
        }
    }

    /// End the session: forget the token, wipe saved credentials and cancel
    /// the refresh timer.
    pub fn logout(&self) {
        {
            let mut state = self.state();
            state.session += 1;
            state.current = None;
            if let Some(scheduled) = state.scheduled.take() {
                scheduled.handle.abort();
            }
            if let Err(err) = self.inner.credentials.clear() {
                warn!(error = %err, "failed to clear saved credentials");
            }
        }
        self.emit(TokenEvent::LoggedOut);
        info!("logged out");
    }

    pub fn current(&self) -> Option<AccessToken> {
        self.state().current.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state().current.as_ref().map(|t| t.access_token.clone())
    }

    /// Changes on every login, restore and logout.
    pub fn session(&self) -> u64 {
        self.state().session
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().current.is_some()
    }

    /// When the armed refresh will fire, if one is armed.
    pub fn next_refresh_at(&self) -> Option<Instant> {
        self.state().scheduled.as_ref().map(|s| s.deadline)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: TokenEvent) {
        let _ = self.inner.events.send(event);
    }

    fn install_locked(&self, state: &mut State, token: &AccessToken) {
        state.current = Some(token.clone());
        if let Err(err) = self.inner.credentials.save(token) {
            warn!(error = %err, "failed to persist credentials");
        }
        let delay = token.refresh_delay(self.inner.policy.margin);
        self.schedule_locked(state, delay);
    }

    fn schedule_locked(&self, state: &mut State, delay: Duration) {
        if let Some(previous) = state.scheduled.take() {
            previous.handle.abort();
        }

        let delay = delay.max(MIN_REFRESH_DELAY);
        let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                TokenManager { inner }.run_scheduled(id).await;
            }
        });

        state.scheduled = Some(ScheduledRefresh {
            id,
            deadline,
            handle,
        });
        debug!(in_secs = delay.as_secs(), "token refresh scheduled");
    }

    async fn run_scheduled(&self, id: u64) {
        {
            let mut state = self.state();
            if state.scheduled.as_ref().map(|s| s.id) != Some(id) {
                return;
            }
            // Detach rather than abort: this is the running task
            state.scheduled = None;
            if state.current.is_none() {
                return;
            }
        }
        if let Err(err) = self.refresh().await {
            debug!(error = %err, "scheduled refresh did not complete");
        }
    }
}
