/// Identity Session Manager
///
/// Owns the authentication state, sequences the session store, the identity
/// provider gateway and the request channel binder, and publishes every
/// completed state transition to subscribers.
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{
    AuthError, ChannelBinder, IdentityProviderGateway, LoginFailure, LoginRequest, SessionStore,
    StoredSession,
};
use crate::identity::{DelegatedIdentity, Identity, Principal, SessionKey};

const EVENT_BUFFER: usize = 32;

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Uninitialized,
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Published once per completed transition, after the channel was rebound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub state: AuthState,
    pub authenticated: bool,
    pub principal: Principal,
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Identity provider base URL
    pub identity_provider: Url,

    /// Maximum lifetime requested for the delegation
    pub max_time_to_live: Duration,

    /// Alternative origin to derive the principal for
    pub derivation_origin: Option<String>,
}

impl SessionManagerConfig {
    pub fn new(identity_provider: Url, max_time_to_live: Duration) -> Self {
        Self {
            identity_provider,
            max_time_to_live,
            derivation_origin: None,
        }
    }
}

struct Snapshot {
    state: AuthState,
    identity: Arc<Identity>,
    deferred_logouts: Vec<oneshot::Sender<()>>,
}

/// Central session manager
pub struct SessionManager {
    config: SessionManagerConfig,
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn IdentityProviderGateway>,
    binder: ChannelBinder,
    snapshot: Mutex<Snapshot>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn IdentityProviderGateway>,
        binder: ChannelBinder,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config,
            store,
            gateway,
            binder,
            snapshot: Mutex::new(Snapshot {
                state: AuthState::Uninitialized,
                identity: Arc::new(Identity::Anonymous),
                deferred_logouts: Vec::new(),
            }),
            events,
        }
    }

    /// Resume a stored session, or start anonymously
    ///
    /// Only the first call does any work. Store failures and expired sessions
    /// fall back to the anonymous identity; only a binding failure is returned.
    pub async fn initialize(&self) -> Result<AuthState, AuthError> {
        {
            let snapshot = self.lock();
            if snapshot.state != AuthState::Uninitialized {
                debug!("Session manager already initialized");
                return Ok(snapshot.state);
            }
        }

        let restored = self.restore_session().await;

        let mut snapshot = self.lock();
        if snapshot.state != AuthState::Uninitialized {
            return Ok(snapshot.state);
        }

        let (state, identity) = match restored {
            Some(identity) => (
                AuthState::Authenticated,
                Arc::new(Identity::Delegated(identity)),
            ),
            None => (AuthState::Anonymous, Arc::new(Identity::Anonymous)),
        };

        self.transition(&mut snapshot, state, identity)?;
        Ok(state)
    }

    /// Run an interactive login with the configured identity provider
    ///
    /// Suspends until the provider resolves. On failure the session is left
    /// exactly as it was before the call.
    pub async fn login(&self) -> Result<Arc<Identity>, AuthError> {
        self.login_at(self.config.identity_provider.clone()).await
    }

    /// Same as [`login`](Self::login), against an explicit provider URL
    pub async fn login_at(&self, identity_provider: Url) -> Result<Arc<Identity>, AuthError> {
        let previous = {
            let mut snapshot = self.lock();
            match snapshot.state {
                AuthState::Uninitialized => return Err(AuthError::NotInitialized),
                AuthState::Authenticating => {
                    warn!("Rejecting login, another attempt is in flight");
                    return Err(AuthError::LoginAlreadyInFlight);
                }
                AuthState::Authenticated => return Err(AuthError::AlreadyAuthenticated),
                AuthState::Anonymous => {}
            }

            let previous = snapshot.state;
            snapshot.state = AuthState::Authenticating;
            self.publish(&snapshot);
            previous
        };

        let mut attempt = LoginAttempt {
            manager: self,
            previous,
            session_saved: false,
            settled: false,
        };

        let session_key = SessionKey::generate();
        let session_public_key = session_key.public_key_der();
        let request = LoginRequest {
            id: uuid::Uuid::new_v4(),
            identity_provider,
            max_time_to_live: self.config.max_time_to_live,
            session_public_key: session_public_key.clone(),
            derivation_origin: self.config.derivation_origin.clone(),
        };
        info!(attempt = %request.id, "Starting login with {}", request.identity_provider);

        let approved = self
            .gateway
            .authorize(request)
            .await
            .into_result()
            .and_then(|chain| {
                chain
                    .validate_for(&session_public_key, Utc::now())
                    .map_err(|e| LoginFailure::InvalidDelegation(e.to_string()))?;
                Ok(DelegatedIdentity::new(session_key, chain))
            });

        let result = match approved {
            Ok(identity) => self.complete_login(&mut attempt, identity).await,
            Err(reason) => Err(AuthError::LoginRejected(reason)),
        };

        let deferred = attempt.settle();
        self.run_deferred_logouts(deferred).await;

        result
    }

    /// Drop the session and fall back to the anonymous identity
    ///
    /// While a login is in flight the logout is queued behind it and this
    /// call waits until it has run.
    pub async fn logout(&self) {
        let queued = {
            let mut snapshot = self.lock();
            if snapshot.state == AuthState::Authenticating {
                let (done_tx, done_rx) = oneshot::channel();
                snapshot.deferred_logouts.push(done_tx);
                info!("Login in progress, logout queued");
                Some(done_rx)
            } else {
                None
            }
        };

        if let Some(done) = queued {
            if done.await.is_ok() {
                return;
            }
        }

        self.logout_now().await;
    }

    /// Identity the request channel currently signs with
    pub fn current_identity(&self) -> Arc<Identity> {
        Arc::clone(&self.lock().identity)
    }

    pub fn principal(&self) -> Principal {
        self.lock().identity.principal()
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().state == AuthState::Authenticated
    }

    /// Subscribe to state transitions
    ///
    /// Each transition is sent once. Only the last 32 events are buffered; a
    /// receiver that falls further behind gets `RecvError::Lagged` and should
    /// re-read `state()` rather than expect the missed events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, snapshot: &Snapshot) {
        let event = AuthEvent {
            state: snapshot.state,
            authenticated: snapshot.state == AuthState::Authenticated,
            principal: snapshot.identity.principal(),
        };
        info!(
            state = ?event.state,
            principal = %event.principal,
            "Session state changed"
        );
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Rebind, then update and publish
    fn transition(
        &self,
        snapshot: &mut Snapshot,
        state: AuthState,
        identity: Arc<Identity>,
    ) -> Result<(), AuthError> {
        self.binder.bind(Arc::clone(&identity))?;
        snapshot.identity = identity;
        snapshot.state = state;
        self.publish(snapshot);
        Ok(())
    }

    async fn restore_session(&self) -> Option<DelegatedIdentity> {
        let stored = match self.store.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No stored session");
                return None;
            }
            Err(e) => {
                warn!("Failed to load stored session, continuing anonymously: {}", e);
                return None;
            }
        };

        let identity = match stored.into_identity() {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Discarding unreadable stored session: {}", e);
                self.clear_store().await;
                return None;
            }
        };

        let session_public_key = identity.session_key().public_key_der();
        if let Err(e) = identity.chain().validate_for(&session_public_key, Utc::now()) {
            info!("Discarding stored session: {}", e);
            self.clear_store().await;
            return None;
        }

        Some(identity)
    }

    async fn complete_login(
        &self,
        attempt: &mut LoginAttempt<'_>,
        identity: DelegatedIdentity,
    ) -> Result<Arc<Identity>, AuthError> {
        // Set before awaiting: a save dropped mid-flight may already have written
        attempt.session_saved = true;
        if let Err(e) = self.store.save(StoredSession::from_identity(&identity)).await {
            warn!("Failed to persist session, it will not be resumed: {}", e);
            attempt.session_saved = false;
        }

        let identity = Arc::new(Identity::Delegated(identity));
        let bound = {
            let mut snapshot = self.lock();
            self.transition(&mut snapshot, AuthState::Authenticated, Arc::clone(&identity))
        };

        if let Err(e) = bound {
            error!("Login approved but identity could not be bound: {}", e);
            if attempt.session_saved {
                self.clear_store().await;
                attempt.session_saved = false;
            }
            return Err(e);
        }

        attempt.session_saved = false;
        Ok(identity)
    }

    async fn run_deferred_logouts(&self, deferred: Vec<oneshot::Sender<()>>) {
        if deferred.is_empty() {
            return;
        }

        debug!("Running {} queued logout(s)", deferred.len());
        self.logout_now().await;
        for done in deferred {
            let _ = done.send(());
        }
    }

    async fn logout_now(&self) {
        if self.is_logged_out() {
            debug!("Already logged out");
            return;
        }

        self.clear_store().await;

        let mut snapshot = self.lock();
        if snapshot.state == AuthState::Anonymous && snapshot.identity.is_anonymous() {
            return;
        }

        let anonymous = Arc::new(Identity::Anonymous);
        if let Err(e) = self.binder.bind(Arc::clone(&anonymous)) {
            error!("Failed to rebind request channel on logout: {}", e);
        }
        snapshot.identity = anonymous;
        snapshot.state = AuthState::Anonymous;
        self.publish(&snapshot);
    }

    fn is_logged_out(&self) -> bool {
        let snapshot = self.lock();
        snapshot.state == AuthState::Anonymous && snapshot.identity.is_anonymous()
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear session store: {}", e);
        }
    }
}

/// The `Authenticating` hold on the session for one login call
///
/// Dropping an unsettled attempt (the login future was cancelled) rolls the
/// state back and releases queued logouts to run on their own.
struct LoginAttempt<'a> {
    manager: &'a SessionManager,
    previous: AuthState,
    session_saved: bool,
    settled: bool,
}

impl LoginAttempt<'_> {
    /// Leave `Authenticating`, returning the logouts queued meanwhile
    fn settle(&mut self) -> Vec<oneshot::Sender<()>> {
        self.settled = true;

        let mut snapshot = self.manager.lock();
        if snapshot.state == AuthState::Authenticating {
            snapshot.state = self.previous;
            self.manager.publish(&snapshot);
        }
        std::mem::take(&mut snapshot.deferred_logouts)
    }
}

impl Drop for LoginAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        warn!("Login abandoned before the provider resolved, rolling back");
        drop(self.settle());

        if self.session_saved {
            let store = Arc::clone(&self.manager.store);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = store.clear().await {
                        warn!("Failed to clear session of abandoned login: {}", e);
                    }
                });
            }
        }
    }
}
