#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use identity_session::auth::{
    ChannelBinder, IdentityProviderGateway, LoginFailure, LoginOutcome, LoginRequest,
    MemorySessionStore, RequestChannel, SessionManager, SessionManagerConfig, SessionStore,
    StoreError, StoredSession,
};
use identity_session::identity::{DelegatedIdentity, DelegationChain, Identity, SessionKey};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, oneshot};
use url::Url;

/// Key of the user the scripted provider logs in
pub fn user_key() -> SessionKey {
    SessionKey::from_seed([1u8; 32])
}

pub fn delegation_to(session_public_key: Vec<u8>, ttl: Duration) -> DelegationChain {
    DelegationChain::issue(&user_key(), session_public_key, Utc::now() + ttl, None).unwrap()
}

/// A stored session for `user_key`, expiring after `ttl` (may be negative)
pub fn stored_session(ttl: Duration) -> StoredSession {
    let session = SessionKey::generate();
    let chain = delegation_to(session.public_key_der(), ttl);
    StoredSession::from_identity(&DelegatedIdentity::new(session, chain))
}

/// Records every identity bound to it
#[derive(Default)]
pub struct RecordingChannel {
    bound: Mutex<Vec<Arc<Identity>>>,
}

impl RequestChannel for RecordingChannel {
    fn replace_identity(&self, identity: Arc<Identity>) {
        self.bound.lock().unwrap().push(identity);
    }
}

impl RecordingChannel {
    pub fn last(&self) -> Option<Arc<Identity>> {
        self.bound.lock().unwrap().last().cloned()
    }

    pub fn bind_count(&self) -> usize {
        self.bound.lock().unwrap().len()
    }
}

/// What the scripted provider does with the next request
pub enum Script {
    Approve,
    ApproveExpired,
    ApproveForOtherKey,
    Reject(String),
    Cancel,
    /// Signal `entered`, then act on whatever `release` delivers; a dropped
    /// release sender behaves like the user closing the window
    Hold {
        entered: oneshot::Sender<()>,
        release: oneshot::Receiver<Script>,
    },
}

#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    providers: Mutex<Vec<Url>>,
}

impl ScriptedGateway {
    pub fn with(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Provider URL of the most recent request
    pub fn last_provider(&self) -> Option<Url> {
        self.providers.lock().unwrap().last().cloned()
    }

    /// Queue a held request; returns (entered, release)
    pub fn hold(&self) -> (oneshot::Receiver<()>, oneshot::Sender<Script>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.push(Script::Hold {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    fn resolve(script: Script, request: &LoginRequest) -> LoginOutcome {
        match script {
            Script::Approve => {
                LoginOutcome::Approved(delegation_to(request.session_public_key.clone(), Duration::hours(1)))
            }
            Script::ApproveExpired => LoginOutcome::Approved(delegation_to(
                request.session_public_key.clone(),
                Duration::minutes(-1),
            )),
            Script::ApproveForOtherKey => LoginOutcome::Approved(delegation_to(
                SessionKey::generate().public_key_der(),
                Duration::hours(1),
            )),
            Script::Reject(text) => LoginOutcome::Failed(LoginFailure::Rejected(text)),
            Script::Cancel => LoginOutcome::Failed(LoginFailure::UserInterrupt),
            Script::Hold { .. } => LoginOutcome::Failed(LoginFailure::Rejected(
                "nested hold".to_string(),
            )),
        }
    }
}

#[async_trait]
impl IdentityProviderGateway for ScriptedGateway {
    async fn authorize(&self, request: LoginRequest) -> LoginOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.providers
            .lock()
            .unwrap()
            .push(request.identity_provider.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Cancel);

        match script {
            Script::Hold { entered, release } => {
                let _ = entered.send(());
                match release.await {
                    Ok(script) => Self::resolve(script, &request),
                    Err(_) => LoginOutcome::Failed(LoginFailure::UserInterrupt),
                }
            }
            script => Self::resolve(script, &request),
        }
    }
}

/// Memory store counting operations, optionally failing loads
#[derive(Default)]
pub struct CountingStore {
    inner: MemorySessionStore,
    fail_load: bool,
    /// When set, `save` writes, notifies, then never returns
    stall_save: Option<Arc<Notify>>,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
    pub clears: AtomicUsize,
}

impl CountingStore {
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            inner: MemorySessionStore::with_session(session),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_load: true,
            ..Default::default()
        }
    }

    /// Store whose `save` hangs after writing; the notify fires once written
    pub fn stalling_save() -> (Self, Arc<Notify>) {
        let written = Arc::new(Notify::new());
        let store = Self {
            stall_save: Some(written.clone()),
            ..Default::default()
        };
        (store, written)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub async fn stored(&self) -> Option<StoredSession> {
        self.inner.load().await.unwrap()
    }
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(StoreError::Unavailable(std::io::Error::other(
                "storage disabled",
            )));
        }
        self.inner.load().await
    }

    async fn save(&self, session: StoredSession) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(session).await?;
        if let Some(written) = &self.stall_save {
            written.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear().await
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub store: Arc<CountingStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub channel: Arc<RecordingChannel>,
    /// Shares its channel slot with the manager's binder
    pub binder: ChannelBinder,
}

impl Harness {
    pub fn new(store: CountingStore, gateway: ScriptedGateway) -> Self {
        let store = Arc::new(store);
        let gateway = Arc::new(gateway);
        let channel = Arc::new(RecordingChannel::default());
        let config = SessionManagerConfig::new(
            Url::parse("https://provider.example").unwrap(),
            std::time::Duration::from_secs(86400),
        );
        let binder = ChannelBinder::new(channel.clone());
        let manager = Arc::new(SessionManager::new(
            config,
            store.clone(),
            gateway.clone(),
            binder.clone(),
        ));

        Self {
            manager,
            store,
            gateway,
            channel,
            binder,
        }
    }

    /// Channel and manager agree on the active identity
    pub fn assert_in_sync(&self) {
        assert_eq!(
            self.channel.last(),
            Some(self.manager.current_identity()),
            "request channel is bound to a stale identity"
        );
    }
}
