// Post-message authorize flow
// Drives the identity provider through an out-of-band window

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::messages::{ClientMessage, ProviderMessage};
use super::{IdentityProviderGateway, LoginOutcome, LoginRequest};
use crate::auth::error::LoginFailure;

const WINDOW_BUFFER: usize = 8;
const AUTHORIZE_FRAGMENT: &str = "authorize";

/// Client side of an open provider window
///
/// Dropping the provider side closes `inbound`, which the gateway treats as
/// the user closing the window.
pub struct AuthWindow {
    pub inbound: mpsc::Receiver<Value>,
    pub outbound: mpsc::Sender<ClientMessage>,
}

/// Provider side of an open window
pub struct ProviderEndpoint {
    pub to_client: mpsc::Sender<Value>,
    pub from_client: mpsc::Receiver<ClientMessage>,
}

impl ProviderEndpoint {
    /// Post a provider message to the client
    pub async fn post(&self, message: &ProviderMessage) -> bool {
        match serde_json::to_value(message) {
            Ok(value) => self.to_client.send(value).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Wait for the next client message, `None` once the client went away
    pub async fn next_request(&mut self) -> Option<ClientMessage> {
        self.from_client.recv().await
    }
}

impl AuthWindow {
    /// Connected window/endpoint pair
    pub fn pair() -> (AuthWindow, ProviderEndpoint) {
        let (to_client, inbound) = mpsc::channel(WINDOW_BUFFER);
        let (outbound, from_client) = mpsc::channel(WINDOW_BUFFER);
        (
            AuthWindow { inbound, outbound },
            ProviderEndpoint {
                to_client,
                from_client,
            },
        )
    }
}

/// Opens the provider UI (popup, browser tab, terminal prompt)
#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open(&self, url: Url) -> Result<AuthWindow, LoginFailure>;
}

/// Gateway speaking the `authorize-ready` / `authorize-client` protocol
pub struct PostMessageGateway<O> {
    opener: O,
}

impl<O: WindowOpener> PostMessageGateway<O> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }

    /// URL the window is opened at
    pub fn authorize_url(identity_provider: &Url) -> Url {
        let mut url = identity_provider.clone();
        url.set_fragment(Some(AUTHORIZE_FRAGMENT));
        url
    }

    async fn run(&self, request: LoginRequest) -> Result<ProviderMessage, LoginFailure> {
        let url = Self::authorize_url(&request.identity_provider);
        debug!(attempt = %request.id, "Opening identity provider window at {}", url);

        let mut window = self.opener.open(url).await?;
        let max_time_to_live = u64::try_from(request.max_time_to_live.as_nanos()).unwrap_or(u64::MAX);

        while let Some(raw) = window.inbound.recv().await {
            let message = match serde_json::from_value::<ProviderMessage>(raw) {
                Ok(message) => message,
                Err(e) => {
                    debug!(attempt = %request.id, "Ignoring unrelated window message: {}", e);
                    continue;
                }
            };

            match message {
                ProviderMessage::AuthorizeReady => {
                    let authorize = ClientMessage::AuthorizeClient {
                        session_public_key: request.session_public_key.clone(),
                        max_time_to_live,
                        derivation_origin: request.derivation_origin.clone(),
                    };
                    if window.outbound.send(authorize).await.is_err() {
                        return Err(LoginFailure::UserInterrupt);
                    }
                }
                result => return Ok(result),
            }
        }

        Err(LoginFailure::UserInterrupt)
    }
}

#[async_trait]
impl<O: WindowOpener> IdentityProviderGateway for PostMessageGateway<O> {
    async fn authorize(&self, request: LoginRequest) -> LoginOutcome {
        let attempt = request.id;

        let message = match self.run(request).await {
            Ok(message) => message,
            Err(reason) => {
                warn!(attempt = %attempt, "Authorization did not complete: {}", reason);
                return LoginOutcome::Failed(reason);
            }
        };

        match message {
            ProviderMessage::AuthorizeClientFailure { text } => {
                warn!(attempt = %attempt, "Identity provider reported failure: {}", text);
                LoginOutcome::Failed(LoginFailure::Rejected(text))
            }
            success => match success.delegation_chain() {
                Some(chain) => {
                    info!(attempt = %attempt, "Identity provider approved login");
                    LoginOutcome::Approved(chain)
                }
                None => LoginOutcome::Failed(LoginFailure::Rejected(
                    "unexpected provider response".to_string(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_fragment() {
        let provider = Url::parse("https://identity.ic0.app").unwrap();
        assert_eq!(
            PostMessageGateway::<NeverOpens>::authorize_url(&provider).as_str(),
            "https://identity.ic0.app/#authorize"
        );

        let provider = Url::parse("http://localhost:4943/?canisterId=abc#stale").unwrap();
        assert_eq!(
            PostMessageGateway::<NeverOpens>::authorize_url(&provider).as_str(),
            "http://localhost:4943/?canisterId=abc#authorize"
        );
    }

    struct NeverOpens;

    #[async_trait]
    impl WindowOpener for NeverOpens {
        async fn open(&self, _url: Url) -> Result<AuthWindow, LoginFailure> {
            Err(LoginFailure::WindowUnavailable("popup blocked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let gateway = PostMessageGateway::new(NeverOpens);
        let outcome = gateway
            .authorize(LoginRequest {
                id: uuid::Uuid::new_v4(),
                identity_provider: Url::parse("https://identity.ic0.app").unwrap(),
                max_time_to_live: std::time::Duration::from_secs(60),
                session_public_key: vec![1],
                derivation_origin: None,
            })
            .await;

        assert_eq!(
            outcome,
            LoginOutcome::Failed(LoginFailure::WindowUnavailable("popup blocked".to_string()))
        );
    }
}
