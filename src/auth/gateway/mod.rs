/// Identity Provider Gateway
///
/// A single interactive authorization exchange with an external identity
/// provider. The provider UI is not owned by this crate; the gateway only
/// guarantees that each request resolves exactly once, either with a
/// delegation chain or with a failure reason.
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::auth::error::LoginFailure;
use crate::identity::DelegationChain;

pub mod messages;
pub mod popup;

pub use messages::{ClientMessage, ProviderMessage};
pub use popup::{AuthWindow, PostMessageGateway, ProviderEndpoint, WindowOpener};

/// Parameters of one login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Attempt id, for log correlation
    pub id: uuid::Uuid,

    /// Base URL of the identity provider
    pub identity_provider: Url,

    /// Longest lifetime the provider may grant the delegation
    pub max_time_to_live: Duration,

    /// DER-encoded public key of the session key to delegate to
    pub session_public_key: Vec<u8>,

    /// Origin the provider should derive the principal for, if not the caller's
    pub derivation_origin: Option<String>,
}

/// Result of one authorization exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Approved(DelegationChain),
    Failed(LoginFailure),
}

impl LoginOutcome {
    pub fn into_result(self) -> Result<DelegationChain, LoginFailure> {
        match self {
            LoginOutcome::Approved(chain) => Ok(chain),
            LoginOutcome::Failed(reason) => Err(reason),
        }
    }
}

/// External identity provider
///
/// Implementations must resolve every call exactly once. A flow abandoned by
/// the user resolves as [`LoginFailure::UserInterrupt`].
#[async_trait]
pub trait IdentityProviderGateway: Send + Sync {
    async fn authorize(&self, request: LoginRequest) -> LoginOutcome;
}
