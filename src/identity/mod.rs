// Identity primitives
// Principals, session keys, delegation chains and the identity the request
// channel signs with

pub mod delegation;
pub mod encoding;
pub mod principal;
pub mod session_key;

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

pub use delegation::{Delegation, DelegationChain, SignedDelegation};
pub use principal::Principal;
pub use session_key::SessionKey;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid delegation: {0}")]
    InvalidDelegation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Material attached to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub delegations: Vec<SignedDelegation>,
}

/// Session key plus the delegation chain that authorizes it
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedIdentity {
    session_key: SessionKey,
    chain: DelegationChain,
}

impl DelegatedIdentity {
    pub fn new(session_key: SessionKey, chain: DelegationChain) -> Self {
        Self { session_key, chain }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    pub fn chain(&self) -> &DelegationChain {
        &self.chain
    }
}

/// The identity requests are signed with
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Delegated(DelegatedIdentity),
}

impl Identity {
    pub fn principal(&self) -> Principal {
        match self {
            Identity::Anonymous => Principal::anonymous(),
            Identity::Delegated(delegated) => delegated.chain.principal(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        match self {
            Identity::Anonymous => None,
            Identity::Delegated(delegated) => delegated.chain.expiration(),
        }
    }

    /// Sign `message`; anonymous requests go out unsigned
    pub fn sign(&self, message: &[u8]) -> Option<RequestSignature> {
        match self {
            Identity::Anonymous => None,
            Identity::Delegated(delegated) => Some(RequestSignature {
                public_key: delegated.chain.public_key.clone(),
                signature: delegated.session_key.sign(message),
                delegations: delegated.chain.delegations.clone(),
            }),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("Identity::Anonymous"),
            Identity::Delegated(delegated) => f
                .debug_struct("Identity::Delegated")
                .field("principal", &delegated.chain.principal().to_text())
                .field("expiration", &delegated.chain.expiration())
                .finish(),
        }
    }
}
