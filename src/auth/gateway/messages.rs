// Wire messages of the post-message authorize protocol

use serde::{Deserialize, Serialize};

use crate::identity::{DelegationChain, SignedDelegation, encoding};

/// Messages sent by the identity provider window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderMessage {
    AuthorizeReady,

    #[serde(rename_all = "camelCase")]
    AuthorizeClientSuccess {
        delegations: Vec<SignedDelegation>,
        #[serde(with = "encoding")]
        user_public_key: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authn_method: Option<String>,
    },

    AuthorizeClientFailure { text: String },
}

impl ProviderMessage {
    /// Delegation chain carried by a success message
    pub fn delegation_chain(&self) -> Option<DelegationChain> {
        match self {
            ProviderMessage::AuthorizeClientSuccess {
                delegations,
                user_public_key,
                ..
            } => Some(DelegationChain {
                public_key: user_public_key.clone(),
                delegations: delegations.clone(),
            }),
            _ => None,
        }
    }
}

/// Messages sent to the identity provider window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    AuthorizeClient {
        #[serde(with = "encoding")]
        session_public_key: Vec<u8>,

        /// Nanoseconds
        max_time_to_live: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        derivation_origin: Option<String>,
    },
}
