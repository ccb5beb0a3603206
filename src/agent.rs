/// Outbound request channel
///
/// HTTP agent that signs every call and query envelope with the identity
/// currently bound by the session manager. Envelopes travel as JSON and the
/// request id is the SHA-256 of the JSON content, so the peer is a JSON
/// envelope gateway, not a replica's CBOR endpoint.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::auth::RequestChannel;
use crate::identity::{Identity, Principal, SignedDelegation, encoding};

const REQUEST_DOMAIN: &[u8] = b"\x0Aic-request";
/// Path prefix of the JSON envelope API, followed by `<canister>/<call|query>`
const ENVELOPE_API_PREFIX: &str = "json/v1/canister";
const DEFAULT_INGRESS_EXPIRY: Duration = Duration::from_secs(4 * 60);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Replica request timed out")]
    Timeout,

    #[error("Replica returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid replica URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout
        } else {
            AgentError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Call,
    Query,
}

impl RequestType {
    fn endpoint(self) -> &'static str {
        match self {
            RequestType::Call => "call",
            RequestType::Query => "query",
        }
    }
}

/// Signed part of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContent {
    pub request_type: RequestType,
    pub canister_id: String,
    pub method_name: String,
    #[serde(with = "encoding")]
    pub arg: Vec<u8>,
    #[serde(with = "encoding")]
    pub sender: Vec<u8>,
    /// Nanoseconds since the Unix epoch
    pub ingress_expiry: u64,
    pub nonce: String,
}

impl RequestContent {
    pub fn request_id(&self) -> Result<[u8; 32], AgentError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(Sha256::digest(&bytes).into())
    }

    /// Bytes the sender signs
    pub fn signable_bytes(&self) -> Result<Vec<u8>, AgentError> {
        let mut message = REQUEST_DOMAIN.to_vec();
        message.extend_from_slice(&self.request_id()?);
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub content: RequestContent,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "encoding::option")]
    pub sender_pubkey: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "encoding::option")]
    pub sender_sig: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_delegation: Option<Vec<SignedDelegation>>,
}

pub struct HttpAgent {
    client: reqwest::Client,
    replica_url: Url,
    ingress_expiry: Duration,
    identity: RwLock<Arc<Identity>>,
}

impl HttpAgent {
    /// Agent signing anonymously until an identity is bound
    pub fn new(replica_url: Url, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            replica_url,
            ingress_expiry: DEFAULT_INGRESS_EXPIRY,
            identity: RwLock::new(Arc::new(Identity::Anonymous)),
        })
    }

    pub fn replica_url(&self) -> &Url {
        &self.replica_url
    }

    /// Identity requests are currently signed with
    pub fn identity(&self) -> Arc<Identity> {
        Arc::clone(
            &self
                .identity
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Build a signed envelope
    ///
    /// The identity is read once so a concurrent rebind cannot mix two
    /// identities into one request.
    pub fn sign(
        &self,
        request_type: RequestType,
        canister_id: &str,
        method_name: &str,
        arg: &Value,
    ) -> Result<Envelope, AgentError> {
        let identity = self.identity();
        let expiry = Utc::now()
            + chrono::Duration::from_std(self.ingress_expiry)
                .unwrap_or_else(|_| chrono::Duration::minutes(4));

        let content = RequestContent {
            request_type,
            canister_id: canister_id.to_string(),
            method_name: method_name.to_string(),
            arg: serde_json::to_vec(arg)?,
            sender: identity.principal().as_slice().to_vec(),
            ingress_expiry: expiry
                .timestamp_nanos_opt()
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(u64::MAX),
            nonce: uuid::Uuid::new_v4().to_string(),
        };

        let signature = identity.sign(&content.signable_bytes()?);
        Ok(Envelope {
            content,
            sender_pubkey: signature.as_ref().map(|s| s.public_key.clone()),
            sender_sig: signature.as_ref().map(|s| s.signature.clone()),
            sender_delegation: signature.map(|s| s.delegations),
        })
    }

    /// Update call
    pub async fn call(
        &self,
        canister_id: &str,
        method_name: &str,
        arg: &Value,
    ) -> Result<Value, AgentError> {
        self.submit(RequestType::Call, canister_id, method_name, arg)
            .await
    }

    /// Read-only query
    pub async fn query(
        &self,
        canister_id: &str,
        method_name: &str,
        arg: &Value,
    ) -> Result<Value, AgentError> {
        self.submit(RequestType::Query, canister_id, method_name, arg)
            .await
    }

    async fn submit(
        &self,
        request_type: RequestType,
        canister_id: &str,
        method_name: &str,
        arg: &Value,
    ) -> Result<Value, AgentError> {
        let envelope = self.sign(request_type, canister_id, method_name, arg)?;
        let url = self.replica_url.join(&format!(
            "{}/{}/{}",
            ENVELOPE_API_PREFIX,
            canister_id,
            request_type.endpoint()
        ))?;

        debug!(
            sender = %Principal::from_slice(&envelope.content.sender),
            "Sending {} {} to {}",
            request_type.endpoint(),
            method_name,
            url
        );

        let response = self.client.post(url).json(&envelope).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl RequestChannel for HttpAgent {
    fn replace_identity(&self, identity: Arc<Identity>) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity;
    }
}
