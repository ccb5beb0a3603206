use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{IdentityError, Principal, SessionKey, encoding};

const DELEGATION_DOMAIN: &[u8] = b"\x1Aic-request-auth-delegation";

/// Grant from one key to another, valid until `expiration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    /// DER-encoded public key the authority is delegated to
    #[serde(with = "encoding")]
    pub pubkey: Vec<u8>,

    /// Expiration in nanoseconds since the Unix epoch
    pub expiration: u64,

    /// Canister ids the delegation is restricted to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

impl Delegation {
    /// Bytes the issuer signs
    pub fn signable_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        let content = serde_json::to_vec(self)?;
        let mut message = DELEGATION_DOMAIN.to_vec();
        message.extend_from_slice(&Sha256::digest(&content));
        Ok(message)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(i64::try_from(self.expiration).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDelegation {
    pub delegation: Delegation,
    #[serde(with = "encoding")]
    pub signature: Vec<u8>,
}

/// Chain of delegations rooted at the user's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationChain {
    /// DER-encoded public key of the delegating user
    #[serde(with = "encoding")]
    pub public_key: Vec<u8>,
    pub delegations: Vec<SignedDelegation>,
}

impl DelegationChain {
    /// Issue a single-link chain from `issuer` to `target_public_key`
    pub fn issue(
        issuer: &SessionKey,
        target_public_key: Vec<u8>,
        expires_at: DateTime<Utc>,
        targets: Option<Vec<String>>,
    ) -> Result<Self, IdentityError> {
        let expiration = expires_at
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                IdentityError::InvalidDelegation("expiration out of range".to_string())
            })?;

        let delegation = Delegation {
            pubkey: target_public_key,
            expiration,
            targets,
        };
        let signature = issuer.sign(&delegation.signable_bytes()?);

        Ok(Self {
            public_key: issuer.public_key_der(),
            delegations: vec![SignedDelegation {
                delegation,
                signature,
            }],
        })
    }

    /// Principal the chain acts on behalf of
    pub fn principal(&self) -> Principal {
        Principal::self_authenticating(&self.public_key)
    }

    /// Earliest expiration across the chain
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.delegations
            .iter()
            .map(|signed| signed.delegation.expires_at())
            .min()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration() {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }

    /// Check that the chain ends at `session_public_key` and is still valid
    pub fn validate_for(
        &self,
        session_public_key: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        let last = self.delegations.last().ok_or_else(|| {
            IdentityError::InvalidDelegation("delegation chain is empty".to_string())
        })?;

        if last.delegation.pubkey != session_public_key {
            return Err(IdentityError::InvalidDelegation(
                "delegation does not target the session key".to_string(),
            ));
        }

        if self.is_expired_at(now) {
            return Err(IdentityError::InvalidDelegation(
                "delegation chain has expired".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::session_key::verify_signature;
    use chrono::Duration;

    fn chain_for(session: &SessionKey, ttl: Duration) -> (SessionKey, DelegationChain) {
        let user = SessionKey::generate();
        let chain =
            DelegationChain::issue(&user, session.public_key_der(), Utc::now() + ttl, None)
                .unwrap();
        (user, chain)
    }

    #[test]
    fn test_issued_chain_is_valid() {
        let session = SessionKey::generate();
        let (user, chain) = chain_for(&session, Duration::hours(8));

        assert!(chain.validate_for(&session.public_key_der(), Utc::now()).is_ok());
        assert_eq!(chain.principal(), Principal::self_authenticating(&user.public_key_der()));

        let signed = &chain.delegations[0];
        let message = signed.delegation.signable_bytes().unwrap();
        assert!(verify_signature(&chain.public_key, &message, &signed.signature).is_ok());
    }

    #[test]
    fn test_chain_for_other_key_rejected() {
        let session = SessionKey::generate();
        let (_, chain) = chain_for(&session, Duration::hours(8));
        let other = SessionKey::generate();

        let result = chain.validate_for(&other.public_key_der(), Utc::now());
        assert!(matches!(result, Err(IdentityError::InvalidDelegation(_))));
    }

    #[test]
    fn test_expired_chain() {
        let session = SessionKey::generate();
        let (_, chain) = chain_for(&session, Duration::minutes(5));

        assert!(!chain.is_expired_at(Utc::now()));
        assert!(chain.is_expired_at(Utc::now() + Duration::minutes(10)));
        assert!(
            chain
                .validate_for(&session.public_key_der(), Utc::now() + Duration::hours(1))
                .is_err()
        );
    }

    #[test]
    fn test_empty_chain_never_valid() {
        let chain = DelegationChain {
            public_key: vec![1, 2, 3],
            delegations: Vec::new(),
        };
        assert!(chain.expiration().is_none());
        assert!(chain.is_expired_at(Utc::now()));
        assert!(chain.validate_for(&[1], Utc::now()).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let session = SessionKey::from_seed([1u8; 32]);
        let (_, chain) = chain_for(&session, Duration::hours(1));
        let json = serde_json::to_value(&chain).unwrap();

        assert!(json.get("publicKey").is_some());
        assert!(json["delegations"][0]["delegation"].get("pubkey").is_some());
        assert!(json["delegations"][0]["delegation"].get("targets").is_none());
    }
}
