use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::fmt;

use super::encoding;

const SELF_AUTHENTICATING_TAG: u8 = 0x02;
const ANONYMOUS_TAG: u8 = 0x04;

/// Opaque identifier of the party a request is sent on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(#[serde(with = "encoding")] Vec<u8>);

impl Principal {
    /// The principal of unsigned requests
    pub fn anonymous() -> Self {
        Self(vec![ANONYMOUS_TAG])
    }

    /// Principal derived from a DER-encoded public key
    pub fn self_authenticating(der_public_key: &[u8]) -> Self {
        let mut bytes = Sha224::digest(der_public_key).to_vec();
        bytes.push(SELF_AUTHENTICATING_TAG);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == [ANONYMOUS_TAG]
    }

    /// Textual form: crc32-prefixed base32, grouped by five characters
    pub fn to_text(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.0);
        let checksum = hasher.finalize();

        let mut payload = Vec::with_capacity(self.0.len() + 4);
        payload.extend_from_slice(&checksum.to_be_bytes());
        payload.extend_from_slice(&self.0);

        let encoded = encoding::base32_lower(&payload);
        encoded
            .as_bytes()
            .chunks(5)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
