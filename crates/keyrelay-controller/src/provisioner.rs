//! Provisioner oracle: decides which key requests the controller re-signs.
//!
//! The controller never interprets request payloads. It hands each request
//! to a [`Provisioner`] and republishes whatever comes back; an empty
//! [`Reencrypted`] means "reject or ignore".
//!
//! # Allowlist request format
//!
//! [`AllowlistProvisioner`] accepts requests whose value is signed by a
//! known provisioner key:
//!
//! ```text
//! value   = signer_pk (32) || signature (64) || body
//! message = u32be(len resource) || resource || u32be(len key) || key || body
//! ```
//!
//! An accepted request keeps its key and gets a new value of the same shape,
//! signed by the controller: `controller_pk || sign_spk(message) || body`.

use std::{
    collections::BTreeSet,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use ed25519_dalek::{Signature, VerifyingKey};
use keyrelay_crypto::{CryptoKey, SIGNATURE_SIZE, VERIFYING_KEY_SIZE};

use crate::error::ProvisionerError;

/// Provisioner answer for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reencrypted {
    /// Key to republish
    pub key: Option<Bytes>,
    /// Value to republish
    pub value: Option<Bytes>,
}

impl Reencrypted {
    /// Reject or ignore the request.
    pub fn rejected() -> Self {
        Self::default()
    }

    /// True if nothing should be republished.
    pub fn is_rejected(&self) -> bool {
        self.key.is_none() && self.value.is_none()
    }
}

/// Validates and re-authorizes key requests.
pub trait Provisioner: Send + Sync {
    /// Re-authorize a request on `resource`, or reject it.
    ///
    /// Must be safe to repeat: after a crash the same request may be handed
    /// over again.
    fn reencrypt_request(
        &self,
        resource: &str,
        cryptokey: &dyn CryptoKey,
        msg_key: Option<&[u8]>,
        msg_value: Option<&[u8]>,
    ) -> Reencrypted;
}

/// Where a controller's [`Provisioner`] comes from.
#[derive(Clone)]
pub enum ProvisionerSource {
    /// Allowlist file, loaded as an [`AllowlistProvisioner`].
    File(PathBuf),
    /// Already-constructed provisioner.
    Object(Arc<dyn Provisioner>),
}

impl ProvisionerSource {
    /// Load or hand back the provisioner.
    pub fn resolve(&self) -> Result<Arc<dyn Provisioner>, ProvisionerError> {
        match self {
            Self::File(path) => Ok(Arc::new(AllowlistProvisioner::load(path)?)),
            Self::Object(provisioner) => Ok(Arc::clone(provisioner)),
        }
    }
}

impl fmt::Debug for ProvisionerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Accepts requests signed by one of a fixed set of provisioner keys.
#[derive(Debug, Clone, Default)]
pub struct AllowlistProvisioner {
    allowed: BTreeSet<[u8; VERIFYING_KEY_SIZE]>,
}

impl AllowlistProvisioner {
    /// Allow exactly `keys`.
    pub fn new(keys: impl IntoIterator<Item = [u8; VERIFYING_KEY_SIZE]>) -> Self {
        Self { allowed: keys.into_iter().collect() }
    }

    /// Load an allowlist file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProvisionerError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ProvisionerError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let provisioner = Self::parse(&contents)?;
        tracing::info!(
            path = %path.display(),
            provisioners = provisioner.len(),
            "provisioners loaded"
        );
        Ok(provisioner)
    }

    /// Parse allowlist text: one hex verifying key per line.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn parse(contents: &str) -> Result<Self, ProvisionerError> {
        let mut allowed = BTreeSet::new();

        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = |reason: String| ProvisionerError::InvalidEntry { line: i + 1, reason };

            let bytes = hex::decode(line).map_err(|e| invalid(e.to_string()))?;
            let key: [u8; VERIFYING_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                invalid(format!("expected {VERIFYING_KEY_SIZE} bytes, got {}", bytes.len()))
            })?;
            VerifyingKey::from_bytes(&key).map_err(|e| invalid(e.to_string()))?;

            allowed.insert(key);
        }

        Ok(Self { allowed })
    }

    /// Number of allowed provisioners.
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// True if no provisioner is allowed.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Signed message and body of a valid request, `None` to reject.
    fn verify<'a>(
        &self,
        resource: &str,
        msg_key: &[u8],
        value: &'a [u8],
    ) -> Option<(Vec<u8>, &'a [u8])> {
        let Some((signer, signature, body)) = split_value(value) else {
            tracing::debug!(resource, len = value.len(), "request value too short");
            return None;
        };

        if !self.allowed.contains(&signer) {
            tracing::debug!(resource, signer = %hex::encode(signer), "unknown provisioner");
            return None;
        }

        let message = signed_message(resource, msg_key, body);
        let verified = VerifyingKey::from_bytes(&signer)
            .and_then(|key| key.verify_strict(&message, &Signature::from_bytes(&signature)));

        if verified.is_err() {
            tracing::debug!(resource, signer = %hex::encode(signer), "bad request signature");
            return None;
        }

        Some((message, body))
    }
}

impl Provisioner for AllowlistProvisioner {
    fn reencrypt_request(
        &self,
        resource: &str,
        cryptokey: &dyn CryptoKey,
        msg_key: Option<&[u8]>,
        msg_value: Option<&[u8]>,
    ) -> Reencrypted {
        let Some(value) = msg_value else {
            tracing::debug!(resource, "request has no value");
            return Reencrypted::rejected();
        };

        let Some((message, body)) = self.verify(resource, msg_key.unwrap_or_default(), value)
        else {
            return Reencrypted::rejected();
        };

        Reencrypted {
            key: msg_key.map(Bytes::copy_from_slice),
            value: Some(encode_value(
                cryptokey.verifying_key(),
                cryptokey.sign_spk(&message),
                body,
            )),
        }
    }
}

/// Bytes a request signature covers.
pub fn signed_message(resource: &str, msg_key: &[u8], body: &[u8]) -> Vec<u8> {
    // Capacity: 4 (resource len) + resource + 4 (key len) + key + body
    let mut message = Vec::with_capacity(8 + resource.len() + msg_key.len() + body.len());
    message.extend_from_slice(&(resource.len() as u32).to_be_bytes());
    message.extend_from_slice(resource.as_bytes());
    message.extend_from_slice(&(msg_key.len() as u32).to_be_bytes());
    message.extend_from_slice(msg_key);
    message.extend_from_slice(body);
    message
}

/// Build a request value: `signer || signature || body`.
pub fn encode_value(
    signer: [u8; VERIFYING_KEY_SIZE],
    signature: [u8; SIGNATURE_SIZE],
    body: &[u8],
) -> Bytes {
    let mut value = Vec::with_capacity(VERIFYING_KEY_SIZE + SIGNATURE_SIZE + body.len());
    value.extend_from_slice(&signer);
    value.extend_from_slice(&signature);
    value.extend_from_slice(body);
    Bytes::from(value)
}

/// Split a request value into signer, signature and body.
fn split_value(
    value: &[u8],
) -> Option<([u8; VERIFYING_KEY_SIZE], [u8; SIGNATURE_SIZE], &[u8])> {
    let (signer, rest) = value.split_first_chunk::<VERIFYING_KEY_SIZE>()?;
    let (signature, body) = rest.split_first_chunk::<SIGNATURE_SIZE>()?;
    Some((*signer, *signature, body))
}
