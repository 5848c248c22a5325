//! Deterministic key derivation over a loaded secret.
//!
//! A [`KeyGenerator`] holds one secret and derives keys and nonces from it
//! with HKDF-SHA256. The `salt` and `ctx` inputs give domain separation: two
//! callers using the same secret and salt but different contexts get
//! independent outputs.
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = secret,
//!     salt = salt,                                  16 bytes
//!     info = ctx || u32be(keysize) || u32be(noncesize)  ctx is 16 bytes
//! ) -> key || nonce
//! ```
//!
//! Binding both sizes into `info` keeps a short request from being a prefix
//! of a longer one.

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::KeyError;

/// Size of a generator secret, ratchet secret and topic key.
pub const SECRET_SIZE: usize = 32;

/// Size of the KDF salt.
pub const SALT_SIZE: usize = 16;

/// Size of the KDF domain separation context.
pub const CONTEXT_SIZE: usize = 16;

/// All-zero salt for derivations that must be replayable from the secret alone.
pub const ZERO_SALT: [u8; SALT_SIZE] = [0u8; SALT_SIZE];

/// Context reserved for deriving the next ratchet secret.
pub const RATCHET_CONTEXT: [u8; CONTEXT_SIZE] = pad_context(b"ratchet");

/// Context for the message key-field sub-generator.
pub const KEY_CONTEXT: [u8; CONTEXT_SIZE] = pad_context(b"key");

/// Context for the message value-field sub-generator.
pub const VALUE_CONTEXT: [u8; CONTEXT_SIZE] = pad_context(b"value");

/// Context for one-time field encryption keys.
const FIELD_CONTEXT: [u8; CONTEXT_SIZE] = pad_context(b"field");

/// XChaCha20-Poly1305 key size
const AEAD_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
const AEAD_NONCE_SIZE: usize = 24;

/// HKDF-SHA256 can expand at most 255 hash blocks.
const MAX_OUTPUT: usize = 255 * 32;

/// Zero-pad a label into a fixed-size context.
pub(crate) const fn pad_context(label: &[u8]) -> [u8; CONTEXT_SIZE] {
    let mut ctx = [0u8; CONTEXT_SIZE];
    let mut i = 0;
    while i < label.len() && i < CONTEXT_SIZE {
        ctx[i] = label[i];
        i += 1;
    }
    ctx
}

/// Key derivation over one loaded secret.
///
/// Not `Clone`. The secret is zeroized when replaced by [`rekey`](Self::rekey)
/// and when the generator is dropped.
pub struct KeyGenerator {
    secret: [u8; SECRET_SIZE],
}

impl KeyGenerator {
    /// Create a generator loaded with `secret`.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength`: `secret` is not [`SECRET_SIZE`] bytes
    pub fn new(secret: &[u8]) -> Result<Self, KeyError> {
        let mut generator = Self { secret: [0u8; SECRET_SIZE] };
        generator.rekey(secret)?;
        Ok(generator)
    }

    /// Replace the loaded secret.
    ///
    /// The old secret is overwritten before the new one is copied in. On
    /// error the loaded secret is left untouched.
    pub fn rekey(&mut self, secret: &[u8]) -> Result<(), KeyError> {
        if secret.len() != SECRET_SIZE {
            return Err(KeyError::InvalidKeyLength { expected: SECRET_SIZE, actual: secret.len() });
        }

        self.secret.zeroize();
        self.secret.copy_from_slice(secret);
        Ok(())
    }

    /// Derive `keysize` bytes of key and `noncesize` bytes of nonce.
    ///
    /// Deterministic: the same secret, salt, ctx and sizes always produce the
    /// same output. `noncesize == 0` returns an empty nonce.
    pub fn generate(
        &self,
        salt: &[u8],
        ctx: &[u8],
        keysize: usize,
        noncesize: usize,
    ) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), KeyError> {
        if salt.len() != SALT_SIZE {
            return Err(KeyError::InvalidSalt { expected: SALT_SIZE, actual: salt.len() });
        }
        if ctx.len() != CONTEXT_SIZE {
            return Err(KeyError::InvalidContext { expected: CONTEXT_SIZE, actual: ctx.len() });
        }

        let requested = keysize.saturating_add(noncesize);
        if requested > MAX_OUTPUT {
            return Err(KeyError::OutputTooLarge { requested, max: MAX_OUTPUT });
        }

        // Capacity: 16 (ctx) + 4 (keysize) + 4 (noncesize) = 24
        let mut info = Vec::with_capacity(CONTEXT_SIZE + 8);
        info.extend_from_slice(ctx);
        info.extend_from_slice(&(keysize as u32).to_be_bytes());
        info.extend_from_slice(&(noncesize as u32).to_be_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(salt), &self.secret);
        let mut okm = Zeroizing::new(vec![0u8; requested]);
        hkdf.expand(&info, &mut okm)
            .map_err(|_| KeyError::OutputTooLarge { requested, max: MAX_OUTPUT })?;

        let key = Zeroizing::new(okm[..keysize].to_vec());
        let nonce = okm[keysize..].to_vec();
        Ok((key, nonce))
    }

    /// Derive independent generators for a message's key and value fields.
    ///
    /// A pure function of `secret`: the two generators are seeded from
    /// distinct contexts, so material produced for one field is never valid
    /// for the other.
    pub fn key_value_generators(secret: &[u8]) -> Result<(Self, Self), KeyError> {
        let root = Self::new(secret)?;

        let (key_secret, _) = root.generate(&ZERO_SALT, &KEY_CONTEXT, SECRET_SIZE, 0)?;
        let (value_secret, _) = root.generate(&ZERO_SALT, &VALUE_CONTEXT, SECRET_SIZE, 0)?;

        Ok((Self::new(&key_secret)?, Self::new(&value_secret)?))
    }

    /// Encrypt one field with a key and nonce derived from `salt`.
    ///
    /// Callers MUST use a fresh random salt per message; reusing a salt with
    /// the same generator reuses the AEAD nonce. `aad` is authenticated but
    /// not encrypted.
    pub fn seal(&self, salt: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let cipher = self.field_cipher(salt)?;

        let Ok(ciphertext) = cipher.0.encrypt(
            XNonce::from_slice(&cipher.1),
            Payload { msg: plaintext, aad },
        ) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        Ok(ciphertext)
    }

    /// Decrypt a field produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed`: wrong generator, salt or aad, or tampered data
    pub fn open(&self, salt: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let cipher = self.field_cipher(salt)?;

        cipher
            .0
            .decrypt(XNonce::from_slice(&cipher.1), Payload { msg: ciphertext, aad })
            .map_err(|_| KeyError::DecryptionFailed)
    }

    fn field_cipher(&self, salt: &[u8]) -> Result<(XChaCha20Poly1305, Vec<u8>), KeyError> {
        let (key, nonce) = self.generate(salt, &FIELD_CONTEXT, AEAD_KEY_SIZE, AEAD_NONCE_SIZE)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|_| {
            KeyError::InvalidKeyLength { expected: AEAD_KEY_SIZE, actual: key.len() }
        })?;
        Ok((cipher, nonce))
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

impl Drop for KeyGenerator {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
