//! Token secret generation and hashing.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of random bytes in a secret.
pub const SECRET_BYTES: usize = 32;

/// Returns the hex-encoded blake3 hash of a plaintext secret.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().to_string()
}

/// The plaintext token value, zeroized on drop.
///
/// Returned exactly once, when the token is issued.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TokenSecret {
    value: String,
}

impl TokenSecret {
    /// Creates a new random secret: 32 bytes from the OS-seeded RNG, URL-safe
    /// base64 without padding.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);
        bytes.zeroize();
        Self { value }
    }

    /// Wraps an existing plaintext value.
    #[must_use]
    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the plaintext value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Returns the storage hash of this secret.
    #[must_use]
    pub fn hash(&self) -> String {
        hash_secret(&self.value)
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSecret")
            .field("value", &"[REDACTED]")
            .finish()
    }
}
