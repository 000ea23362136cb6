use ed25519_dalek::SigningKey;

/// Length of a node public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a node secret key in bytes.
pub const SECRET_KEY_LEN: usize = 32;

pub type PublicKey = [u8; PUBLIC_KEY_LEN];

/// Wrapper around a node's long-term Ed25519 identity keypair.
#[derive(Clone)]
pub struct Keypair {
    inner: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: SigningKey::generate(&mut csprng),
        }
    }

    /// Rebuild a keypair from its secret key bytes.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LEN]) -> Self {
        Self {
            inner: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key bytes.
    pub fn public_key(&self) -> PublicKey {
        self.inner.verifying_key().to_bytes()
    }

    /// Get the secret key bytes (the Ed25519 seed).
    pub fn secret_key(&self) -> [u8; SECRET_KEY_LEN] {
        self.inner.to_bytes()
    }
}

// Note: SigningKey with the "zeroize" feature implements ZeroizeOnDrop,
// so key material is automatically wiped when Keypair is dropped.
