use std::io::{self, Write};

use lattice_dht::keys::{Keypair, PUBLIC_KEY_LEN, SECRET_KEY_LEN};

use crate::error::DaemonError;

/// Size of the identity key file: public key followed by secret key.
const KEYS_SIZE: usize = PUBLIC_KEY_LEN + SECRET_KEY_LEN;

/// Load the node identity from `path`, or generate and persist a fresh
/// one if no key file exists yet. Performed exactly once per process;
/// a key file of any size other than `KEYS_SIZE` is a fatal error.
pub fn establish_identity(path: &str) -> Result<Keypair, DaemonError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            if bytes.len() != KEYS_SIZE {
                return Err(DaemonError::IdentityIo {
                    reason: format!(
                        "key file '{}' is {} bytes, expected exactly {}",
                        path,
                        bytes.len(),
                        KEYS_SIZE
                    ),
                });
            }
            let mut seed = [0u8; SECRET_KEY_LEN];
            seed.copy_from_slice(&bytes[PUBLIC_KEY_LEN..]);
            tracing::info!("loaded existing identity from '{}'", path);
            Ok(Keypair::from_seed(&seed))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let keypair = Keypair::generate();
            let mut buf = Vec::with_capacity(KEYS_SIZE);
            buf.extend_from_slice(&keypair.public_key());
            buf.extend_from_slice(&keypair.secret_key());

            let mut file = std::fs::File::create(path).map_err(|e| DaemonError::IdentityIo {
                reason: format!("couldn't create key file '{}': {}", path, e),
            })?;
            // write_all surfaces a short write as an error; a partial
            // file left behind will fail the length check on reload.
            file.write_all(&buf).map_err(|e| DaemonError::IdentityIo {
                reason: format!("couldn't write key file '{}': {}", path, e),
            })?;
            tracing::info!("generated new identity, stored in '{}'", path);
            Ok(keypair)
        }
        Err(e) => Err(DaemonError::IdentityIo {
            reason: format!("couldn't read key file '{}': {}", path, e),
        }),
    }
}
