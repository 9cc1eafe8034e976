//! Crypto self-checks run before any key material is touched.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("operating system random source unavailable: {0}")]
    Random(String),
    #[error("HMAC-SHA256 self-test failed")]
    SelfTest,
}

// RFC 4231, test case 1.
const KAT_KEY: [u8; 20] = [0x0b; 20];
const KAT_DATA: &[u8] = b"Hi There";
const KAT_MAC: &str = "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7";

/// Probe the OS RNG and run the HMAC known-answer test.
pub fn initialize() -> Result<(), CryptoError> {
    let mut probe = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut probe)
        .map_err(|e| CryptoError::Random(e.to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&KAT_KEY).map_err(|_| CryptoError::SelfTest)?;
    mac.update(KAT_DATA);
    if hex::encode(mac.finalize().into_bytes()) != KAT_MAC {
        return Err(CryptoError::SelfTest);
    }

    tracing::debug!("Crypto self-test passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize() {
        initialize().unwrap();
    }
}
