//! Authenticated encryption for env vars and instance secrets.
//!
//! AES-256-GCM with a fresh 12-byte random nonce per encryption.
//! Blob layout: `nonce || ciphertext-with-tag`.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

const NONCE_LEN: usize = 12;

/// Encrypt plaintext. `key` must be 32 bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    if key.len() != 32 {
        anyhow::bail!("key must be 32 bytes");
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ct = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| anyhow::anyhow!("encrypt failed"))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` blob. Rejects short blobs and tag mismatches.
pub fn decrypt(key: &[u8], blob: &[u8]) -> anyhow::Result<Vec<u8>> {
    if key.len() != 32 {
        anyhow::bail!("key must be 32 bytes");
    }
    if blob.len() < NONCE_LEN {
        anyhow::bail!("ciphertext too short");
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| anyhow::anyhow!("decrypt failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn roundtrip() {
        let msgs: [&[u8]; 4] = [b"", b"x", b"hello world", &[0u8; 4096]];
        for m in msgs {
            let blob = encrypt(&key(), m).unwrap();
            assert_eq!(decrypt(&key(), &blob).unwrap(), m);
        }
    }

    #[test]
    fn nonce_is_fresh_per_encryption() {
        let a = encrypt(&key(), b"same").unwrap();
        let b = encrypt(&key(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt(&key(), b"secret").unwrap();
        let mut other = key();
        other[0] ^= 0xff;
        assert!(decrypt(&other, &blob).is_err());
    }

    #[test]
    fn tampering_any_byte_fails() {
        let blob = encrypt(&key(), b"secret value").unwrap();
        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(decrypt(&key(), &tampered).is_err(), "byte {i} accepted");
        }
    }

    #[test]
    fn short_blob_rejected() {
        assert!(decrypt(&key(), &[0u8; 11]).is_err());
        assert!(decrypt(&key(), &[]).is_err());
    }

    #[test]
    fn bad_key_length_rejected() {
        assert!(encrypt(&[0u8; 16], b"m").is_err());
        assert!(decrypt(&[0u8; 31], &[0u8; 40]).is_err());
    }
}
