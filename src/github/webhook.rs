//! Webhook signature verification (X-Hub-Signature-256).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub webhook signature against the raw request body.
///
/// The comparison is constant-time (`Mac::verify_slice`). Unlike status
/// checks, the caller decides what an unconfigured secret means.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> anyhow::Result<()> {
    if secret.is_empty() {
        anyhow::bail!("webhook secret not configured");
    }
    let sig_hex = signature
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow::anyhow!("unexpected signature format"))?;
    let sig_bytes = hex::decode(sig_hex).map_err(|_| anyhow::anyhow!("invalid signature hex"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid webhook secret"))?;
    mac.update(body);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| anyhow::anyhow!("invalid signature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute_signature(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let sig = compute_signature("s3cret", body);
        assert!(verify_signature("s3cret", body, &sig).is_ok());
    }

    #[test]
    fn flipping_a_body_bit_fails() {
        let body = b"payload bytes".to_vec();
        let sig = compute_signature("s3cret", &body);
        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(verify_signature("s3cret", &tampered, &sig).is_err());
        }
    }

    #[test]
    fn flipping_a_signature_nibble_fails() {
        let body = b"payload";
        let sig = compute_signature("s3cret", body);
        let mut bad = sig.clone().into_bytes();
        let last = bad.len() - 1;
        bad[last] = if bad[last] == b'0' { b'1' } else { b'0' };
        assert!(verify_signature("s3cret", body, &String::from_utf8(bad).unwrap()).is_err());
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = compute_signature("s3cret", body);
        assert!(verify_signature("other", body, &sig).is_err());
    }

    #[test]
    fn malformed_signatures_rejected() {
        let body = b"payload";
        assert!(verify_signature("s3cret", body, "deadbeef").is_err());
        assert!(verify_signature("s3cret", body, "sha256=nothex!").is_err());
        assert!(verify_signature("s3cret", body, "").is_err());
        assert!(verify_signature("", body, "sha256=00").is_err());
    }
}
