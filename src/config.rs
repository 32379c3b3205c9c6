//! Instance configuration — loaded from `OPENCEL_*` environment variables.

use base64::Engine;
use rand::RngCore;

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP listen address for the API process.
    pub http_addr: String,
    /// PostgreSQL connection string. Also backs the task queue.
    pub dsn: String,
    /// Base domain under which preview/prod hostnames are minted.
    pub base_domain: String,
    /// Scheme used when generating URLs shown to users.
    pub public_scheme: String,

    /// HS256 secret for session tokens. Ephemeral if unset.
    pub jwt_secret: String,
    /// 32-byte AES-256-GCM key for env vars and instance secrets.
    pub encrypt_key: Vec<u8>,

    /// GitHub App credentials (env fallback; DB settings take precedence).
    pub github_app_id: String,
    pub github_webhook_secret: String,
    pub github_private_key_pem: String,

    /// Optional first-admin bootstrap.
    pub bootstrap_email: String,
    pub bootstrap_password: String,

    /// Reverse proxy file-provider dynamic config path (mounted volume).
    pub traefik_dynamic_path: String,
    pub traefik_entrypoint: String,
    pub traefik_tls: bool,

    /// Container engine wiring.
    pub docker_network: String,
    pub registry_addr: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let dsn = std::env::var("OPENCEL_DSN").unwrap_or_default();
        if dsn.is_empty() {
            anyhow::bail!("missing required env var: OPENCEL_DSN");
        }

        let jwt_secret = match std::env::var("OPENCEL_JWT_SECRET") {
            Ok(v) if !v.is_empty() => v,
            _ => {
                tracing::warn!(
                    "OPENCEL_JWT_SECRET not set -- generated an ephemeral secret; \
                     issued tokens will not survive a restart"
                );
                random_b64(32)
            }
        };

        let env_key_b64 = match std::env::var("OPENCEL_ENV_KEY_B64") {
            Ok(v) if !v.is_empty() => v,
            _ => {
                tracing::warn!(
                    "OPENCEL_ENV_KEY_B64 not set -- generated an ephemeral encryption key; \
                     persisted ciphertexts will NOT decrypt after a restart"
                );
                random_b64(32)
            }
        };
        let encrypt_key = base64::engine::general_purpose::STANDARD
            .decode(&env_key_b64)
            .map_err(|e| anyhow::anyhow!("OPENCEL_ENV_KEY_B64 must be valid base64: {e}"))?;
        if encrypt_key.len() != 32 {
            anyhow::bail!("OPENCEL_ENV_KEY_B64 must decode to exactly 32 bytes");
        }

        let mut github_private_key_pem =
            std::env::var("OPENCEL_GITHUB_PRIVATE_KEY_PEM").unwrap_or_default();
        let github_app_id = std::env::var("OPENCEL_GITHUB_APP_ID").unwrap_or_default();
        let github_webhook_secret =
            std::env::var("OPENCEL_GITHUB_WEBHOOK_SECRET").unwrap_or_default();
        if github_private_key_pem.is_empty() {
            if let Ok(path) = std::env::var("OPENCEL_GITHUB_PRIVATE_KEY_PATH") {
                if !path.is_empty() {
                    match std::fs::read_to_string(&path) {
                        Ok(pem) => github_private_key_pem = pem,
                        Err(e) => {
                            // Only fatal when GitHub is otherwise configured; local
                            // dev can run without GitHub support.
                            if !github_app_id.is_empty() || !github_webhook_secret.is_empty() {
                                anyhow::bail!("read OPENCEL_GITHUB_PRIVATE_KEY_PATH: {e}");
                            }
                        }
                    }
                }
            }
        }

        let traefik_tls = env_bool("OPENCEL_TRAEFIK_TLS", true);
        let mut public_scheme = std::env::var("OPENCEL_PUBLIC_SCHEME").unwrap_or_default();
        if public_scheme.is_empty() {
            public_scheme = if traefik_tls { "https" } else { "http" }.to_string();
        }
        let public_scheme = public_scheme.trim().to_lowercase();

        Ok(Self {
            http_addr: env_or("OPENCEL_HTTP_ADDR", "0.0.0.0:8080"),
            dsn,
            base_domain: env_or("OPENCEL_BASE_DOMAIN", "opencel.localhost"),
            public_scheme,
            jwt_secret,
            encrypt_key,
            github_app_id,
            github_webhook_secret,
            github_private_key_pem,
            bootstrap_email: std::env::var("OPENCEL_BOOTSTRAP_EMAIL").unwrap_or_default(),
            bootstrap_password: std::env::var("OPENCEL_BOOTSTRAP_PASSWORD").unwrap_or_default(),
            traefik_dynamic_path: env_or(
                "OPENCEL_TRAEFIK_DYNAMIC_PATH",
                "/traefik/dynamic/opencel.yml",
            ),
            traefik_entrypoint: env_or("OPENCEL_TRAEFIK_ENTRYPOINT", "websecure"),
            traefik_tls,
            docker_network: env_or("OPENCEL_DOCKER_NETWORK", "opencel"),
            registry_addr: env_or("OPENCEL_REGISTRY_ADDR", "localhost:5000"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    let v = std::env::var(key).unwrap_or_default();
    let v = v.trim().to_lowercase();
    if v.is_empty() {
        return default;
    }
    match v.as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => true,
        "0" | "false" | "f" | "no" | "n" | "off" => false,
        _ => default,
    }
}

fn random_b64(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    base64::engine::general_purpose::STANDARD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_parses_common_spellings() {
        std::env::set_var("OPENCEL_TEST_BOOL", "yes");
        assert!(env_bool("OPENCEL_TEST_BOOL", false));
        std::env::set_var("OPENCEL_TEST_BOOL", "off");
        assert!(!env_bool("OPENCEL_TEST_BOOL", true));
        std::env::set_var("OPENCEL_TEST_BOOL", "gibberish");
        assert!(env_bool("OPENCEL_TEST_BOOL", true));
        std::env::remove_var("OPENCEL_TEST_BOOL");
        assert!(!env_bool("OPENCEL_TEST_BOOL", false));
    }

    #[test]
    fn random_b64_decodes_to_requested_length() {
        let s = random_b64(32);
        let raw = base64::engine::general_purpose::STANDARD
            .decode(s)
            .unwrap();
        assert_eq!(raw.len(), 32);
    }
}
