//! GitHub App API client.
//!
//! Authenticates as the app (short-lived RS256 JWT) or as an installation
//! (per-installation token minted per build). All non-2xx responses are
//! treated as errors.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "opencel";
/// How much of an error response body to carry into the error message.
const ERROR_BODY_CAP: usize = 8192;
/// Source snapshots larger than this are refused.
const MAX_SNAPSHOT_BYTES: usize = 256 * 1024 * 1024;

pub struct GitHubApp {
    app_id: String,
    encoding_key: EncodingKey,
    pub webhook_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

impl GitHubApp {
    pub fn new(app_id: &str, private_key_pem: &str, webhook_secret: &str) -> anyhow::Result<Self> {
        let app_id = app_id.trim().to_string();
        if app_id.is_empty() || app_id.parse::<i64>().is_err() {
            anyhow::bail!("github app id must be numeric");
        }
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("parse github app private key: {e}"))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            app_id,
            encoding_key,
            webhook_secret: webhook_secret.to_string(),
            http,
        })
    }

    /// Short-lived app JWT. Issued 30s in the past to tolerate clock skew.
    fn app_jwt(&self) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 30,
            exp: now + 8 * 60,
            iss: self.app_id.clone(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub async fn get_repo_installation(&self, owner: &str, repo: &str) -> anyhow::Result<i64> {
        let jwt = self.app_jwt()?;
        let res = self
            .http
            .get(format!("{API_BASE}/repos/{owner}/{repo}/installation"))
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        let res = check_status(res, "get installation").await?;
        let out: InstallationResponse = res.json().await?;
        Ok(out.id)
    }

    pub async fn create_installation_token(&self, installation_id: i64) -> anyhow::Result<String> {
        let jwt = self.app_jwt()?;
        let res = self
            .http
            .post(format!(
                "{API_BASE}/app/installations/{installation_id}/access_tokens"
            ))
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let res = check_status(res, "create installation token").await?;
        let out: TokenResponse = res.json().await?;
        Ok(out.token)
    }

    pub async fn get_repo(&self, token: &str, owner: &str, repo: &str) -> anyhow::Result<RepoInfo> {
        let res = self
            .http
            .get(format!("{API_BASE}/repos/{owner}/{repo}"))
            .header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        let res = check_status(res, "get repo").await?;
        Ok(res.json().await?)
    }

    /// Download the repository snapshot at `git_ref` as a single zip archive.
    pub async fn download_zipball(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let res = self
            .http
            .get(format!("{API_BASE}/repos/{owner}/{repo}/zipball/{git_ref}"))
            .header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        let res = check_status(res, "download zipball").await?;
        let body = res.bytes().await?;
        if body.len() > MAX_SNAPSHOT_BYTES {
            anyhow::bail!("source snapshot too large: {} bytes", body.len());
        }
        Ok(body.to_vec())
    }
}

async fn check_status(res: reqwest::Response, op: &str) -> anyhow::Result<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let mut body = res.text().await.unwrap_or_default();
    body.truncate(ERROR_BODY_CAP);
    anyhow::bail!("github {op}: {status}: {}", body.trim())
}
