//! Cached GitHub App provider.
//!
//! The app client is built from settings that change at runtime (admin
//! writes), so it must not be rebuilt per request. DB settings take
//! precedence, env vars are the fallback. The cache TTL is 30 seconds; the
//! mutex is held only across the in-memory check and store, never across the
//! settings reads done for a refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::github::GitHubApp;
use crate::settings::{keys, SettingsStore};

const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Cache {
    loaded_at: Option<Instant>,
    app: Option<Arc<GitHubApp>>,
    error: Option<String>,
}

pub struct GitHubAppProvider {
    config: Config,
    settings: SettingsStore,
    cache: Mutex<Cache>,
}

#[derive(Deserialize)]
struct AppIdValue {
    #[serde(default)]
    app_id: String,
}

impl GitHubAppProvider {
    pub fn new(config: Config, settings: SettingsStore) -> Self {
        Self {
            config,
            settings,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Returns the configured app client, or `None` when GitHub is not
    /// configured at all.
    pub async fn get(&self) -> anyhow::Result<Option<Arc<GitHubApp>>> {
        {
            let cache = self.cache.lock().await;
            if let Some(at) = cache.loaded_at {
                if at.elapsed() < CACHE_TTL {
                    if let Some(err) = &cache.error {
                        anyhow::bail!("github app misconfigured: {err}");
                    }
                    return Ok(cache.app.clone());
                }
            }
        }

        let built = self.load().await;

        let mut cache = self.cache.lock().await;
        cache.loaded_at = Some(Instant::now());
        match &built {
            Ok(app) => {
                cache.app = app.clone();
                cache.error = None;
            }
            Err(e) => {
                cache.app = None;
                cache.error = Some(e.to_string());
            }
        }
        built
    }

    /// Drop the cached client. Called after any admin settings mutation.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        *cache = Cache::default();
    }

    async fn load(&self) -> anyhow::Result<Option<Arc<GitHubApp>>> {
        let mut app_id = String::new();
        let mut webhook_secret = String::new();
        let mut private_key = String::new();

        if let Some(v) = self.settings.get_json::<AppIdValue>(keys::GITHUB_APP_ID).await? {
            app_id = v.app_id.trim().to_string();
        }
        if let Some(sec) = self.settings.get_secret(keys::GITHUB_WEBHOOK_SECRET).await? {
            webhook_secret = String::from_utf8_lossy(&sec).trim().to_string();
        }
        if let Some(sec) = self.settings.get_secret(keys::GITHUB_PRIVATE_KEY_PEM).await? {
            private_key = String::from_utf8_lossy(&sec).to_string();
        }

        // Env fallback for instances configured before the settings UI.
        if app_id.is_empty() {
            app_id = self.config.github_app_id.clone();
        }
        if webhook_secret.is_empty() {
            webhook_secret = self.config.github_webhook_secret.clone();
        }
        if private_key.is_empty() {
            private_key = self.config.github_private_key_pem.clone();
        }

        if app_id.is_empty() || webhook_secret.is_empty() || private_key.is_empty() {
            return Ok(None);
        }
        let app = GitHubApp::new(&app_id, &private_key, &webhook_secret)?;
        Ok(Some(Arc::new(app)))
    }
}
