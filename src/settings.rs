//! Instance-level settings persisted in Postgres.
//!
//! Each key addresses one row holding an open JSON value (non-secret) and/or
//! an encrypted secret blob. Secrets use the same AES-256-GCM key as env vars.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::DbPool;
use crate::envcrypt;
use crate::schema::instance_settings;

pub mod keys {
    pub const GITHUB_APP_ID: &str = "github_app_id";
    pub const GITHUB_WEBHOOK_SECRET: &str = "github_app_webhook_secret";
    pub const GITHUB_PRIVATE_KEY_PEM: &str = "github_app_private_key_pem";

    pub const BASE_DOMAIN: &str = "base_domain";
    pub const PUBLIC_SCHEME: &str = "public_scheme";
    pub const TLS_MODE: &str = "tls_mode";

    pub const AUTO_UPDATES: &str = "auto_updates";
}

#[derive(Clone)]
pub struct SettingsStore {
    pool: DbPool,
    encrypt_key: Vec<u8>,
}

impl SettingsStore {
    pub fn new(pool: DbPool, encrypt_key: Vec<u8>) -> Self {
        Self { pool, encrypt_key }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let mut conn = self.pool.get().await?;
        let value: Option<serde_json::Value> = instance_settings::table
            .find(key)
            .select(instance_settings::value_json)
            .first(&mut conn)
            .await
            .optional()?;
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let v = serde_json::to_value(value)?;
        diesel::insert_into(instance_settings::table)
            .values((
                instance_settings::key.eq(key),
                instance_settings::value_json.eq(v.clone()),
                instance_settings::updated_at.eq(chrono::Utc::now()),
            ))
            .on_conflict(instance_settings::key)
            .do_update()
            .set((
                instance_settings::value_json.eq(v),
                instance_settings::updated_at.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn has_secret(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.pool.get().await?;
        let secret: Option<Option<Vec<u8>>> = instance_settings::table
            .find(key)
            .select(instance_settings::secret_enc)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(matches!(secret, Some(Some(b)) if !b.is_empty()))
    }

    /// Store a secret for `key`. An empty plaintext clears it.
    pub async fn set_secret(&self, key: &str, plaintext: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let blob = if plaintext.is_empty() {
            None
        } else {
            Some(envcrypt::encrypt(&self.encrypt_key, plaintext)?)
        };
        diesel::insert_into(instance_settings::table)
            .values((
                instance_settings::key.eq(key),
                instance_settings::value_json.eq(serde_json::json!({})),
                instance_settings::secret_enc.eq(blob.clone()),
                instance_settings::updated_at.eq(chrono::Utc::now()),
            ))
            .on_conflict(instance_settings::key)
            .do_update()
            .set((
                instance_settings::secret_enc.eq(blob),
                instance_settings::updated_at.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_secret(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        let secret: Option<Option<Vec<u8>>> = instance_settings::table
            .find(key)
            .select(instance_settings::secret_enc)
            .first(&mut conn)
            .await
            .optional()?;
        match secret {
            Some(Some(blob)) if !blob.is_empty() => {
                Ok(Some(envcrypt::decrypt(&self.encrypt_key, &blob)?))
            }
            _ => Ok(None),
        }
    }
}
