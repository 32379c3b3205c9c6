//! Encrypted env var storage. List responses carry keys only.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::envcrypt;
use crate::models::env_var::{EnvVar, SCOPE_PREVIEW, SCOPE_PRODUCTION};
use crate::schema::project_env_vars;

pub fn is_valid_scope(scope: &str) -> bool {
    scope == SCOPE_PREVIEW || scope == SCOPE_PRODUCTION
}

/// Encrypt and upsert one `(project, scope, key)` value.
pub async fn set_env_var(
    conn: &mut AsyncPgConnection,
    encrypt_key: &[u8],
    project_id: Uuid,
    scope: &str,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    let blob = envcrypt::encrypt(encrypt_key, value.as_bytes())?;
    diesel::insert_into(project_env_vars::table)
        .values((
            project_env_vars::project_id.eq(project_id),
            project_env_vars::scope.eq(scope),
            project_env_vars::key.eq(key),
            project_env_vars::value_enc.eq(blob.as_slice()),
        ))
        .on_conflict((
            project_env_vars::project_id,
            project_env_vars::scope,
            project_env_vars::key,
        ))
        .do_update()
        .set(project_env_vars::value_enc.eq(blob.as_slice()))
        .execute(conn)
        .await?;
    Ok(())
}

/// All env vars for a project, optionally filtered by scope. Values stay
/// encrypted; only the builder decrypts them.
pub async fn list_env_vars(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    scope: Option<&str>,
) -> anyhow::Result<Vec<EnvVar>> {
    let out = match scope {
        Some(s) => {
            project_env_vars::table
                .filter(project_env_vars::project_id.eq(project_id))
                .filter(project_env_vars::scope.eq(s))
                .order(project_env_vars::key.asc())
                .load::<EnvVar>(conn)
                .await?
        }
        None => {
            project_env_vars::table
                .filter(project_env_vars::project_id.eq(project_id))
                .order((project_env_vars::scope.asc(), project_env_vars::key.asc()))
                .load::<EnvVar>(conn)
                .await?
        }
    };
    Ok(out)
}

/// Decrypt a project's env vars for one scope into `KEY=value` pairs.
pub async fn decrypted_env(
    conn: &mut AsyncPgConnection,
    encrypt_key: &[u8],
    project_id: Uuid,
    scope: &str,
) -> anyhow::Result<Vec<String>> {
    let vars = list_env_vars(conn, project_id, Some(scope)).await?;
    let mut out = Vec::with_capacity(vars.len());
    for v in vars {
        let plaintext = envcrypt::decrypt(encrypt_key, &v.value_enc)?;
        out.push(format!("{}={}", v.key, String::from_utf8_lossy(&plaintext)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_validation() {
        assert!(is_valid_scope("preview"));
        assert!(is_valid_scope("production"));
        assert!(!is_valid_scope("prod"));
        assert!(!is_valid_scope(""));
        assert!(!is_valid_scope("Preview"));
    }
}
