//! On-host agent: serial consumer for `apply_settings` and `self_update`.
//!
//! Shells out to the installer (or docker compose as a fallback) and records
//! line-buffered output into the job's log stream. Child processes carry a
//! 30-minute wall-clock limit regardless of caller context.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::admin_job::{JOB_STATUS_FAILED, JOB_STATUS_RUNNING, JOB_STATUS_SUCCESS};
use crate::models::task::QueueTask;
use crate::queue::{self, AdminJobPayload, QUEUE_ADMIN, TASK_APPLY_SETTINGS, TASK_SELF_UPDATE};
use crate::services::admin_service;
use crate::settings::{keys, SettingsStore};

const CHILD_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
struct AgentPaths {
    install_dir: String,
    repo_dir: String,
    opencel_bin: String,
}

impl AgentPaths {
    fn from_env() -> Self {
        Self {
            install_dir: env_or("OPENCEL_INSTALL_DIR", "/opt/opencel"),
            repo_dir: env_or("OPENCEL_REPO_DIR", "/opt/opencel-src"),
            opencel_bin: env_or("OPENCEL_BIN", "/usr/local/bin/opencel"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Run the agent consumer until shutdown. Concurrency is 1 by contract:
/// never two installer invocations on the same host.
pub async fn run(pool: DbPool, settings: SettingsStore) {
    let paths = AgentPaths::from_env();
    let handler_pool = pool.clone();
    let handler = move |task: QueueTask| {
        let pool = handler_pool.clone();
        let settings = settings.clone();
        let paths = paths.clone();
        async move { handle_task(pool, settings, paths, task).await }
    };
    queue::run_consumer(pool, QUEUE_ADMIN, 1, handler).await;
}

async fn handle_task(
    pool: DbPool,
    settings: SettingsStore,
    paths: AgentPaths,
    task: QueueTask,
) -> anyhow::Result<()> {
    let payload: AdminJobPayload = serde_json::from_value(task.payload.clone())?;
    match task.kind.as_str() {
        TASK_APPLY_SETTINGS => {
            run_admin_job(&pool, payload.job_id, "apply_settings", |logger| {
                apply_settings(settings, paths, logger)
            })
            .await
        }
        TASK_SELF_UPDATE => {
            run_admin_job(&pool, payload.job_id, "self_update", |logger| {
                self_update(paths, logger)
            })
            .await
        }
        other => anyhow::bail!("unknown admin task kind: {other}"),
    }
}

/// Line-oriented writer into a job's log stream.
#[derive(Clone)]
pub struct JobLogger {
    pool: DbPool,
    job_id: Uuid,
}

impl JobLogger {
    pub async fn log(&self, line: &str) {
        let line = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{line}\n")
        };
        if let Ok(mut conn) = self.pool.get().await {
            let _ = admin_service::append_job_log(&mut conn, self.job_id, "system", &line).await;
        }
    }
}

async fn run_admin_job<F, Fut>(pool: &DbPool, job_id: Uuid, kind: &str, work: F) -> anyhow::Result<()>
where
    F: FnOnce(JobLogger) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    {
        let mut conn = pool.get().await?;
        admin_service::set_job_status(&mut conn, job_id, JOB_STATUS_RUNNING, None).await?;
    }
    let logger = JobLogger {
        pool: pool.clone(),
        job_id,
    };
    logger.log(&format!("starting {kind}")).await;

    match work(logger.clone()).await {
        Ok(()) => {
            logger.log("success").await;
            let mut conn = pool.get().await?;
            admin_service::set_job_status(&mut conn, job_id, JOB_STATUS_SUCCESS, None).await?;
            Ok(())
        }
        Err(e) => {
            let msg = e.to_string();
            logger.log(&format!("failed: {msg}")).await;
            let mut conn = pool.get().await?;
            admin_service::set_job_status(&mut conn, job_id, JOB_STATUS_FAILED, Some(&msg)).await?;
            Err(e)
        }
    }
}

#[derive(Deserialize, Default)]
struct BaseDomainValue {
    #[serde(default)]
    base_domain: String,
}

#[derive(Deserialize, Default)]
struct PublicSchemeValue {
    #[serde(default)]
    public_scheme: String,
}

#[derive(Deserialize, Default)]
struct TlsModeValue {
    #[serde(default)]
    tls_mode: String,
}

#[derive(Deserialize, Default)]
struct AppIdValue {
    #[serde(default)]
    app_id: String,
}

/// Project DB settings onto the host: secrets file, `.env` updates, then
/// re-run the installer (or restart via compose when no installer exists).
async fn apply_settings(
    settings: SettingsStore,
    paths: AgentPaths,
    logger: JobLogger,
) -> anyhow::Result<()> {
    let base_domain = settings
        .get_json::<BaseDomainValue>(keys::BASE_DOMAIN)
        .await?
        .unwrap_or_default()
        .base_domain
        .trim()
        .to_string();
    let public_scheme = settings
        .get_json::<PublicSchemeValue>(keys::PUBLIC_SCHEME)
        .await?
        .unwrap_or_default()
        .public_scheme
        .trim()
        .to_string();
    let mut tls_mode = settings
        .get_json::<TlsModeValue>(keys::TLS_MODE)
        .await?
        .unwrap_or_default()
        .tls_mode
        .trim()
        .to_lowercase();
    if tls_mode.is_empty() {
        tls_mode = "letsencrypt".to_string();
    }

    let app_id = settings
        .get_json::<AppIdValue>(keys::GITHUB_APP_ID)
        .await?
        .unwrap_or_default()
        .app_id
        .trim()
        .to_string();
    let webhook_secret = settings
        .get_secret(keys::GITHUB_WEBHOOK_SECRET)
        .await?
        .map(|b| String::from_utf8_lossy(&b).trim().to_string())
        .unwrap_or_default();
    let private_key = settings
        .get_secret(keys::GITHUB_PRIVATE_KEY_PEM)
        .await?
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();

    if !base_domain.is_empty() {
        logger.log(&format!("will set base_domain={base_domain}")).await;
    }
    if !public_scheme.is_empty() {
        logger
            .log(&format!("will set public_scheme={public_scheme}"))
            .await;
    }
    logger.log(&format!("will set tls_mode={tls_mode}")).await;
    if !app_id.is_empty() {
        logger.log("github app id configured").await;
    }
    if !webhook_secret.is_empty() {
        logger.log("github webhook secret configured").await;
    }

    if !private_key.is_empty() {
        let secrets_dir = format!("{}/secrets", paths.install_dir);
        tokio::fs::create_dir_all(&secrets_dir).await?;
        let key_path = format!("{secrets_dir}/github_app_private_key.pem");
        tokio::fs::write(&key_path, private_key.as_bytes()).await?;
        set_mode(&key_path, 0o600)?;
    }

    let mut updates: Vec<(String, String)> = Vec::new();
    if !base_domain.is_empty() {
        updates.push(("OPENCEL_BASE_DOMAIN".to_string(), base_domain));
    }
    if !public_scheme.is_empty() {
        updates.push(("OPENCEL_PUBLIC_SCHEME".to_string(), public_scheme));
    }
    match tls_mode.as_str() {
        "cloudflared" => {
            updates.push(("OPENCEL_TRAEFIK_TLS".to_string(), "false".to_string()));
        }
        _ => {
            updates.push(("OPENCEL_TRAEFIK_TLS".to_string(), "true".to_string()));
        }
    }
    if !app_id.is_empty() {
        updates.push(("OPENCEL_GITHUB_APP_ID".to_string(), app_id));
    }
    if !webhook_secret.is_empty() {
        updates.push(("OPENCEL_GITHUB_WEBHOOK_SECRET".to_string(), webhook_secret));
    }
    if !updates.is_empty() {
        let env_path = format!("{}/.env", paths.install_dir);
        if let Err(e) = update_dot_env(&env_path, &updates) {
            logger.log(&format!("warn: update .env failed: {e}")).await;
        }
    }

    // Prefer the installer (keeps templates in sync); fall back to compose.
    if installer_available(&paths) {
        let tls_arg = match tls_mode.as_str() {
            "letsencrypt" => "letsencrypt",
            "cloudflared" => "cloudflared",
            _ => "disabled",
        };
        let args = vec![
            "install".to_string(),
            "--local-build".to_string(),
            "--non-interactive".to_string(),
            "--repo".to_string(),
            paths.repo_dir.clone(),
            "--dir".to_string(),
            paths.install_dir.clone(),
            "--tls".to_string(),
            tls_arg.to_string(),
        ];
        logger
            .log(&format!("exec: {} {}", paths.opencel_bin, args.join(" ")))
            .await;
        return run_cmd(&logger, &paths.opencel_bin, &args).await;
    }

    logger
        .log("installer not available; restarting via docker compose")
        .await;
    let compose = format!("{}/docker-compose.yml", paths.install_dir);
    run_cmd(
        &logger,
        "docker",
        &[
            "compose".to_string(),
            "-f".to_string(),
            compose.clone(),
            "up".to_string(),
            "-d".to_string(),
        ],
    )
    .await?;
    let _ = run_cmd(
        &logger,
        "docker",
        &[
            "compose".to_string(),
            "-f".to_string(),
            compose,
            "restart".to_string(),
            "api".to_string(),
            "worker".to_string(),
        ],
    )
    .await;
    Ok(())
}

/// Pull the source checkout and re-run the installer to rebuild the stack.
async fn self_update(paths: AgentPaths, logger: JobLogger) -> anyhow::Result<()> {
    if !paths.repo_dir.is_empty() {
        logger.log(&format!("git fetch/pull in {}", paths.repo_dir)).await;
        run_cmd(
            &logger,
            "git",
            &[
                "-C".to_string(),
                paths.repo_dir.clone(),
                "fetch".to_string(),
                "--all".to_string(),
                "--prune".to_string(),
            ],
        )
        .await?;
        let _ = run_cmd(
            &logger,
            "git",
            &[
                "-C".to_string(),
                paths.repo_dir.clone(),
                "pull".to_string(),
                "--ff-only".to_string(),
            ],
        )
        .await;
    } else {
        logger.log("no repo dir mounted; skipping git pull").await;
    }

    if installer_available(&paths) {
        let args = vec![
            "install".to_string(),
            "--local-build".to_string(),
            "--non-interactive".to_string(),
            "--repo".to_string(),
            paths.repo_dir.clone(),
            "--dir".to_string(),
            paths.install_dir.clone(),
            "--tls".to_string(),
            "letsencrypt".to_string(),
        ];
        logger
            .log(&format!("exec: {} {}", paths.opencel_bin, args.join(" ")))
            .await;
        return run_cmd(&logger, &paths.opencel_bin, &args).await;
    }

    logger
        .log("installer not available; running docker compose up -d")
        .await;
    run_cmd(
        &logger,
        "docker",
        &[
            "compose".to_string(),
            "-f".to_string(),
            format!("{}/docker-compose.yml", paths.install_dir),
            "up".to_string(),
            "-d".to_string(),
        ],
    )
    .await
}

fn installer_available(paths: &AgentPaths) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if paths.repo_dir.is_empty() {
        return false;
    }
    match std::fs::metadata(&paths.opencel_bin) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

fn set_mode(path: &str, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Rewrite key=value lines in a dotenv file, appending missing keys.
fn update_dot_env(path: &str, updates: &[(String, String)]) -> anyhow::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            let mut body = String::new();
            for (k, v) in updates {
                body.push_str(&format!("{k}={v}\n"));
            }
            write_env_file(path, &body)?;
            return Ok(());
        }
    };

    let mut lines: Vec<String> = existing.lines().map(|l| l.to_string()).collect();
    let mut seen = std::collections::HashSet::new();
    for line in lines.iter_mut() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, _)) = line.split_once('=') else {
            continue;
        };
        let k = k.trim().to_string();
        if let Some((_, v)) = updates.iter().find(|(uk, _)| *uk == k) {
            *line = format!("{k}={v}");
            seen.insert(k);
        }
    }
    for (k, v) in updates {
        if !seen.contains(k) {
            lines.push(format!("{k}={v}"));
        }
    }
    let mut body = lines.join("\n");
    if !body.ends_with('\n') {
        body.push('\n');
    }
    write_env_file(path, &body)?;
    Ok(())
}

fn write_env_file(path: &str, body: &str) -> anyhow::Result<()> {
    std::fs::write(path, body)?;
    set_mode(path, 0o600)?;
    Ok(())
}

/// Run a child process, streaming its output line by line into the job log.
/// Killed hard after 30 minutes.
async fn run_cmd(logger: &JobLogger, program: &str, args: &[String]) -> anyhow::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("spawn {program}: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("missing child stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("missing child stderr"))?;

    let out_logger = logger.clone();
    let out_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            out_logger.log(&line).await;
        }
    });
    let err_logger = logger.clone();
    let err_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            err_logger.log(&line).await;
        }
    });

    let status = match tokio::time::timeout(CHILD_DEADLINE, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = out_task.await;
            let _ = err_task.await;
            anyhow::bail!("{program} killed after {}s deadline", CHILD_DEADLINE.as_secs());
        }
    };
    let _ = out_task.await;
    let _ = err_task.await;

    if !status.success() {
        anyhow::bail!("{program} exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_env_update_rewrites_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let path = path.to_str().unwrap();
        std::fs::write(
            path,
            "# managed by installer\nOPENCEL_BASE_DOMAIN=old.example\nOPENCEL_DSN=postgres://x\n",
        )
        .unwrap();

        update_dot_env(
            path,
            &[
                ("OPENCEL_BASE_DOMAIN".to_string(), "new.example".to_string()),
                ("OPENCEL_TRAEFIK_TLS".to_string(), "false".to_string()),
            ],
        )
        .unwrap();

        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("OPENCEL_BASE_DOMAIN=new.example"));
        assert!(!body.contains("old.example"));
        assert!(body.contains("OPENCEL_DSN=postgres://x"));
        assert!(body.contains("OPENCEL_TRAEFIK_TLS=false"));
        assert!(body.starts_with("# managed by installer"));
    }

    #[test]
    fn dot_env_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        update_dot_env(
            path.to_str().unwrap(),
            &[("OPENCEL_BASE_DOMAIN".to_string(), "a.example".to_string())],
        )
        .unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body, "OPENCEL_BASE_DOMAIN=a.example\n");
    }
}
