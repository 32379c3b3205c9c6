//! The build pipeline: source snapshot -> image -> running container.
//!
//! `build(deployment_id)` is the sole entry point; it is safe under task
//! redelivery because only a QUEUED deployment enters the pipeline and
//! terminal states are never overwritten.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::Command;
use uuid::Uuid;

use crate::config::Config;
use crate::db::DbPool;
use crate::github::GitHubAppProvider;
use crate::models::deployment::{
    Deployment, KIND_PRODUCTION, STATUS_FAILED, STATUS_READY, STREAM_BUILD, STREAM_SYSTEM,
};
use crate::models::env_var::{SCOPE_PREVIEW, SCOPE_PRODUCTION};
use crate::models::project::Project;
use crate::services::log_sink::{drain, LogSink};
use crate::services::{archive, deployment_service, env_service, recipe};

pub struct Builder {
    pool: DbPool,
    config: Config,
    github: Arc<GitHubAppProvider>,
}

struct BuildOutcome {
    image_ref: String,
    container_name: String,
    service_port: i32,
    preview_url: String,
}

impl Builder {
    pub fn new(pool: DbPool, config: Config, github: Arc<GitHubAppProvider>) -> Self {
        Self {
            pool,
            config,
            github,
        }
    }

    /// Run the pipeline for one deployment.
    pub async fn build(&self, deployment_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let deployment = deployment_service::get_deployment(&mut conn, deployment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("deployment not found"))?;
        let project = crate::services::project_service::get_project(&mut conn, deployment.project_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("project not found"))?;

        // Redelivered task or concurrent pickup: complete without side effects.
        if !deployment_service::mark_building(&mut conn, deployment.id).await? {
            tracing::info!(
                deployment_id = %deployment.id,
                status = %deployment.status,
                "Deployment not QUEUED, skipping"
            );
            return Ok(());
        }
        deployment_service::add_event(
            &mut conn,
            deployment.id,
            crate::models::deployment::STATUS_BUILDING,
            "Build started",
        )
        .await?;
        drop(conn);

        let started = Instant::now();
        let result = self.run(&deployment, &project).await;
        crate::metrics::build_duration(started.elapsed().as_millis() as u64);

        match result {
            Ok(outcome) => {
                let mut conn = self.pool.get().await?;
                deployment_service::mark_ready(
                    &mut conn,
                    deployment.id,
                    &outcome.image_ref,
                    &outcome.container_name,
                    outcome.service_port,
                    &outcome.preview_url,
                )
                .await?;
                deployment_service::add_event(
                    &mut conn,
                    deployment.id,
                    STATUS_READY,
                    "Deployment is ready",
                )
                .await?;
                tracing::info!(
                    deployment_id = %deployment.id,
                    preview_url = %outcome.preview_url,
                    "Deployment ready"
                );
                Ok(())
            }
            Err(e) => {
                self.fail(deployment.id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run(&self, deployment: &Deployment, project: &Project) -> anyhow::Result<BuildOutcome> {
        let installation_id = project
            .github_installation_id
            .ok_or_else(|| anyhow::anyhow!("project missing GitHub installation id"))?;
        let (owner, repo) = project
            .repo_full_name
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty())
            .ok_or_else(|| anyhow::anyhow!("invalid repo_full_name"))?;

        let app = self
            .github
            .get()
            .await?
            .ok_or_else(|| anyhow::anyhow!("GitHub not configured"))?;

        // Short-lived token, refreshed per build.
        let token = app.create_installation_token(installation_id).await?;
        let zipball = app
            .download_zipball(&token, owner, repo, &deployment.git_sha)
            .await?;

        let extracted = tokio::task::spawn_blocking(move || archive::extract_zip(&zipball))
            .await
            .map_err(|e| anyhow::anyhow!("extract task: {e}"))??;
        let app_root = archive::find_app_root(&extracted)?;

        let recipe = recipe::detect(&app_root);
        let dockerfile_path = app_root.join(recipe::BUILD_FILE_NAME);
        tokio::fs::write(&dockerfile_path, recipe.dockerfile()).await?;

        let id_hex = deployment.id.simple().to_string();
        let container_name = format!("opencel-deploy-{id_hex}");
        let image_ref = format!(
            "{}/opencel/{}:{}",
            self.config.registry_addr, project.slug, id_hex
        );

        self.run_docker(
            deployment.id,
            STREAM_BUILD,
            vec![
                "build".to_string(),
                "-f".to_string(),
                dockerfile_path.to_string_lossy().into_owned(),
                "-t".to_string(),
                image_ref.clone(),
                app_root.to_string_lossy().into_owned(),
            ],
        )
        .await
        .map_err(|e| anyhow::anyhow!("docker build: {e}"))?;

        // Push so future runs can pull the image; failure is non-fatal.
        if let Err(e) = self
            .run_docker(
                deployment.id,
                STREAM_BUILD,
                vec!["push".to_string(), image_ref.clone()],
            )
            .await
        {
            tracing::warn!(deployment_id = %deployment.id, "docker push: {e}");
        }

        let preview_host = format!("{id_hex}.preview.{}", self.config.base_domain);
        let preview_url = format!("{}://{preview_host}", self.config.public_scheme);

        let mut labels = vec![
            "traefik.enable=true".to_string(),
            format!("traefik.http.routers.{container_name}.rule=Host(\"{preview_host}\")"),
            format!(
                "traefik.http.routers.{container_name}.entrypoints={}",
                self.config.traefik_entrypoint
            ),
            format!(
                "traefik.http.services.{container_name}.loadbalancer.server.port={}",
                recipe.service_port()
            ),
        ];
        if self.config.traefik_tls {
            labels.push(format!("traefik.http.routers.{container_name}.tls=true"));
        }

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name.clone(),
            "--network".to_string(),
            self.config.docker_network.clone(),
        ];
        for label in labels {
            args.push("--label".to_string());
            args.push(label);
        }

        let scope = if deployment.kind == KIND_PRODUCTION {
            SCOPE_PRODUCTION
        } else {
            SCOPE_PREVIEW
        };
        let mut conn = self.pool.get().await?;
        let mut envs = env_service::decrypted_env(
            &mut conn,
            &self.config.encrypt_key,
            project.id,
            scope,
        )
        .await?;
        drop(conn);
        // Always provide PORT; apps may ignore it.
        envs.push("PORT=3000".to_string());
        for env in envs {
            args.push("-e".to_string());
            args.push(env);
        }
        args.push(image_ref.clone());

        self.run_docker(deployment.id, STREAM_SYSTEM, args)
            .await
            .map_err(|e| anyhow::anyhow!("docker run: {e}"))?;

        // `extracted` is dropped here, releasing the temp directory.
        Ok(BuildOutcome {
            image_ref,
            container_name,
            service_port: recipe.service_port(),
            preview_url,
        })
    }

    /// Record the failure and transition to FAILED. Best-effort by design:
    /// the build error itself is what propagates to the caller.
    async fn fail(&self, deployment_id: Uuid, msg: &str) {
        tracing::warn!(deployment_id = %deployment_id, "Build failed: {msg}");
        if let Ok(mut conn) = self.pool.get().await {
            let _ = deployment_service::append_log_chunk(
                &mut conn,
                deployment_id,
                STREAM_SYSTEM,
                &format!("{msg}\n"),
            )
            .await;
            let _ =
                deployment_service::add_event(&mut conn, deployment_id, STATUS_FAILED, msg).await;
            let _ = deployment_service::mark_failed(&mut conn, deployment_id).await;
        }
    }

    /// Run one docker command, streaming its output into the log journal.
    async fn run_docker(
        &self,
        deployment_id: Uuid,
        stream: &'static str,
        args: Vec<String>,
    ) -> anyhow::Result<()> {
        tracing::debug!(deployment_id = %deployment_id, args = ?args, "docker");
        let mut child = Command::new("docker")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawn docker: {e}"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("missing child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("missing child stderr"))?;

        let out = tokio::spawn(drain(
            stdout,
            LogSink::new(self.pool.clone(), deployment_id, stream),
        ));
        let err = tokio::spawn(drain(
            stderr,
            LogSink::new(self.pool.clone(), deployment_id, stream),
        ));

        let status = child.wait().await?;
        let _ = out.await;
        let _ = err.await;

        if !status.success() {
            anyhow::bail!("docker {} exited with {status}", args[0]);
        }
        Ok(())
    }
}
