//! Schema migration, applied at startup with `batch_execute`.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- opencel tables
-- ================================================================

CREATE TABLE IF NOT EXISTS users (
    id                UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    email             VARCHAR(255) NOT NULL UNIQUE,
    password_hash     VARCHAR(255) NOT NULL,
    is_instance_admin BOOLEAN NOT NULL DEFAULT FALSE,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS organizations (
    id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    slug       VARCHAR(64) NOT NULL UNIQUE,
    name       VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS organization_memberships (
    org_id     UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    user_id    UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role       VARCHAR(16) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (org_id, user_id)
);

CREATE TABLE IF NOT EXISTS projects (
    id                       UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    org_id                   UUID NOT NULL REFERENCES organizations(id),
    slug                     VARCHAR(64) NOT NULL,
    repo_full_name           VARCHAR(255) NOT NULL UNIQUE,
    github_installation_id   BIGINT,
    github_default_branch    VARCHAR(255),
    production_deployment_id UUID,
    created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (org_id, slug)
);

CREATE TABLE IF NOT EXISTS deployments (
    id             UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    project_id     UUID NOT NULL REFERENCES projects(id),
    git_sha        VARCHAR(64) NOT NULL,
    git_ref        VARCHAR(255) NOT NULL,
    kind           VARCHAR(16) NOT NULL,
    status         VARCHAR(16) NOT NULL DEFAULT 'QUEUED',
    image_ref      VARCHAR(512),
    container_name VARCHAR(255),
    service_port   INTEGER NOT NULL DEFAULT 3000,
    preview_url    VARCHAR(512),
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    promoted_at    TIMESTAMPTZ
);

-- The production pointer is nulled before the referenced deployment can go.
ALTER TABLE projects
    DROP CONSTRAINT IF EXISTS projects_production_deployment_fk;
ALTER TABLE projects
    ADD CONSTRAINT projects_production_deployment_fk
    FOREIGN KEY (production_deployment_id) REFERENCES deployments(id);

CREATE INDEX IF NOT EXISTS idx_deployments_project ON deployments (project_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments (status);

CREATE TABLE IF NOT EXISTS deployment_events (
    id            BIGSERIAL PRIMARY KEY,
    deployment_id UUID NOT NULL REFERENCES deployments(id) ON DELETE CASCADE,
    kind          VARCHAR(16) NOT NULL,
    message       TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS deployment_log_chunks (
    id            BIGSERIAL PRIMARY KEY,
    deployment_id UUID NOT NULL REFERENCES deployments(id) ON DELETE CASCADE,
    ts            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    stream        VARCHAR(16) NOT NULL,
    chunk         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_chunks_deployment ON deployment_log_chunks (deployment_id, id);

CREATE TABLE IF NOT EXISTS project_env_vars (
    id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    scope      VARCHAR(16) NOT NULL,
    key        VARCHAR(255) NOT NULL,
    value_enc  BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (project_id, scope, key)
);

CREATE TABLE IF NOT EXISTS instance_settings (
    key        VARCHAR(64) PRIMARY KEY,
    value_json JSONB NOT NULL DEFAULT '{}'::jsonb,
    secret_enc BYTEA,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS admin_jobs (
    id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    kind               VARCHAR(32) NOT NULL,
    status             VARCHAR(16) NOT NULL DEFAULT 'queued',
    created_by_user_id UUID REFERENCES users(id),
    created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at         TIMESTAMPTZ,
    finished_at        TIMESTAMPTZ,
    error              TEXT
);

CREATE TABLE IF NOT EXISTS admin_job_logs (
    id     BIGSERIAL PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES admin_jobs(id) ON DELETE CASCADE,
    ts     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    stream VARCHAR(16) NOT NULL,
    chunk  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_tasks (
    id         BIGSERIAL PRIMARY KEY,
    queue      VARCHAR(32) NOT NULL,
    kind       VARCHAR(32) NOT NULL,
    payload    JSONB NOT NULL,
    status     VARCHAR(16) NOT NULL DEFAULT 'pending',
    attempts   INTEGER NOT NULL DEFAULT 0,
    error      TEXT,
    locked_at  TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_queue_tasks_claim ON queue_tasks (queue, status, id);
"#;

pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}
