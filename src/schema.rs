//! Diesel table definitions for the deploy platform.
//!
//! Tables: users, organizations, organization_memberships, projects,
//! deployments, deployment_events, deployment_log_chunks, project_env_vars,
//! instance_settings, admin_jobs, admin_job_logs, queue_tasks.

diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        password_hash -> Varchar,
        is_instance_admin -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    organizations (id) {
        id -> Uuid,
        slug -> Varchar,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    organization_memberships (org_id, user_id) {
        org_id -> Uuid,
        user_id -> Uuid,
        role -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    projects (id) {
        id -> Uuid,
        org_id -> Uuid,
        slug -> Varchar,
        repo_full_name -> Varchar,
        github_installation_id -> Nullable<Int8>,
        github_default_branch -> Nullable<Varchar>,
        production_deployment_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    deployments (id) {
        id -> Uuid,
        project_id -> Uuid,
        git_sha -> Varchar,
        git_ref -> Varchar,
        kind -> Varchar,
        status -> Varchar,
        image_ref -> Nullable<Varchar>,
        container_name -> Nullable<Varchar>,
        service_port -> Int4,
        preview_url -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        promoted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    deployment_events (id) {
        id -> Int8,
        deployment_id -> Uuid,
        kind -> Varchar,
        message -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    deployment_log_chunks (id) {
        id -> Int8,
        deployment_id -> Uuid,
        ts -> Timestamptz,
        stream -> Varchar,
        chunk -> Text,
    }
}

diesel::table! {
    project_env_vars (id) {
        id -> Uuid,
        project_id -> Uuid,
        scope -> Varchar,
        key -> Varchar,
        value_enc -> Bytea,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    instance_settings (key) {
        key -> Varchar,
        value_json -> Jsonb,
        secret_enc -> Nullable<Bytea>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    admin_jobs (id) {
        id -> Uuid,
        kind -> Varchar,
        status -> Varchar,
        created_by_user_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
        error -> Nullable<Text>,
    }
}

diesel::table! {
    admin_job_logs (id) {
        id -> Int8,
        job_id -> Uuid,
        ts -> Timestamptz,
        stream -> Varchar,
        chunk -> Text,
    }
}

diesel::table! {
    queue_tasks (id) {
        id -> Int8,
        queue -> Varchar,
        kind -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        attempts -> Int4,
        error -> Nullable<Text>,
        locked_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(organization_memberships -> organizations (org_id));
diesel::joinable!(organization_memberships -> users (user_id));
diesel::joinable!(projects -> organizations (org_id));
diesel::joinable!(deployments -> projects (project_id));
diesel::joinable!(deployment_events -> deployments (deployment_id));
diesel::joinable!(deployment_log_chunks -> deployments (deployment_id));
diesel::joinable!(project_env_vars -> projects (project_id));
diesel::joinable!(admin_job_logs -> admin_jobs (job_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    organizations,
    organization_memberships,
    projects,
    deployments,
    deployment_events,
    deployment_log_chunks,
    project_env_vars,
    instance_settings,
    admin_jobs,
    admin_job_logs,
    queue_tasks,
);
