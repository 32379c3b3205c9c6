//! Service layer — database operations and the deploy pipeline.

pub mod admin_service;
pub mod archive;
pub mod builder;
pub mod deployment_service;
pub mod env_service;
pub mod log_sink;
pub mod org_service;
pub mod project_service;
pub mod recipe;
pub mod router_service;
pub mod setup_service;
