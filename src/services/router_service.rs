//! Router reconciler.
//!
//! Projects the production pointers of all projects into a single dynamic
//! routing document and publishes it atomically (temp file + rename), so the
//! reverse proxy's file provider only ever observes a complete document.

use std::collections::BTreeMap;
use std::path::Path;

use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::DbPool;
use crate::services::{deployment_service, project_service};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingDocument {
    pub routers: BTreeMap<String, Router>,
    pub services: BTreeMap<String, Service>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub rule: String,
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
    pub service: String,
}

/// Serializes as an empty mapping; its presence marks the route TLS-terminating.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterTls {}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "loadBalancer")]
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub servers: Vec<Server>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
}

/// One project's production route, projected from the database.
#[derive(Debug, Clone)]
pub struct ProdRoute {
    pub project_slug: String,
    pub container_name: String,
    pub service_port: i32,
}

/// Pure projection -> document step. Deterministic: same inputs produce
/// byte-identical serialization (maps are ordered).
pub fn build_document(
    routes: &[ProdRoute],
    base_domain: &str,
    entrypoint: &str,
    tls: bool,
) -> RoutingDocument {
    let mut doc = RoutingDocument::default();
    for route in routes {
        let name = format!("prod-{}", route.project_slug);
        doc.routers.insert(
            name.clone(),
            Router {
                rule: format!("Host(\"{}.prod.{base_domain}\")", route.project_slug),
                entry_points: vec![entrypoint.to_string()],
                tls: if tls { Some(RouterTls {}) } else { None },
                service: name.clone(),
            },
        );
        doc.services.insert(
            name,
            Service {
                load_balancer: LoadBalancer {
                    servers: vec![Server {
                        url: format!("http://{}:{}", route.container_name, route.service_port),
                    }],
                },
            },
        );
    }
    doc
}

/// Serialize and atomically replace the live document. Readers observe
/// either the prior or the new file, never a partial one.
pub fn publish(doc: &RoutingDocument, path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let body = serde_yaml::to_string(doc)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))?;
    }

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tmp = path.with_file_name(format!(
        "{}.tmp.{nanos}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "routes.yml".to_string())
    ));

    std::fs::write(&tmp, body.as_bytes())?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Collect every project's production route from the database.
pub async fn project_routes(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<ProdRoute>> {
    let mut routes = Vec::new();
    for project in project_service::list_projects(conn).await? {
        let Some(deployment_id) = project.production_deployment_id else {
            continue;
        };
        let Some(deployment) = deployment_service::get_deployment(conn, deployment_id).await?
        else {
            continue;
        };
        let Some(container_name) = deployment.container_name else {
            continue;
        };
        if container_name.is_empty() {
            continue;
        }
        routes.push(ProdRoute {
            project_slug: project.slug,
            container_name,
            service_port: deployment.service_port,
        });
    }
    Ok(routes)
}

/// Rewrite the routing document from current database state.
pub async fn reconcile(pool: &DbPool, config: &Config) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    let routes = project_routes(&mut conn).await?;
    drop(conn);

    let doc = build_document(
        &routes,
        &config.base_domain,
        &config.traefik_entrypoint,
        config.traefik_tls,
    );
    publish(&doc, Path::new(&config.traefik_dynamic_path))?;

    crate::metrics::router_reconciled();
    tracing::info!(
        routes = doc.routers.len(),
        path = %config.traefik_dynamic_path,
        "Routing document published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Vec<ProdRoute> {
        vec![
            ProdRoute {
                project_slug: "web".to_string(),
                container_name: "opencel-deploy-abc".to_string(),
                service_port: 3000,
            },
            ProdRoute {
                project_slug: "api".to_string(),
                container_name: "opencel-deploy-def".to_string(),
                service_port: 80,
            },
        ]
    }

    #[test]
    fn document_shape_and_tls_attribute() {
        let doc = build_document(&routes(), "opencel.example", "websecure", true);
        let yaml = serde_yaml::to_string(&doc).unwrap();

        assert!(yaml.contains("prod-web"));
        assert!(yaml.contains(r#"Host("web.prod.opencel.example")"#));
        assert!(yaml.contains("http://opencel-deploy-abc:3000"));
        assert!(yaml.contains("tls: {}"));
        assert!(yaml.contains("entryPoints:\n"));
        assert!(yaml.contains("loadBalancer:"));

        let no_tls = build_document(&routes(), "opencel.example", "web", false);
        let yaml = serde_yaml::to_string(&no_tls).unwrap();
        assert!(!yaml.contains("tls"));
    }

    #[test]
    fn emission_is_idempotent() {
        let a = build_document(&routes(), "opencel.example", "websecure", true);
        let b = build_document(&routes(), "opencel.example", "websecure", true);
        assert_eq!(
            serde_yaml::to_string(&a).unwrap(),
            serde_yaml::to_string(&b).unwrap()
        );
    }

    #[test]
    fn publish_replaces_atomically_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamic").join("opencel.yml");

        publish(
            &build_document(&routes(), "a.example", "web", false),
            &path,
        )
        .unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("a.example"));

        publish(
            &build_document(&routes(), "b.example", "web", false),
            &path,
        )
        .unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert!(second.contains("b.example"));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn round_trips_through_yaml() {
        let doc = build_document(&routes(), "opencel.example", "websecure", true);
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let parsed: RoutingDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, doc);
    }
}
