//! Build recipe detection.
//!
//! A recipe is the pair (service port, synthesized build file) chosen from
//! the application root. Resolution order: explicit `opencel.json`, then a
//! `package.json` heuristic, then static fallback serving the repo root.

use std::path::Path;

use serde::Deserialize;

/// The synthesized build file dropped into the extracted tree.
pub const BUILD_FILE_NAME: &str = ".opencel.Dockerfile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// Static site served by nginx from `output_dir` after an optional
    /// node build stage.
    Static { output_dir: String },
    /// Node app started with `npm run start` on port 3000.
    Node,
}

#[derive(Debug, Deserialize)]
struct OpencelJson {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "outputDir", default)]
    output_dir: String,
}

impl Recipe {
    pub fn service_port(&self) -> i32 {
        match self {
            Recipe::Static { .. } => 80,
            Recipe::Node => 3000,
        }
    }

    pub fn dockerfile(&self) -> String {
        match self {
            Recipe::Node => node_dockerfile(),
            Recipe::Static { output_dir } => static_dockerfile(output_dir),
        }
    }
}

/// Inspect the application root and pick a recipe.
pub fn detect(app_dir: &Path) -> Recipe {
    // Optional explicit config.
    if let Ok(raw) = std::fs::read(app_dir.join("opencel.json")) {
        if let Ok(cfg) = serde_json::from_slice::<OpencelJson>(&raw) {
            if cfg.kind == "static" {
                let output_dir = if cfg.output_dir.is_empty() {
                    "dist".to_string()
                } else {
                    cfg.output_dir
                };
                return Recipe::Static { output_dir };
            }
        }
    }

    // Heuristic: package.json implies a node app.
    if app_dir.join("package.json").exists() {
        return Recipe::Node;
    }

    // Fallback static, serving the repo contents as html.
    Recipe::Static {
        output_dir: ".".to_string(),
    }
}

fn node_dockerfile() -> String {
    r#"FROM node:22-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN npm ci
COPY . .
RUN if [ -f package.json ] && node -e "const p=require('./package.json'); process.exit(p.scripts&&p.scripts.build?0:1)"; then npm run build; else echo "no build script"; fi

FROM node:22-alpine
WORKDIR /app
ENV NODE_ENV=production
COPY --from=build /app /app
EXPOSE 3000
CMD ["npm","run","start"]
"#
    .to_string()
}

fn static_dockerfile(output_dir: &str) -> String {
    format!(
        r#"FROM node:22-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN if [ -f package.json ]; then npm ci; fi
COPY . .
RUN if [ -f package.json ] && node -e "const p=require('./package.json'); process.exit(p.scripts&&p.scripts.build?0:1)"; then npm run build; else echo "no build script"; fi

FROM nginx:alpine
COPY --from=build /app/{output_dir} /usr/share/nginx/html
EXPOSE 80
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_static_config_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("opencel.json"),
            r#"{"type":"static","outputDir":"build"}"#,
        )
        .unwrap();
        // package.json present too, but opencel.json takes precedence.
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let recipe = detect(dir.path());
        assert_eq!(
            recipe,
            Recipe::Static {
                output_dir: "build".to_string()
            }
        );
        assert_eq!(recipe.service_port(), 80);
        assert!(recipe.dockerfile().contains("/app/build"));
    }

    #[test]
    fn static_output_dir_defaults_to_dist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("opencel.json"), r#"{"type":"static"}"#).unwrap();
        assert_eq!(
            detect(dir.path()),
            Recipe::Static {
                output_dir: "dist".to_string()
            }
        );
    }

    #[test]
    fn package_json_means_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"web"}"#).unwrap();
        let recipe = detect(dir.path());
        assert_eq!(recipe, Recipe::Node);
        assert_eq!(recipe.service_port(), 3000);
    }

    #[test]
    fn empty_directory_serves_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = detect(dir.path());
        assert_eq!(
            recipe,
            Recipe::Static {
                output_dir: ".".to_string()
            }
        );
        assert_eq!(recipe.service_port(), 80);
        assert!(recipe.dockerfile().contains("/app/."));
    }

    #[test]
    fn unknown_opencel_type_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("opencel.json"), r#"{"type":"rocket"}"#).unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect(dir.path()), Recipe::Node);
    }
}
