//! HTML templates.
//!
//! Every file matching [`TemplateConfig::path`] is loaded into a
//! [`minijinja`] environment under its file name. With a static assets path
//! configured, templates get a `versioned(path)` function backed by the asset
//! manifest:
//!
//! ```text
//! <link rel="stylesheet" href="{{ versioned('css/app.css') }}">
//! ```
//!
//! Custom delimiters replace `{{ }}`, which helps when the same file is also
//! read by a client-side framework that wants `{{ }}` for itself.

use std::path::PathBuf;
use std::sync::Arc;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Value};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assets::Manifest;
use crate::error::Error;
use crate::response::Response;

/// Template and static asset setup.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    /// Glob selecting template files, e.g. `templates/*.html`.
    pub path: String,
    /// Variable delimiters replacing `{{` and `}}`, e.g. `("{[{", "}]}")`.
    #[serde(default)]
    pub delimiters: Option<(String, String)>,
    /// Asset root to hash and serve under `/assets/`.
    #[serde(default)]
    pub static_assets_path: Option<PathBuf>,
}

/// Loaded templates, shared read-only by all requests.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub(crate) fn load(cfg: &TemplateConfig, manifest: Option<Arc<Manifest>>) -> Result<Self, Error> {
        let mut env = Environment::new();

        if let Some((start, end)) = &cfg.delimiters {
            let syntax = SyntaxConfig::builder()
                .variable_delimiters(start.clone(), end.clone())
                .build()?;
            env.set_syntax(syntax);
        }

        if let Some(manifest) = manifest {
            // URLs are emitted as safe strings; HTML escaping would mangle `/`.
            env.add_function("versioned", move |path: String| {
                Value::from_safe_string(manifest.versioned(&path))
            });
        }

        let glob_error = |reason: String| Error::TemplateGlob { pattern: cfg.path.clone(), reason };
        let paths = glob::glob(&cfg.path).map_err(|e| glob_error(e.to_string()))?;

        let mut loaded = 0usize;
        for path in paths {
            let path = path.map_err(|e| glob_error(e.to_string()))?;
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            env.add_template_owned(name, source)?;
            loaded += 1;
        }

        if loaded == 0 {
            return Err(glob_error("pattern matches no files".to_owned()));
        }

        info!(pattern = %cfg.path, templates = loaded, "templates loaded");
        Ok(Self { env })
    }

    /// Renders template `name` with `ctx`.
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, Error> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }

    /// Renders into a `200 OK` HTML response, or a masked 500 on failure.
    pub fn page<S: Serialize>(&self, name: &str, ctx: S) -> Response {
        match self.render(name, ctx) {
            Ok(html) => Response::html(html),
            Err(e) => Response::masked(e, "internal server error"),
        }
    }
}
