//! Content-addressed asset manifest.
//!
//! At setup the asset tree is walked once and every readable file hashed.
//! Templates then ask for `versioned("css/app.css")` and get
//! `/assets/css/app.css?v=<hash>`, so a changed file gets a new URL and
//! browsers can cache the old one forever.
//!
//! The manifest is a snapshot. Files changed after setup keep their old
//! hash until the process restarts.

pub mod hash;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use percent_encoding::percent_decode_str;
use tracing::{debug, info, warn};

use crate::envelope::Message;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

pub use hash::{content_hash, hash_bytes};

/// URL prefix assets are served under.
pub const PREFIX: &str = "/assets/";

pub(crate) const ROUTE: &str = "/assets/{*path}";

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// What to do with entries that cannot be read during the walk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ScanMode {
    /// Skip them silently.
    #[default]
    Lenient,
    /// Skip them, but keep a record in [`Manifest::skipped`].
    Strict,
}

/// An entry left out of the manifest.
#[derive(Clone, Debug)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: String,
}

/// Relative asset path → content hash.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    hashes: HashMap<String, String>,
    skipped: Vec<Skipped>,
}

impl Manifest {
    /// Hashes every readable file under `root`. See [`Manifest::build_with`].
    pub fn build(root: impl AsRef<Path>) -> Result<Self, Error> {
        Self::build_with(root, ScanMode::Lenient)
    }

    /// Hashes every readable file under `root`.
    ///
    /// Keys are paths relative to `root` joined with `/`. Directories yield
    /// no entry. A file or sub-directory that cannot be read is skipped and
    /// the walk goes on; only an unreadable `root` is an error.
    pub fn build_with(root: impl AsRef<Path>, mode: ScanMode) -> Result<Self, Error> {
        let root = root.as_ref();
        let root_error = |source| Error::AssetRoot { path: root.to_path_buf(), source };

        let meta = fs::metadata(root).map_err(root_error)?;
        if !meta.is_dir() {
            return Err(root_error(io::Error::new(io::ErrorKind::NotADirectory, "not a directory")));
        }
        let top = fs::read_dir(root).map_err(root_error)?;

        let mut manifest = Self::default();
        let mut pending: Vec<fs::ReadDir> = vec![top];

        while let Some(dir) = pending.last_mut() {
            let Some(entry) = dir.next() else {
                pending.pop();
                continue;
            };

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    manifest.skip(mode, root.to_path_buf(), e);
                    continue;
                }
            };
            let path = entry.path();

            // Symlinks are not followed into directories; a link to a file is
            // hashed through the link.
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    manifest.skip(mode, path, e);
                    continue;
                }
            };

            if file_type.is_dir() {
                match fs::read_dir(&path) {
                    Ok(sub) => pending.push(sub),
                    Err(e) => manifest.skip(mode, path, e),
                }
                continue;
            }

            match File::open(&path).and_then(content_hash) {
                Ok(hash) => {
                    manifest.hashes.insert(manifest_key(root, &path), hash);
                }
                Err(e) => manifest.skip(mode, path, e),
            }
        }

        info!(root = %root.display(), files = manifest.hashes.len(), "asset manifest built");
        Ok(manifest)
    }

    fn skip(&mut self, mode: ScanMode, path: PathBuf, err: io::Error) {
        match mode {
            ScanMode::Lenient => debug!(path = %path.display(), "skipping asset: {err}"),
            ScanMode::Strict => {
                warn!(path = %path.display(), "skipping asset: {err}");
                self.skipped.push(Skipped { path, reason: err.to_string() });
            }
        }
    }

    /// The hash recorded for `path`, relative to the assets root.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.hashes.get(path).map(String::as_str)
    }

    /// The public URL for `path`, with `?v=<hash>` when the file is known.
    ///
    /// ```rust
    /// # use tsu_rpc::assets::Manifest;
    /// let manifest = Manifest::default();
    /// assert_eq!(manifest.versioned("app.js"), "/assets/app.js");
    /// ```
    pub fn versioned(&self, path: &str) -> String {
        match self.get(path) {
            Some(hash) => format!("{PREFIX}{path}?v={hash}"),
            None => format!("{PREFIX}{path}"),
        }
    }

    pub fn len(&self) -> usize { self.hashes.len() }
    pub fn is_empty(&self) -> bool { self.hashes.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hashes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries left out of the manifest; always empty in
    /// [`ScanMode::Lenient`].
    pub fn skipped(&self) -> &[Skipped] { &self.skipped }
}

fn manifest_key(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

// ── Serving ──────────────────────────────────────────────────────────────────

/// `GET /assets/{*path}`.
///
/// The path is percent-decoded first. Anything that escapes `root` or cannot
/// be read is a 404. A request whose `v` matches the current hash is marked
/// immutable.
pub(crate) async fn serve(root: Arc<PathBuf>, manifest: Arc<Manifest>, req: Request) -> Response {
    let Some(rel) = req.param("path").and_then(decode).filter(|p| is_contained(p)) else {
        return not_found();
    };

    let file = root.join(&rel);
    let body = match tokio::fs::read(&file).await {
        Ok(body) => body,
        Err(e) => {
            debug!(path = %file.display(), "asset unavailable: {e}");
            return not_found();
        }
    };

    let content_type = mime_guess::from_path(&file).first_or_octet_stream();
    let mut res = Response::builder();
    if let (Some(v), Some(hash)) = (req.query_param("v"), manifest.get(&rel)) {
        if v == hash {
            res = res.header("cache-control", IMMUTABLE);
        }
    }
    res.bytes(content_type.as_ref(), body)
}

fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw).decode_utf8().ok().map(Cow::into_owned)
}

fn is_contained(rel: &str) -> bool {
    !rel.is_empty() && Path::new(rel).components().all(|c| matches!(c, Component::Normal(_)))
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .message(&Message::error("not found"))
}
