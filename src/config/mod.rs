//! Environment-sourced configuration.
//!
//! Every struct has a `Default` matching its documented defaults and two
//! constructors:
//!
//! - `from_env()` reads the process environment;
//! - `from_lookup(f)` reads through `f`, which is what tests use.
//!
//! An unset or empty variable keeps the default. A set variable that does
//! not parse is an [`Error::Config`] naming the key.
//!
//! ```rust
//! use tsu_rpc::config::DbConfig;
//!
//! let db = DbConfig::from_lookup(|key| (key == "DB_NAME").then(|| "orders".to_owned())).unwrap();
//! assert_eq!(db.dsn(), ":@tcp(localhost:3306)/orders?timeout=5000ms&parseTime=true");
//! ```

mod db;
mod services;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tls::TlsConfig;

pub use db::DbConfig;
pub use services::{AmqpConfig, RedisConfig, SentryConfig};

/// Variable lookup shared by every config struct.
pub(crate) struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl<'a> Env<'a> {
    pub(crate) fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self { lookup }
    }

    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    pub(crate) fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_owned())
    }

    pub(crate) fn parse<T>(&self, key: &'static str, default: T) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(key) {
            Some(v) => v.trim().parse().map_err(|e: T::Err| Error::Config { key, reason: e.to_string() }),
            None => Ok(default),
        }
    }

    /// Booleans in the usual spellings: `1 t true yes on` / `0 f false no off`.
    pub(crate) fn flag(&self, key: &'static str, default: bool) -> Result<bool, Error> {
        let Some(v) = self.raw(key) else { return Ok(default) };
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "on" => Ok(true),
            "0" | "f" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config { key, reason: format!("`{v}` is not a boolean") }),
        }
    }

    pub(crate) fn list(&self, key: &str) -> Vec<String> {
        self.raw(key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `host:port`, with IPv6 literals in brackets.
pub(crate) fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Listener configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Env: `HTTP_HOST`. Default: `0.0.0.0`
    pub host: String,
    /// Env: `HTTP_PORT`. Default: `8080`
    pub port: u16,
    /// Env: `HTTP_REQUEST_TIMEOUT_SECS`. Default: `0`, no timeout
    pub request_timeout_secs: u64,
    /// Env: `TLS_ENABLED`. Default: `false`
    pub tls_enabled: bool,
    /// Env: `TLS_CERT_FILE`
    pub tls_cert_file: PathBuf,
    /// Env: `TLS_KEY_FILE`
    pub tls_key_file: PathBuf,
    /// Env: `TRUSTED_PROXIES`, comma separated. Default: none
    pub trusted_proxies: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            request_timeout_secs: 0,
            tls_enabled: false,
            tls_cert_file: PathBuf::new(),
            tls_key_file: PathBuf::new(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let env = Env::new(&lookup);
        let d = Self::default();
        Ok(Self {
            host: env.string("HTTP_HOST", &d.host),
            port: env.parse("HTTP_PORT", d.port)?,
            request_timeout_secs: env.parse("HTTP_REQUEST_TIMEOUT_SECS", d.request_timeout_secs)?,
            tls_enabled: env.flag("TLS_ENABLED", d.tls_enabled)?,
            tls_cert_file: env.raw("TLS_CERT_FILE").map(PathBuf::from).unwrap_or_default(),
            tls_key_file: env.raw("TLS_KEY_FILE").map(PathBuf::from).unwrap_or_default(),
            trusted_proxies: env.list("TRUSTED_PROXIES"),
        })
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn addr(&self) -> String {
        host_port(&self.host, self.port)
    }

    pub fn tls(&self) -> TlsConfig {
        TlsConfig {
            enabled: self.tls_enabled,
            cert_filepath: self.tls_cert_file.clone(),
            key_filepath: self.tls_key_file.clone(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

#[cfg(test)]
pub(crate) fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
    let pairs: Vec<(String, String)> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}
