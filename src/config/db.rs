use serde::{Deserialize, Serialize};

use super::{process_env, Env};
use crate::error::Error;

/// MySQL connection settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DbConfig {
    /// Env: `DB_HOST`. Default: `localhost`
    pub host: String,
    /// Env: `DB_PORT`. Default: `3306`
    pub port: u16,
    /// Env: `DB_NAME`
    pub name: String,
    /// Env: `DB_USER`
    pub user: String,
    /// Env: `DB_PASSWORD`
    pub password: String,
    /// Env: `DB_CONN_TIMEOUT`, milliseconds. Default: `5000`
    pub conn_timeout_ms: u64,
    /// Env: `DB_MAX_OPEN_CONNS`. Default: `10`
    pub max_open_conns: u32,
    /// Env: `DB_MAX_IDLE_CONNS`. Default: `5`
    pub max_idle_conns: u32,
    /// Env: `DB_CONN_MAX_LIFETIME_MINS`. Default: `5`
    pub conn_max_lifetime_mins: u64,
    /// Env: `DB_DEBUG_MODE`. Default: `false`
    pub debug_mode: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 3306,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            conn_timeout_ms: 5000,
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime_mins: 5,
            debug_mode: false,
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let env = Env::new(&lookup);
        let d = Self::default();
        Ok(Self {
            host: env.string("DB_HOST", &d.host),
            port: env.parse("DB_PORT", d.port)?,
            name: env.string("DB_NAME", ""),
            user: env.string("DB_USER", ""),
            password: env.string("DB_PASSWORD", ""),
            conn_timeout_ms: env.parse("DB_CONN_TIMEOUT", d.conn_timeout_ms)?,
            max_open_conns: env.parse("DB_MAX_OPEN_CONNS", d.max_open_conns)?,
            max_idle_conns: env.parse("DB_MAX_IDLE_CONNS", d.max_idle_conns)?,
            conn_max_lifetime_mins: env.parse("DB_CONN_MAX_LIFETIME_MINS", d.conn_max_lifetime_mins)?,
            debug_mode: env.flag("DB_DEBUG_MODE", d.debug_mode)?,
        })
    }

    /// Go-MySQL-driver style DSN:
    /// `user:password@tcp(host:port)/name?timeout=<ms>ms&parseTime=true`.
    pub fn dsn(&self) -> String {
        format!(
            "{}:{}@tcp({}:{})/{}?timeout={}ms&parseTime=true",
            self.user, self.password, self.host, self.port, self.name, self.conn_timeout_ms,
        )
    }
}
