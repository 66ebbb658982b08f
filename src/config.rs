use crate::{Error, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use log::{info, warn};

/// Shortest secret accepted for signing session cookies.
pub const MIN_SECRET_KEY_LEN: usize = 32;

pub struct Config {
    pub database_path: PathBuf,
    pub secret_key: Option<String>,
    pub debug: bool,
    pub allowed_hosts: Vec<String>,
    pub bind_address: String,
}

impl Config {
    /// Reads the environment, after loading a `.env` file if there is one.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }

        let database_path = match var("DATABASE_URL") {
            Some(url) => PathBuf::from(url.strip_prefix("sqlite://").unwrap_or(&url)),
            None => data_path()?.join("data.sqlite"),
        };

        Ok(Self {
            database_path,
            secret_key: var("SECRET_KEY"),
            debug: try_load("DEBUG", "false")?,
            allowed_hosts: parse_hosts(&var("ALLOWED_HOSTS").unwrap_or_default()),
            bind_address: try_load("BIND_ADDRESS", "127.0.0.1:8000")?,
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    pub fn signing_secret(&self) -> Result<&str> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or_else(|| Error::Config("SECRET_KEY is not set".into()))?;
        if secret.len() < MIN_SECRET_KEY_LEN {
            return Err(Error::Config(format!(
                "SECRET_KEY must be at least {MIN_SECRET_KEY_LEN} bytes"
            )));
        }
        Ok(secret)
    }

    /// Host names requests may address. With none configured, debug mode falls back to the
    /// loopback names and production refuses everything.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = strip_port(host).to_lowercase();
        let host = host.as_str();
        if self.allowed_hosts.is_empty() {
            return self.debug && ["localhost", "127.0.0.1", "[::1]"].contains(&host);
        }
        self.allowed_hosts.iter().any(|allowed| {
            allowed == "*"
                || allowed == host
                || allowed
                    .strip_prefix('.')
                    .is_some_and(|domain| host == domain || host.ends_with(&format!(".{domain}")))
        })
    }
}

/// This is where the database lives on-disk when `DATABASE_URL` is unset. On Linux it should be
/// like: `~/.local/share/tasty_ideas/`
fn data_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| Error::Config("failed to get user home directory".into()))?;
    let path = dirs.data_dir().join("tasty_ideas");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            Error::Config(format!("invalid {key}: {e}"))
        })
}

fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_inclusive(']').next().unwrap_or(host);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

#[cfg(test)]
fn config(debug: bool, allowed_hosts: &[&str]) -> Config {
    Config {
        database_path: PathBuf::from(":memory:"),
        secret_key: None,
        debug,
        allowed_hosts: allowed_hosts.iter().map(|h| h.to_string()).collect(),
        bind_address: "127.0.0.1:8000".into(),
    }
}

#[test]
fn hosts_parsed() {
    assert_eq!(
        parse_hosts(" localhost, Example.com ,,"),
        vec!["localhost".to_owned(), "example.com".to_owned()]
    );
}

#[test]
fn loopback_allowed_only_in_debug() {
    assert!(config(true, &[]).host_allowed("localhost:8000"));
    assert!(config(true, &[]).host_allowed("[::1]:8000"));
    assert!(!config(false, &[]).host_allowed("localhost:8000"));
}

#[test]
fn configured_hosts() {
    let c = config(false, &["tasty.example", ".food.example"]);
    assert!(c.host_allowed("tasty.example"));
    assert!(c.host_allowed("food.example:443"));
    assert!(c.host_allowed("www.food.example"));
    assert!(!c.host_allowed("evil.example"));
    assert!(config(false, &["*"]).host_allowed("anything"));
}

#[test]
fn short_secret_rejected() {
    let mut c = config(false, &[]);
    assert!(c.signing_secret().is_err());
    c.secret_key = Some("short".into());
    assert!(c.signing_secret().is_err());
    c.secret_key = Some("x".repeat(MIN_SECRET_KEY_LEN));
    assert!(c.signing_secret().is_ok());
}
