use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEV_SESSION_SECRET: &str = "dev-session-secret";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub max_body_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/server.db".into(),
            session_secret: DEV_SESSION_SECRET.into(),
            session_ttl_seconds: 3600,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Defaults, then `server.toml` in the working directory, then `APP__*`
/// environment variables. A bare `DATABASE_URL` is used when
/// `APP__DATABASE_URL` is unset.
pub fn load_settings() -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let mut builder = Config::builder()
        .set_default("server_bind", defaults.server_bind)?
        .set_default("database_url", defaults.database_url)?
        .set_default("session_secret", defaults.session_secret)?
        .set_default("session_ttl_seconds", defaults.session_ttl_seconds)?
        .set_default("max_body_bytes", defaults.max_body_bytes as i64)?
        .add_source(File::with_name("server").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    if std::env::var_os("APP__DATABASE_URL").is_none() {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database_url", v)?;
        }
    }

    builder
        .build()
        .context("failed to read server settings")?
        .try_deserialize()
        .context("invalid server settings")
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        return sqlite_url_for_path(path);
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return sqlite_url_for_path(path);
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    sqlite_url_for_path(raw_database_url)
}

fn sqlite_url_for_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if has_drive_letter(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
