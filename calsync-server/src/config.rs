//! Environment-backed server configuration.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: String,
    pub http_timeout_secs: u64,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub auth_password_hash: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 6765_i64)?
            .set_default("data_dir", "./data")?
            .set_default("http_timeout_secs", 30_i64)?
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize::<Self>()?;

        if cfg.auth_password.is_some() && cfg.auth_password_hash.is_some() {
            bail!("AUTH_PASSWORD and AUTH_PASSWORD_HASH are mutually exclusive; set only one");
        }

        Ok(cfg)
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("caldav-sync.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_lives_under_data_dir() {
        let cfg = AppConfig {
            server_host: "0.0.0.0".to_string(),
            server_port: 6765,
            data_dir: "/var/lib/calsync".to_string(),
            http_timeout_secs: 30,
            auth_username: None,
            auth_password: None,
            auth_password_hash: None,
        };
        assert_eq!(
            cfg.db_path(),
            PathBuf::from("/var/lib/calsync/caldav-sync.db")
        );
    }
}
