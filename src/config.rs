//! Configuration for the planline server

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Treat unauthenticated requests as the first global admin.
    /// Local development only.
    #[serde(default)]
    pub dev_admin_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Look-ahead window for schedule alerts
    #[serde(default = "default_horizon_days")]
    pub default_horizon_days: u32,

    /// Phase-grouped schedule JSON served by /api/v1/schedule; the bundled
    /// sample when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3040
}

fn default_db_path() -> PathBuf {
    PathBuf::from("planline.sqlite")
}

fn default_horizon_days() -> u32 {
    3
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_horizon_days: default_horizon_days(),
            source: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: default_bind(),
                port: default_port(),
            },
            database: DatabaseConfig {
                path: default_db_path(),
            },
            auth: AuthConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("PLANLINE_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        // Docker volume
        let data_config = PathBuf::from("/data/config.toml");
        if data_config.exists() {
            return Ok(data_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("planline");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let with_comments = format!(
            "# planline configuration\n\n\
             {}\n\n\
             # Create users with: planline user add --email <email> --role ADMIN\n\
             # Then issue a token: planline token --email <email>\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }
}

/// Prefix of every issued API token
pub const TOKEN_PREFIX: &str = "plk_";

/// Lookup id of a `plk_<id>_<secret>` token
pub fn token_id(token: &str) -> Option<&str> {
    let (id, secret) = token.strip_prefix(TOKEN_PREFIX)?.split_once('_')?;
    (!id.is_empty() && !secret.is_empty()).then_some(id)
}

/// Hash a token using argon2
pub fn hash_token(token: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash token: {}", e))?;
    Ok(hash.to_string())
}

/// Check a presented token against a stored argon2 hash
pub fn verify_token(token: &str, token_hash: &str) -> bool {
    match PasswordHash::new(token_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(token.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.server.port = 8080;
        cfg.auth.dev_admin_fallback = true;
        cfg.schedule.default_horizon_days = 7;
        cfg.save_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# planline configuration"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert!(loaded.auth.dev_admin_fallback);
        assert_eq!(loaded.schedule.default_horizon_days, 7);
        assert!(loaded.schedule.source.is_none());
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [database]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.database.path, PathBuf::from("planline.sqlite"));
        assert!(!cfg.auth.dev_admin_fallback);
        assert_eq!(cfg.schedule.default_horizon_days, 3);
    }

    #[test]
    fn token_hash_verifies_only_its_token() {
        let hash = hash_token("plk_secret").unwrap();
        assert!(verify_token("plk_secret", &hash));
        assert!(!verify_token("plk_other", &hash));
        assert!(!verify_token("plk_secret", "not-a-hash"));
    }

    #[test]
    fn token_id_is_the_segment_after_the_prefix() {
        assert_eq!(token_id("plk_ab12CD34_s3cret"), Some("ab12CD34"));
        assert_eq!(token_id("plk_ab12CD34_"), None);
        assert_eq!(token_id("plk_nosecret"), None);
        assert_eq!(token_id("tk_ab12CD34_s3cret"), None);
    }
}
