use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::policy::default_policy_table;
use crate::auth::AccessPolicy;
use crate::{Error, Result};

/// Server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address.
    pub server: ServerSettings,
    /// Token signing and access rules.
    pub auth: AuthSettings,
    /// Asset storage.
    pub assets: AssetSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
}

/// Server listening settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
}

impl ServerSettings {
    /// Converts host and port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Token settings and the method access table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret used to sign access tokens.
    pub secret: String,
    /// Lifetime of issued tokens, in seconds.
    pub token_ttl_secs: u64,
    /// Method path to allowed role names. Methods not listed are open.
    pub policy: BTreeMap<String, Vec<String>>,
}

impl AuthSettings {
    /// Token lifetime as a [`Duration`].
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Builds the access policy from the configured table.
    pub fn access_policy(&self) -> Result<AccessPolicy> {
        AccessPolicy::from_table(&self.policy)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: "secret".to_string(),
            token_ttl_secs: 15 * 60,
            policy: default_policy_table(),
        }
    }
}

/// Asset storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Folder uploaded assets are written to.
    pub folder: PathBuf,
    /// Largest accepted asset, in bytes. At most `u32::MAX`.
    pub max_size: usize,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("assets"),
            max_size: 1 << 20,
        }
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Converts host and port into a socket address for metrics server.
    pub fn addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.host, self.port)
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("invalid address {host}:{port}: {e}")))
}

impl ServerConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `SERVER_` prefix, `__` separating sections
    ///    (e.g. `SERVER_SERVER__PORT=9000`, `SERVER_AUTH__TOKEN_TTL_SECS=60`)
    /// 2. TOML configuration file (if exists)
    /// 3. Built-in defaults
    ///
    /// The TOML file path can be set via `SERVER_CONFIG_PATH`; it defaults to
    /// `config/server.toml` and is skipped when missing.
    ///
    /// ```toml
    /// [server]
    /// host = "0.0.0.0"
    /// port = 8080
    ///
    /// [auth]
    /// secret = "change-me"
    /// token_ttl_secs = 900
    ///
    /// [auth.policy]
    /// "/catalog.CatalogService/CreateEntity" = ["admin"]
    /// "/catalog.CatalogService/RateEntity" = ["admin", "user"]
    ///
    /// [assets]
    /// folder = "assets"
    /// max_size = 1048576
    /// ```
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed.
    pub fn from_env() -> Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("SERVER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SERVER_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the configuration before the server starts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.is_empty() {
            return Err(Error::Config("auth secret cannot be empty".to_string()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(Error::Config("token_ttl_secs cannot be zero".to_string()));
        }
        if self.assets.max_size == 0 {
            return Err(Error::Config("asset max_size cannot be zero".to_string()));
        }
        if u32::try_from(self.assets.max_size).is_err() {
            return Err(Error::Config(format!(
                "asset max_size cannot exceed {} bytes",
                u32::MAX
            )));
        }

        self.auth
            .access_policy()
            .map_err(|e| Error::Config(format!("invalid access policy: {e}")))?;
        self.server.addr()?;
        if self.metrics.enabled {
            self.metrics.addr()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::methods;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();

        assert_eq!(config.assets.max_size, 1 << 20);
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(900));
        assert!(config
            .auth
            .access_policy()
            .unwrap()
            .is_protected(methods::UPLOAD_ASSET));
    }

    #[test]
    fn rejects_empty_secret() {
        let mut config = ServerConfig::default();
        config.auth.secret.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn rejects_max_size_beyond_reported_range() {
        let mut config = ServerConfig::default();
        config.assets.max_size = u32::MAX as usize;
        config.validate().unwrap();

        config.assets.max_size = u32::MAX as usize + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = ServerConfig::default();
        config.assets.max_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_role() {
        let mut config = ServerConfig::default();
        config
            .auth
            .policy
            .insert(methods::SEARCH_ENTITIES.to_string(), vec!["guest".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/server.toml",
                r#"
                [server]
                port = 9000

                [assets]
                max_size = 2048
                "#,
            )?;
            jail.set_env("SERVER_AUTH__SECRET", "from-env");
            jail.set_env("SERVER_AUTH__TOKEN_TTL_SECS", "60");

            let config = ServerConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.host, "127.0.0.1");
            assert_eq!(config.assets.max_size, 2048);
            assert_eq!(config.auth.secret, "from-env");
            assert_eq!(config.auth.token_ttl_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn malformed_sources_are_errors() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/server.toml", "[auth\nsecret = ")?;
            assert!(matches!(ServerConfig::from_env(), Err(Error::Config(_))));

            jail.create_file("config/server.toml", "")?;
            jail.set_env("SERVER_AUTH__TOKEN_TTL_SECS", "soon");
            assert!(matches!(ServerConfig::from_env(), Err(Error::Config(_))));
            Ok(())
        });
    }
}
