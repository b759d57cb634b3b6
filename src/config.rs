use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Settings shared by the ingester and the viewer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_channel_capacity: usize,

    /// Full Postgres URL. Takes precedence over `database_name`.
    pub database_url: Option<String>,
    pub database_name: String,
    pub db_max_connections: u32,

    pub http_addr: SocketAddr,
    pub log_dir: String,
    pub viewer_utc_timestamps: bool,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialAppConfig {
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_topic: Option<String>,
    mqtt_client_id: Option<String>,
    mqtt_keep_alive_secs: Option<u64>,
    mqtt_channel_capacity: Option<usize>,
    database_url: Option<String>,
    database_name: Option<String>,
    db_max_connections: Option<u32>,
    http_addr: Option<String>,
    log_dir: Option<String>,
    viewer_utc_timestamps: Option<bool>,
}

pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_TOPIC: &str = "arm/edx/lab4";
pub const DEFAULT_MQTT_CLIENT_ID: &str = "edx-mqtt";
pub const DEFAULT_DATABASE_NAME: &str = "cloud-3";
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:5000";

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AppConfig {
    /// Loads configuration: defaults, then the optional TOML file, then the
    /// environment (including a `.env` file). Later layers win.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => read_file_layer(Path::new(path_str))?,
            None => PartialAppConfig::default(),
        };

        let env_config: PartialAppConfig = envy::from_env::<PartialAppConfig>()?;

        Self::merge(env_config, file_config)
    }

    fn merge(env_config: PartialAppConfig, file_config: PartialAppConfig) -> Result<Self, ConfigError> {
        let http_addr_str = env_config
            .http_addr
            .or(file_config.http_addr)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = http_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_addr",
                reason: format!("'{http_addr_str}': {e}"),
            })?;

        let mqtt_topic = env_config
            .mqtt_topic
            .or(file_config.mqtt_topic)
            .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string());
        if mqtt_topic.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mqtt_topic",
                reason: "must not be empty".to_string(),
            });
        }

        let mqtt_channel_capacity = env_config
            .mqtt_channel_capacity
            .or(file_config.mqtt_channel_capacity)
            .unwrap_or(10);
        if mqtt_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mqtt_channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        let db_max_connections = env_config
            .db_max_connections
            .or(file_config.db_max_connections)
            .unwrap_or(5);
        if db_max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "db_max_connections",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(AppConfig {
            mqtt_host: env_config
                .mqtt_host
                .or(file_config.mqtt_host)
                .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            mqtt_port: env_config
                .mqtt_port
                .or(file_config.mqtt_port)
                .unwrap_or(DEFAULT_MQTT_PORT),
            mqtt_topic,
            mqtt_client_id: env_config
                .mqtt_client_id
                .or(file_config.mqtt_client_id)
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            mqtt_keep_alive_secs: env_config
                .mqtt_keep_alive_secs
                .or(file_config.mqtt_keep_alive_secs)
                .unwrap_or(60),
            mqtt_channel_capacity,
            database_url: env_config.database_url.or(file_config.database_url),
            database_name: env_config
                .database_name
                .or(file_config.database_name)
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            db_max_connections,
            http_addr,
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            viewer_utc_timestamps: env_config
                .viewer_utc_timestamps
                .or(file_config.viewer_utc_timestamps)
                .unwrap_or(false),
        })
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }
}

fn read_file_layer(path: &Path) -> Result<PartialAppConfig, ConfigError> {
    if !path.exists() {
        return Ok(PartialAppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn defaults() -> AppConfig {
        AppConfig::merge(PartialAppConfig::default(), PartialAppConfig::default()).unwrap()
    }

    #[test]
    fn test_defaults_match_lab_setup() {
        let config = defaults();
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "arm/edx/lab4");
        assert_eq!(config.mqtt_client_id, "edx-mqtt");
        assert_eq!(config.database_name, "cloud-3");
        assert!(config.database_url.is_none());
        assert_eq!(config.http_addr, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_dir, "logs");
        assert!(!config.viewer_utc_timestamps);
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
mqtt_host = "broker.lan"
mqtt_port = 8883
database_name = "lab"
http_addr = "0.0.0.0:8080"
"#
        )
        .unwrap();

        let file_config = read_file_layer(&path).unwrap();
        let config = AppConfig::merge(PartialAppConfig::default(), file_config).unwrap();

        assert_eq!(config.mqtt_host, "broker.lan");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.database_name, "lab");
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.mqtt_topic, DEFAULT_MQTT_TOPIC);
    }

    #[test]
    fn test_env_layer_wins_over_file() {
        let file_config = PartialAppConfig {
            mqtt_topic: Some("from/file".to_string()),
            mqtt_port: Some(1884),
            ..Default::default()
        };
        let env_config = PartialAppConfig {
            mqtt_topic: Some("from/env".to_string()),
            ..Default::default()
        };

        let config = AppConfig::merge(env_config, file_config).unwrap();
        assert_eq!(config.mqtt_topic, "from/env");
        assert_eq!(config.mqtt_port, 1884);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layer = read_file_layer(&dir.path().join("absent.toml")).unwrap();
        assert!(layer.mqtt_host.is_none());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "mqtt_port = \"not a number\"").unwrap();

        let result = read_file_layer(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_http_addr_is_rejected() {
        let env_config = PartialAppConfig {
            http_addr: Some("nowhere".to_string()),
            ..Default::default()
        };
        let result = AppConfig::merge(env_config, PartialAppConfig::default());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "http_addr", .. })
        ));
    }

    #[test]
    fn test_empty_topic_is_rejected() {
        let env_config = PartialAppConfig {
            mqtt_topic: Some(String::new()),
            ..Default::default()
        };
        assert!(AppConfig::merge(env_config, PartialAppConfig::default()).is_err());
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        let file_config = PartialAppConfig {
            db_max_connections: Some(0),
            ..Default::default()
        };
        let result = AppConfig::merge(PartialAppConfig::default(), file_config);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "db_max_connections", .. })
        ));

        let file_config = PartialAppConfig {
            db_max_connections: Some(1),
            ..Default::default()
        };
        let config = AppConfig::merge(PartialAppConfig::default(), file_config).unwrap();
        assert_eq!(config.db_max_connections, 1);
    }
}
