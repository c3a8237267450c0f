use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file {path}: {message}")]
    Open { path: String, message: String },
    #[error("Failed to parse config: {message}")]
    Parse { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Capacity of the loader event and error broadcast channels
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Merge the shared configuration into every built config
    #[serde(default = "default_true")]
    pub merge_shared_config: bool,

    /// Run the pipeline once when the background loop starts
    #[serde(default)]
    pub activate_on_start: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            merge_shared_config: default_true(),
            activate_on_start: false,
        }
    }
}

impl LoaderConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        from_file(path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            channel: None,
            poll_interval: default_poll_interval(),
        }
    }
}

/// Plain-text credentials as they appear in a manifest or secret file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub token: String,
}

/// On-disk form of [`SharedConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedConfigFile {
    pub tenant: TenantIdentity,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user_id: String,
    pub token: SecretString,
}

impl From<CredentialsConfig> for Credentials {
    fn from(config: CredentialsConfig) -> Self {
        Self {
            user_id: config.user_id,
            token: SecretString::from(config.token),
        }
    }
}

/// # Shared Configuration
///
/// Tenant identity, credentials and notification settings handed to every
/// config builder. Immutable once the coordinator is built.
///
/// The token is kept in a `SecretString` and only exposed when a config is
/// materialized for a downstream application.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    pub tenant: TenantIdentity,
    pub credentials: Credentials,
    pub notifications: NotificationSettings,
}

impl From<SharedConfigFile> for SharedConfig {
    fn from(file: SharedConfigFile) -> Self {
        Self {
            tenant: file.tenant,
            credentials: file.credentials.into(),
            notifications: file.notifications,
        }
    }
}

impl SharedConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let file: SharedConfigFile = from_file(path)?;
        Ok(file.into())
    }

    /// Entries merged into every built config.
    pub fn to_entries(&self) -> Map<String, Value> {
        let mut entries = Map::new();
        entries.insert(
            "tenant".to_string(),
            serde_json::to_value(&self.tenant).unwrap_or(Value::Null),
        );
        let mut credentials = Map::new();
        credentials.insert(
            "user_id".to_string(),
            Value::String(self.credentials.user_id.clone()),
        );
        credentials.insert(
            "token".to_string(),
            Value::String(self.credentials.token.expose_secret().to_string()),
        );
        entries.insert("credentials".to_string(), Value::Object(credentials));
        entries.insert(
            "notifications".to_string(),
            serde_json::to_value(&self.notifications).unwrap_or(Value::Null),
        );
        entries
    }

    /// Fills in shared entries the builder left unset. Non-object configs
    /// are returned untouched.
    pub fn merge_into(&self, config: Value) -> Value {
        match config {
            Value::Object(mut map) => {
                for (key, value) in self.to_entries() {
                    map.entry(key).or_insert(value);
                }
                Value::Object(map)
            }
            other => other,
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConfigError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    serde_json::from_str(s).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

// Duration as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
