//! Configuration types for dbqueue.
//!
//! ## What
//!
//! - [`Config`] names the dialect, the shared table schema and every configured queue.
//! - [`QueueConfig`] describes one queue: its table, optional id sequence, failure
//!   policy and free-form settings.
//! - Configuration can be loaded from a YAML file, from environment variables, or built
//!   directly.
//!
//! ## How
//!
//! ```no_run
//! use dbqueue::config::Config;
//!
//! // Explicit file, then DBQUEUE_CONFIG_FILE, then DBQUEUE_* variables, then ./dbqueue.yaml
//! let config = Config::load_with_options(None::<String>).expect("configuration");
//! let dialect = config.dialect().expect("supported dialect");
//! ```
//!
//! Example file:
//!
//! ```yaml
//! dialect: postgresql
//! schema:
//!   ext_fields: [trace_id]
//! queues:
//!   - queue_id: mail
//!     table: tasks
//!     failure:
//!       retry_type: geometric_backoff
//!       retry_interval_seconds: 30
//!     settings:
//!       additional.batch: "10"
//! ```

use crate::dal::DatabaseDialect;
use crate::error::{Error, Result};
use crate::settings::{
    ExtSettings, ExtSettingsParser, FailureSettingsPolicy, QueueLocation, QueueTableSchema,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// Environment variable names
const ENV_DIALECT: &str = "DBQUEUE_DIALECT";
const ENV_TABLE: &str = "DBQUEUE_TABLE";
const ENV_QUEUE_ID: &str = "DBQUEUE_QUEUE_ID";
const ENV_ID_SEQUENCE: &str = "DBQUEUE_ID_SEQUENCE";
const ENV_CONFIG_FILE: &str = "DBQUEUE_CONFIG_FILE";

const DEFAULT_CONFIG_FILES: [&str; 2] = ["dbqueue.yaml", "dbqueue.yml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dialect name, see [`DatabaseDialect`] for the accepted spellings
    pub dialect: String,
    /// Column layout shared by every queue table
    #[serde(default)]
    pub schema: QueueTableSchema,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_id: String,
    pub table: String,
    #[serde(default)]
    pub id_sequence: Option<String>,
    /// Delay policy for picked tasks that are never resolved
    #[serde(default)]
    pub failure: FailureSettingsPolicy,
    /// Free-form settings; only `additional.*` keys reach [`ExtSettings`]
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl QueueConfig {
    pub fn new<Q: Into<String>, T: Into<String>>(queue_id: Q, table: T) -> Self {
        Self {
            queue_id: queue_id.into(),
            table: table.into(),
            id_sequence: None,
            failure: FailureSettingsPolicy::default(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_id_sequence<S: Into<String>>(mut self, id_sequence: S) -> Self {
        self.id_sequence = Some(id_sequence.into());
        self
    }

    pub fn location(&self) -> Result<QueueLocation> {
        QueueLocation::builder()
            .with_table_name(self.table.as_str())
            .with_queue_id(self.queue_id.as_str())
            .with_id_sequence(self.id_sequence.as_deref())
            .build()
    }

    /// Parse the `additional.*` settings; rejected entries are appended to `errors`.
    pub fn ext_settings(&self, errors: &mut Vec<String>) -> ExtSettings {
        ExtSettingsParser::new(ExtSettings::builder, errors).parse_ext_settings(&self.settings)
    }
}

impl Config {
    pub fn new<S: Into<String>>(dialect: S) -> Self {
        Self {
            dialect: dialect.into(),
            schema: QueueTableSchema::default(),
            queues: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: QueueTableSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn dialect(&self) -> Result<DatabaseDialect> {
        self.dialect.parse()
    }

    /// Check the dialect name and every queue location. A dialect that needs an id
    /// sequence rejects queues without one.
    pub fn validate(&self) -> Result<()> {
        let dialect = self.dialect()?;
        for queue in &self.queues {
            let location = queue.location()?;
            if location.table_name().is_empty() {
                return Err(Error::InvalidConfig {
                    field: "table".to_string(),
                    message: format!("queue '{}' has no usable table name", queue.queue_id),
                });
            }
            if dialect.requires_id_sequence() && location.id_sequence().is_none() {
                return Err(Error::MissingIdSequence {
                    location: location.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Create config from environment variables
    ///
    /// - DBQUEUE_DIALECT (required)
    /// - DBQUEUE_TABLE and DBQUEUE_QUEUE_ID: together define a single queue
    /// - DBQUEUE_ID_SEQUENCE: id sequence of that queue
    pub fn from_env() -> Result<Self> {
        use std::env;

        let dialect = env::var(ENV_DIALECT).map_err(|_| Error::MissingConfig {
            field: ENV_DIALECT.to_string(),
        })?;
        let mut config = Self::new(dialect);

        if let (Ok(table), Ok(queue_id)) = (env::var(ENV_TABLE), env::var(ENV_QUEUE_ID)) {
            let mut queue = QueueConfig::new(queue_id, table);
            queue.id_sequence = env::var(ENV_ID_SEQUENCE).ok().filter(|s| !s.is_empty());
            config.queues.push(queue);
        }

        config.validate()?;
        Ok(config)
    }

    /// Create config from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            field: "file".to_string(),
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| Error::InvalidConfig {
            field: "yaml".to_string(),
            message: format!("Failed to parse YAML config: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Create config from multiple sources with priority order
    ///
    /// 1. Explicit config file path (if provided)
    /// 2. Config file specified by DBQUEUE_CONFIG_FILE
    /// 3. Environment variables (DBQUEUE_DIALECT, etc.)
    /// 4. Default config file locations (dbqueue.yaml, dbqueue.yml)
    pub fn load_with_options<P: AsRef<Path>>(explicit_config_path: Option<P>) -> Result<Self> {
        use std::env;

        if let Some(path) = explicit_config_path {
            return Self::from_file(path);
        }

        if let Ok(config_path) = env::var(ENV_CONFIG_FILE) {
            return Self::from_file(config_path);
        }

        match Self::from_env() {
            Ok(config) => return Ok(config),
            Err(Error::MissingConfig { .. }) => {}
            Err(err) => return Err(err),
        }

        for path in DEFAULT_CONFIG_FILES {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(Error::MissingConfig {
            field: "configuration".to_string(),
        })
    }
}
