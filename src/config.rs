//! On-disk configuration: named connection profiles and entity mappings.
//!
//! ```toml
//! default_profile = "dev"
//!
//! [profiles.dev]
//! host = "localhost"
//! port = 10000
//!
//! [[entities]]
//! name = "Title"
//! table = "titles"
//! columns = [{ member = "Name", column = "name", type = "string" }]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::query::mapping::{EntityMapping, StaticMapping};
use crate::types::HiveError;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this layout.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// No explicit path was given and no config directory exists.
    #[error("no config directory found; pass --config")]
    NoConfigPath,
    /// A named profile is not declared.
    #[error("profile '{name}' not found")]
    ProfileNotFound {
        /// Requested profile.
        name: String,
    },
    /// The entity declarations do not form a valid mapping.
    #[error("invalid entity mapping: {source}")]
    Mapping {
        /// Underlying mapping error.
        source: HiveError,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    entities: Vec<EntityMapping>,
}

/// Loaded configuration.
#[derive(Debug, Default)]
pub struct HiveqConfig {
    path: Option<PathBuf>,
    default_profile: Option<String>,
    profiles: BTreeMap<String, ConnectionConfig>,
    mapping: StaticMapping,
}

impl HiveqConfig {
    /// Loads `explicit`, or the per-user default location when `None`.
    ///
    /// A missing default file yields an empty configuration; a missing
    /// explicit file is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(&path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                Some(path) => Ok(Self {
                    path: Some(path),
                    ..Self::default()
                }),
                None => Ok(Self::default()),
            },
        }
    }

    /// Reads and validates one file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_raw(raw)?;
        config.path = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            profiles = config.profiles.len(),
            entities = config.mapping.len(),
            "config.loaded"
        );
        Ok(config)
    }

    /// Parses configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if let Some(name) = &raw.default_profile {
            if !raw.profiles.contains_key(name) {
                return Err(ConfigError::ProfileNotFound { name: name.clone() });
            }
        }
        let mapping = StaticMapping::from_entities(raw.entities)
            .map_err(|source| ConfigError::Mapping { source })?;
        Ok(Self {
            path: None,
            default_profile: raw.default_profile,
            profiles: raw.profiles,
            mapping,
        })
    }

    /// File the configuration came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Declared default profile name.
    pub fn default_profile_name(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Looks up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&ConnectionConfig> {
        self.profiles.get(name)
    }

    /// Resolves `requested`, falling back to the default profile and then
    /// to the only declared profile.
    pub fn connection(&self, requested: Option<&str>) -> Result<&ConnectionConfig, ConfigError> {
        let name = match requested.or(self.default_profile.as_deref()) {
            Some(name) => name,
            None if self.profiles.len() == 1 => {
                return self
                    .profiles
                    .values()
                    .next()
                    .ok_or(ConfigError::NoConfigPath);
            }
            None => {
                return Err(ConfigError::ProfileNotFound {
                    name: "default".to_owned(),
                })
            }
        };
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_owned(),
            })
    }

    /// Entity mapping built from the `[[entities]]` tables.
    pub fn mapping(&self) -> &StaticMapping {
        &self.mapping
    }
}

/// Per-user configuration file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("hiveq").join("config.toml"))
}
