use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionError;

fn default_database() -> String {
    "default".to_owned()
}

fn default_beeline() -> String {
    "beeline".to_owned()
}

fn default_null_token() -> String {
    "NULL".to_owned()
}

/// Connection settings for a HiveServer2 endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database selected on connect.
    #[serde(default = "default_database")]
    pub database: String,
    /// User for authenticated connections.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for authenticated connections.
    #[serde(default)]
    pub password: Option<String>,
    /// Client executable.
    #[serde(default = "default_beeline")]
    pub beeline: String,
    /// Field text the engine prints for NULL.
    #[serde(default = "default_null_token")]
    pub null_token: String,
    /// Extra `--hiveconf` settings.
    #[serde(default)]
    pub hiveconf: BTreeMap<String, String>,
}

/// How the client authenticates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// No credentials.
    Anonymous,
    /// User name with an optional password.
    Authenticated {
        /// User name.
        username: String,
        /// Password, if any.
        password: Option<String>,
    },
}

impl ConnectionConfig {
    /// Creates a configuration with defaults for everything but the address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            database: default_database(),
            username: None,
            password: None,
            beeline: default_beeline(),
            null_token: default_null_token(),
            hiveconf: BTreeMap::new(),
        }
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Authentication mode implied by the credentials.
    pub fn auth_mode(&self) -> AuthMode {
        match &self.username {
            Some(username) => AuthMode::Authenticated {
                username: username.clone(),
                password: self.password.clone(),
            },
            None => AuthMode::Anonymous,
        }
    }

    /// `host:port/database`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// JDBC URL passed to the client.
    pub fn jdbc_url(&self) -> String {
        format!("jdbc:hive2://{}", self.endpoint())
    }

    /// Rejects configurations that cannot describe a reachable endpoint.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::Malformed("host is empty".to_owned()));
        }
        if self.port == 0 {
            return Err(ConnectionError::Malformed("port must be non-zero".to_owned()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConnectionError::Malformed(
                "password given without a username".to_owned(),
            ));
        }
        if self.database.is_empty() || self.database.chars().any(char::is_whitespace) {
            return Err(ConnectionError::Malformed(format!(
                "database name '{}' is invalid",
                self.database
            )));
        }
        if self.beeline.trim().is_empty() {
            return Err(ConnectionError::Malformed(
                "client executable is empty".to_owned(),
            ));
        }
        Ok(())
    }
}
