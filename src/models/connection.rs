//! Connection-related data models.
//!
//! This module defines the settings, tenant and connection-record types that the
//! configuration loader produces and the connection factory consumes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 240;

/// Default number of connection open attempts.
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;

/// Default delay between connection open attempts, in milliseconds.
pub const DEFAULT_OPEN_RETRY_DELAY_MS: u64 = 10;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[serde(alias = "mssql")]
    SqlServer,
    /// Includes MariaDB
    #[serde(alias = "mariadb")]
    MySQL,
    #[serde(alias = "postgres")]
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Every known database type, registered or not.
    pub const ALL: [DatabaseType; 4] = [
        DatabaseType::SqlServer,
        DatabaseType::MySQL,
        DatabaseType::PostgreSQL,
        DatabaseType::SQLite,
    ];

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SqlServer => "SQL Server",
            Self::MySQL => "MySQL",
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "postgresql" | "postgres" => Ok(Self::PostgreSQL),
            "sqlite" => Ok(Self::SQLite),
            other => Err(format!("Unknown database type: {other}")),
        }
    }
}

/// Which logical database a tenant connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Operational database
    #[default]
    Main,
    /// Analytics database
    #[serde(alias = "report")]
    Reporting,
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Reporting => write!(f, "reporting"),
        }
    }
}

impl FromStr for ConnectionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "reporting" | "report" => Ok(Self::Reporting),
            other => Err(format!("Unknown connection role: {other}")),
        }
    }
}

/// Retry options for opening physical connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_OPEN_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    DEFAULT_OPEN_RETRY_DELAY_MS
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_OPEN_ATTEMPTS,
            delay_ms: DEFAULT_OPEN_RETRY_DELAY_MS,
        }
    }
}

/// Connection settings, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub database_type: DatabaseType,
    /// Contains sensitive data - never log unmasked
    #[serde(skip_serializing)]
    pub default_connection: String,
    #[serde(default)]
    pub multi_tenant: bool,
    /// Tenant credential values are stored encrypted
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryOptions,
}

impl ConnectionSettings {
    /// Create single-tenant settings with default timeouts and retry options.
    pub fn new(database_type: DatabaseType, default_connection: impl Into<String>) -> Self {
        Self {
            database_type,
            default_connection: default_connection.into(),
            multi_tenant: false,
            is_encrypted: false,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            retry: RetryOptions::default(),
        }
    }

    /// Switch these settings to multi-tenant mode.
    pub fn multi_tenant(mut self) -> Self {
        self.multi_tenant = true;
        self
    }
}

/// One per-role connection record of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub role: ConnectionRole,
    pub server: String,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl ConnectionRecord {
    pub fn new(
        role: ConnectionRole,
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            role,
            server: server.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Names of the credential fields that are empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("server", &self.server),
            ("database", &self.database),
            ("user", &self.user),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// The fields a connection string override needs.
    pub fn fields(&self) -> ConnectionFields {
        ConnectionFields {
            server: self.server.clone(),
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            port: self.port,
        }
    }
}

/// Resolved server/database/credential values for one tenant and role.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionFields {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: Option<u16>,
}

impl std::fmt::Debug for ConnectionFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFields")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"****")
            .field("port", &self.port)
            .finish()
    }
}

/// A tenant and its per-role connection records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantClient {
    pub id: i64,
    pub code: String,
    pub client_guid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

impl TenantClient {
    pub fn new(id: i64, code: impl Into<String>, client_guid: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            client_guid: client_guid.into(),
            name: None,
            connections: Vec::new(),
        }
    }

    pub fn with_connection(mut self, record: ConnectionRecord) -> Self {
        self.connections.push(record);
        self
    }

    /// The connection record for a role, if configured.
    pub fn connection(&self, role: ConnectionRole) -> Option<&ConnectionRecord> {
        self.connections.iter().find(|c| c.role == role)
    }
}
