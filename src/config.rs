//! Configuration handling.
//!
//! CLI arguments and environment variables are parsed with clap; the connection
//! settings and tenant list come from a JSON settings file loaded once at startup.

use crate::db::tenant::check_credentials;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionRole, ConnectionSettings, TenantClient};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Command line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multitenant-db",
    about = "Tenant-aware database connectivity: resolve and check tenant connections",
    version
)]
pub struct Config {
    /// Path to the JSON settings file
    #[arg(short, long, value_name = "FILE", env = "MTDB_SETTINGS")]
    pub settings: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "MTDB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MTDB_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Print the masked connection string a request would use
    Resolve(TargetArgs),
    /// Open a connection (with retries) and run `SELECT 1`
    Check(TargetArgs),
    /// List configured tenants and their connection roles
    Tenants,
}

/// Which tenant and role to target.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Tenant GUID, as sent in the ClientGuid header
    #[arg(long, env = "MTDB_TENANT", conflicts_with = "code")]
    pub tenant: Option<String>,

    /// Tenant code, as an alternative to the GUID
    #[arg(long)]
    pub code: Option<String>,

    /// Connection role (main or reporting)
    #[arg(long, default_value = "main")]
    pub role: ConnectionRole,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Contents of the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub clients: Vec<TenantClient>,
}

impl AppSettings {
    /// Read, parse and validate a settings file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("Cannot read settings '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> DbResult<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|e| DbError::configuration(format!("Invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the invariants the connection factory relies on.
    pub fn validate(&self) -> DbResult<()> {
        let connection = &self.connection;
        if connection.default_connection.trim().is_empty() {
            return Err(DbError::configuration("default_connection must not be empty"));
        }
        if connection.command_timeout_secs == 0 {
            return Err(DbError::configuration(
                "command_timeout_secs must be greater than 0",
            ));
        }
        if connection.retry.max_attempts == 0 {
            return Err(DbError::configuration(
                "retry.max_attempts must be greater than 0",
            ));
        }

        let mut guids = HashSet::new();
        let mut codes = HashSet::new();
        for client in &self.clients {
            let guid = client.client_guid.trim().to_lowercase();
            let code = client.code.trim().to_lowercase();
            if guid.is_empty() {
                return Err(DbError::configuration(format!(
                    "Tenant '{}' has no client_guid",
                    client.code
                )));
            }
            if !guids.insert(guid) {
                return Err(DbError::configuration(format!(
                    "Duplicate tenant client_guid '{}'",
                    client.client_guid
                )));
            }
            if !code.is_empty() && !codes.insert(code) {
                return Err(DbError::configuration(format!(
                    "Duplicate tenant code '{}'",
                    client.code
                )));
            }

            let mut roles = HashSet::new();
            for record in &client.connections {
                if !roles.insert(record.role) {
                    return Err(DbError::configuration(format!(
                        "Tenant '{}' has more than one {} connection",
                        client.code, record.role
                    )));
                }
                check_credentials(&client.code, record)?;
            }
        }
        Ok(())
    }
}
