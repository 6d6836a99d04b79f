//! Provider registry and driver factories.
//!
//! Drivers are registered explicitly in a table keyed by [`DatabaseType`]; there
//! is no runtime discovery. Each [`DriverFactory`] knows how to turn a parsed
//! connection string into one open physical connection.

use crate::db::connection_string::{
    ConnectionField, ConnectionStringBuilder, ConnectionStringModel, builder_for,
};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{Command, DatabaseType, TableSet};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// One open physical connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Get the database type of this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Check that the server still answers.
    pub async fn ping(&mut self) -> Result<(), sqlx::Error> {
        impl_db_dispatch!(self, {
            MySql(c) => c.ping().await,
            Postgres(c) => c.ping().await,
            SQLite(c) => c.ping().await,
        })
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        impl_db_dispatch!(self, {
            MySql(c) => c.close().await,
            Postgres(c) => c.close().await,
            SQLite(c) => c.close().await,
        })
    }
}

/// Fills a [`TableSet`] from one command on a context's connection.
#[derive(Debug, Clone)]
pub struct DataAdapter {
    provider: DatabaseType,
    command: Command,
}

impl DataAdapter {
    pub fn new(provider: DatabaseType, command: Command) -> Self {
        Self { provider, command }
    }

    pub fn provider(&self) -> DatabaseType {
        self.provider
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Run the command and collect every row-producing statement.
    pub async fn fill(&self, context: &crate::db::DatabaseContext) -> DbResult<TableSet> {
        if context.provider() != self.provider {
            return Err(DbError::invalid_input(format!(
                "{} data adapter cannot fill from a {} connection",
                self.provider,
                context.provider()
            )));
        }
        context.execute_data_set(&self.command).await
    }
}

/// Creates physical connections for one provider.
#[async_trait]
pub trait DriverFactory: Send + Sync + std::fmt::Debug {
    fn provider(&self) -> DatabaseType;

    /// The connection-string keyword table for this provider.
    fn connection_string_builder(&self) -> &'static dyn ConnectionStringBuilder {
        builder_for(self.provider())
    }

    /// Make a single open attempt. Retries are the caller's concern.
    async fn connect(&self, connection_string: &ConnectionStringModel)
    -> Result<DbConnection, sqlx::Error>;

    fn data_adapter(&self, command: Command) -> DataAdapter {
        DataAdapter::new(self.provider(), command)
    }
}

fn parse_port(model: &ConnectionStringModel) -> Result<Option<u16>, sqlx::Error> {
    model
        .get(ConnectionField::Port)
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| sqlx::Error::Configuration(format!("Invalid port: {p}").into()))
        })
        .transpose()
}

/// MySQL / MariaDB over sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

#[async_trait]
impl DriverFactory for MySqlDriver {
    fn provider(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn connect(
        &self,
        connection_string: &ConnectionStringModel,
    ) -> Result<DbConnection, sqlx::Error> {
        let mut options = MySqlConnectOptions::new();
        if let Some(host) = connection_string.get(ConnectionField::Server) {
            options = options.host(host);
        }
        if let Some(port) = parse_port(connection_string)? {
            options = options.port(port);
        }
        if let Some(user) = connection_string.get(ConnectionField::User) {
            options = options.username(user);
        }
        if let Some(password) = connection_string.get(ConnectionField::Password) {
            options = options.password(password);
        }
        if let Some(database) = connection_string.get(ConnectionField::Database) {
            options = options.database(database);
        }
        debug!(connection_string = %connection_string, "Opening MySQL connection");
        options.connect().await.map(DbConnection::MySql)
    }
}

/// PostgreSQL over sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

#[async_trait]
impl DriverFactory for PostgresDriver {
    fn provider(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(
        &self,
        connection_string: &ConnectionStringModel,
    ) -> Result<DbConnection, sqlx::Error> {
        let mut options = PgConnectOptions::new();
        if let Some(host) = connection_string.get(ConnectionField::Server) {
            options = options.host(host);
        }
        if let Some(port) = parse_port(connection_string)? {
            options = options.port(port);
        }
        if let Some(user) = connection_string.get(ConnectionField::User) {
            options = options.username(user);
        }
        if let Some(password) = connection_string.get(ConnectionField::Password) {
            options = options.password(password);
        }
        if let Some(database) = connection_string.get(ConnectionField::Database) {
            options = options.database(database);
        }
        debug!(connection_string = %connection_string, "Opening PostgreSQL connection");
        options.connect().await.map(DbConnection::Postgres)
    }
}

/// SQLite over sqlx. `Data Source=:memory:` opens a private in-memory database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl DriverFactory for SqliteDriver {
    fn provider(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(
        &self,
        connection_string: &ConnectionStringModel,
    ) -> Result<DbConnection, sqlx::Error> {
        let source = connection_string
            .get(ConnectionField::Database)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                sqlx::Error::Configuration("SQLite connection string has no Data Source".into())
            })?;
        let options = if source.eq_ignore_ascii_case(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(source)
                .create_if_missing(true)
        };
        debug!(connection_string = %connection_string, "Opening SQLite connection");
        options.connect().await.map(DbConnection::SQLite)
    }
}

/// Explicit provider table, built once at startup and passed by reference.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<DatabaseType, Arc<dyn DriverFactory>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// MySQL, PostgreSQL and SQLite. SQL Server has no sqlx driver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MySqlDriver));
        registry.register(Arc::new(PostgresDriver));
        registry.register(Arc::new(SqliteDriver));
        registry
    }

    /// Register a factory, replacing any previous one for the same provider.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) -> &mut Self {
        self.factories.insert(factory.provider(), factory);
        self
    }

    pub fn resolve(&self, provider: DatabaseType) -> DbResult<Arc<dyn DriverFactory>> {
        self.factories
            .get(&provider)
            .cloned()
            .ok_or_else(|| DbError::unsupported_provider(provider))
    }

    pub fn is_registered(&self, provider: DatabaseType) -> bool {
        self.factories.contains_key(&provider)
    }

    /// Registered providers in a stable order.
    pub fn providers(&self) -> Vec<DatabaseType> {
        DatabaseType::ALL
            .into_iter()
            .filter(|p| self.is_registered(*p))
            .collect()
    }
}
