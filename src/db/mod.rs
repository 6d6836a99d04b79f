//! Database connectivity layer.
//!
//! This module provides database access functionality:
//! - Provider registry and sqlx driver factories
//! - Keyword connection strings with tenant overrides
//! - Tenant resolution
//! - Connection factory with bounded open retries
//! - Database context and unit of work
//! - Command preparation and execution
//! - Database dispatch macros for reducing code duplication

pub mod connection_string;
pub mod context;
pub mod executor;
pub mod factory;
#[macro_use]
pub mod macros;
pub mod params;
pub mod provider;
pub mod tenant;
pub mod types;

pub use connection_string::{
    ConnectionField, ConnectionStringBuilder, ConnectionStringModel, builder_for,
};
pub use context::{ContextOptions, DatabaseContext, TransactionInfo, UnitOfWork, UnitOfWorkPolicy};
pub use executor::{PreparedCommand, QueryExecutor, prepare};
pub use factory::{
    ConnectionFactory, ConnectionFactoryBuilder, CredentialDecryptor, RetryPolicy, Sleeper,
    TENANT_ID_HEADER, TenancyMode, TokioSleeper,
};
pub use provider::{
    DataAdapter, DbConnection, DriverFactory, MySqlDriver, PostgresDriver, ProviderRegistry,
    SqliteDriver,
};
pub use tenant::{TenantKey, TenantResolver};
