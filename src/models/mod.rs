//! Data models for the multi-tenant connectivity layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionFields, ConnectionRecord, ConnectionRole, ConnectionSettings,
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_OPEN_ATTEMPTS, DEFAULT_OPEN_RETRY_DELAY_MS,
    DatabaseType, RetryOptions, TenantClient,
};
pub use query::{
    Command, CommandKind, CommandParameter, QueryParam, Table, TableRow, TableSet,
    TransactionHandle,
};
