//! Error types for the multi-tenant connectivity layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Lower layers wrap driver failures with call-site context; the service boundary
//! re-wraps them into [`ServiceError`] while keeping the underlying [`DbError`] reachable.

use crate::models::{ConnectionRole, DatabaseType};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Tenant not found: '{tenant}'")]
    TenantNotFound { tenant: String },

    #[error("Tenant '{tenant}' has no {role} connection configured")]
    TenantConnectionMissing { tenant: String, role: ConnectionRole },

    #[error("Failed to open {provider} connection after {attempts} attempt(s): {source}")]
    ConnectionOpen {
        provider: DatabaseType,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Query execution failed during {context}: {source}")]
    QueryExecution {
        /// e.g. "execute_non_query", "begin transaction"
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Timeout: {operation} exceeded {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported provider error.
    pub fn unsupported_provider(provider: impl ToString) -> Self {
        Self::UnsupportedProvider {
            provider: provider.to_string(),
        }
    }

    /// Create a tenant not found error.
    pub fn tenant_not_found(tenant: impl Into<String>) -> Self {
        Self::TenantNotFound {
            tenant: tenant.into(),
        }
    }

    /// Create a missing tenant connection error.
    pub fn tenant_connection_missing(tenant: impl Into<String>, role: ConnectionRole) -> Self {
        Self::TenantConnectionMissing {
            tenant: tenant.into(),
            role,
        }
    }

    /// Create a connection open error after retries were exhausted.
    pub fn connection_open(provider: DatabaseType, attempts: u32, source: sqlx::Error) -> Self {
        Self::ConnectionOpen {
            provider,
            attempts,
            source,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Wrap a driver error with the operation that produced it.
    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::QueryExecution {
            context: context.into(),
            source,
        }
    }

    /// Create a timeout error for a command that ran past `limit`.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get an operator-facing suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } => Some("Check the settings file and connection string"),
            Self::UnsupportedProvider { .. } => {
                Some("Use one of the registered providers: mysql, postgresql, sqlite")
            }
            Self::TenantNotFound { .. } => Some("Verify the ClientGuid header or tenant code"),
            Self::TenantConnectionMissing { .. } => {
                Some("Add a connection record for this role to the tenant")
            }
            Self::ConnectionOpen { .. } => {
                Some("Check network connectivity and database server status")
            }
            Self::Timeout { .. } => Some("Consider increasing command_timeout_secs"),
            _ => None,
        }
    }

    /// The underlying driver error, when one caused this error.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::ConnectionOpen { source, .. } | Self::QueryExecution { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Attach call-site context to a raw driver result.
pub trait QueryContext<T> {
    fn query_context(self, context: &str) -> DbResult<T>;
}

impl<T> QueryContext<T> for Result<T, sqlx::Error> {
    fn query_context(self, context: &str) -> DbResult<T> {
        self.map_err(|e| DbError::query(context, e))
    }
}

/// Error raised at the service boundary.
///
/// The message is specific to the call site; the cause keeps its kind.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
    #[source]
    source: DbError,
}

impl ServiceError {
    pub fn new(message: impl Into<String>, source: DbError) -> Self {
        Self {
            message: message.into(),
            source,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped error, for diagnostics and kind inspection.
    pub fn cause(&self) -> &DbError {
        &self.source
    }

    pub fn into_cause(self) -> DbError {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::tenant_not_found("abc");
        assert!(err.to_string().contains("Tenant not found"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_tenant_connection_missing_display_names_role() {
        let err = DbError::tenant_connection_missing("acme", ConnectionRole::Reporting);
        assert_eq!(
            err.to_string(),
            "Tenant 'acme' has no reporting connection configured"
        );
    }

    #[test]
    fn test_timeout_reports_sub_second_limits() {
        let err = DbError::timeout("execute_data_set", Duration::from_millis(20));
        assert!(matches!(err, DbError::Timeout { limit_ms: 20, .. }));
        assert_eq!(err.to_string(), "Timeout: execute_data_set exceeded 20ms");
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_connection_open_keeps_source() {
        let err = DbError::connection_open(DatabaseType::PostgreSQL, 3, sqlx::Error::PoolClosed);
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.source().is_some());
        assert!(matches!(err.driver_error(), Some(sqlx::Error::PoolClosed)));
    }

    #[test]
    fn test_query_context_wraps_driver_error() {
        let result: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = result.query_context("execute_scalar").unwrap_err();
        match err {
            DbError::QueryExecution { context, source } => {
                assert_eq!(context, "execute_scalar");
                assert!(matches!(source, sqlx::Error::RowNotFound));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_service_error_preserves_cause() {
        let err = ServiceError::new(
            "Error occurred while fetching data.",
            DbError::tenant_not_found("x"),
        );
        assert_eq!(err.to_string(), "Error occurred while fetching data.");
        assert!(matches!(err.cause(), DbError::TenantNotFound { .. }));
        let source = err.source().expect("source is kept");
        assert!(source.to_string().contains("Tenant not found"));
    }

    #[test]
    fn test_suggestions() {
        assert!(DbError::configuration("x").suggestion().is_some());
        assert!(DbError::invalid_input("x").suggestion().is_none());
    }
}
