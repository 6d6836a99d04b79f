//! Tenant lookup.
//!
//! Maps a tenant identifier (the `ClientGuid` header value, or a tenant code)
//! to the connection fields of one of its roles.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionFields, ConnectionRecord, ConnectionRole, TenantClient};
use std::sync::Arc;

/// How a caller identifies a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantKey {
    Guid(String),
    Code(String),
}

impl TenantKey {
    pub fn guid(value: impl Into<String>) -> Self {
        Self::Guid(value.into())
    }

    pub fn code(value: impl Into<String>) -> Self {
        Self::Code(value.into())
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Guid(v) | Self::Code(v) => v,
        }
    }
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guid(v) => write!(f, "guid '{v}'"),
            Self::Code(v) => write!(f, "code '{v}'"),
        }
    }
}

/// Read-only view over the configured tenant clients.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    clients: Arc<[TenantClient]>,
}

impl TenantResolver {
    pub fn new(clients: impl Into<Arc<[TenantClient]>>) -> Self {
        Self {
            clients: clients.into(),
        }
    }

    pub fn clients(&self) -> &[TenantClient] {
        &self.clients
    }

    pub fn resolve_by_guid(&self, guid: &str, role: ConnectionRole) -> DbResult<ConnectionFields> {
        self.resolve(&TenantKey::guid(guid), role)
    }

    pub fn resolve_by_code(&self, code: &str, role: ConnectionRole) -> DbResult<ConnectionFields> {
        self.resolve(&TenantKey::code(code), role)
    }

    pub fn resolve(&self, key: &TenantKey, role: ConnectionRole) -> DbResult<ConnectionFields> {
        let client = self.find_client(key)?;
        let record = client
            .connection(role)
            .ok_or_else(|| DbError::tenant_connection_missing(key.value().trim(), role))?;
        check_credentials(&client.code, record)?;
        Ok(record.fields())
    }

    /// Find the single client matching a key (trimmed, case-insensitive).
    pub fn find_client(&self, key: &TenantKey) -> DbResult<&TenantClient> {
        let wanted = key.value().trim().to_lowercase();
        if wanted.is_empty() {
            return Err(DbError::invalid_input("Tenant identifier must not be empty"));
        }
        let mut matches = self.clients.iter().filter(|client| {
            let candidate = match key {
                TenantKey::Guid(_) => &client.client_guid,
                TenantKey::Code(_) => &client.code,
            };
            candidate.trim().to_lowercase() == wanted
        });
        let client = matches
            .next()
            .ok_or_else(|| DbError::tenant_not_found(key.value().trim()))?;
        if matches.next().is_some() {
            return Err(DbError::configuration(format!(
                "More than one tenant matches {key}"
            )));
        }
        Ok(client)
    }

    /// The tenant's main database name.
    pub fn database_name(&self, key: &TenantKey) -> DbResult<String> {
        self.resolve(key, ConnectionRole::Main)
            .map(|fields| fields.database)
    }
}

/// A connection record is usable only with all four credential fields set.
pub(crate) fn check_credentials(code: &str, record: &ConnectionRecord) -> DbResult<()> {
    let missing = record.missing_credentials();
    if missing.is_empty() {
        return Ok(());
    }
    Err(DbError::configuration(format!(
        "Tenant '{code}' {} connection is missing: {}",
        record.role,
        missing.join(", ")
    )))
}
