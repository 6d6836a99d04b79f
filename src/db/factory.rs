//! Connection factory.
//!
//! Resolves the provider and (in multi-tenant mode) the tenant, builds the
//! tenant-specific connection string, and opens a physical connection with a
//! bounded number of attempts.

use crate::db::connection_string::{ConnectionField, ConnectionStringModel};
use crate::db::provider::{DataAdapter, DbConnection, DriverFactory, ProviderRegistry};
use crate::db::tenant::{TenantKey, TenantResolver};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, ConnectionFields, ConnectionRole, ConnectionSettings, DatabaseType, RetryOptions,
    TenantClient,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Request header that carries the tenant GUID.
pub const TENANT_ID_HEADER: &str = "ClientGuid";

/// How many times to try opening a connection, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryOptions::default())
    }
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self::new(options.max_attempts, Duration::from_millis(options.delay_ms))
    }
}

/// Waits between connection attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Decrypts tenant credential values stored encrypted in the settings.
pub trait CredentialDecryptor: Send + Sync + std::fmt::Debug {
    fn decrypt(&self, value: &str) -> DbResult<String>;
}

/// Fixed at construction from `multi_tenant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenancyMode {
    SingleTenant,
    MultiTenant,
}

/// Builder for [`ConnectionFactory`]; validation happens in [`build`](Self::build).
#[derive(Debug)]
pub struct ConnectionFactoryBuilder {
    settings: ConnectionSettings,
    clients: Arc<[TenantClient]>,
    retry: Option<RetryPolicy>,
    sleeper: Arc<dyn Sleeper>,
    decryptor: Option<Arc<dyn CredentialDecryptor>>,
}

impl ConnectionFactoryBuilder {
    /// Override the retry policy taken from the settings.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn build(self, registry: &ProviderRegistry) -> DbResult<ConnectionFactory> {
        let provider = self.settings.database_type;
        let driver = registry.resolve(provider)?;

        if self.settings.default_connection.trim().is_empty() {
            return Err(DbError::configuration("Default connection string is empty"));
        }
        let default_model = driver
            .connection_string_builder()
            .build(&self.settings.default_connection)?;

        if self.settings.is_encrypted && self.decryptor.is_none() {
            return Err(DbError::configuration(
                "Tenant credentials are marked encrypted but no decryptor is configured",
            ));
        }

        let mode = if self.settings.multi_tenant {
            TenancyMode::MultiTenant
        } else {
            TenancyMode::SingleTenant
        };
        let retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from(&self.settings.retry));

        debug!(
            provider = %provider,
            mode = ?mode,
            tenants = self.clients.len(),
            connection_string = %default_model,
            "Connection factory ready"
        );

        Ok(ConnectionFactory {
            driver,
            settings: self.settings,
            default_model,
            tenants: TenantResolver::new(self.clients),
            mode,
            retry,
            sleeper: self.sleeper,
            decryptor: self.decryptor,
        })
    }
}

/// Opens connections for the configured provider and tenants.
#[derive(Debug)]
pub struct ConnectionFactory {
    driver: Arc<dyn DriverFactory>,
    settings: ConnectionSettings,
    default_model: ConnectionStringModel,
    tenants: TenantResolver,
    mode: TenancyMode,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    decryptor: Option<Arc<dyn CredentialDecryptor>>,
}

impl ConnectionFactory {
    pub fn builder(
        settings: ConnectionSettings,
        clients: impl Into<Arc<[TenantClient]>>,
    ) -> ConnectionFactoryBuilder {
        ConnectionFactoryBuilder {
            settings,
            clients: clients.into(),
            retry: None,
            sleeper: Arc::new(TokioSleeper),
            decryptor: None,
        }
    }

    pub fn new(
        settings: ConnectionSettings,
        clients: impl Into<Arc<[TenantClient]>>,
        registry: &ProviderRegistry,
    ) -> DbResult<Self> {
        Self::builder(settings, clients).build(registry)
    }

    pub fn provider(&self) -> DatabaseType {
        self.driver.provider()
    }

    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    pub fn is_multi_tenant(&self) -> bool {
        self.mode == TenancyMode::MultiTenant
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn tenants(&self) -> &TenantResolver {
        &self.tenants
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.command_timeout_secs)
    }

    /// The parsed default connection string.
    pub fn default_connection_string(&self) -> &ConnectionStringModel {
        &self.default_model
    }

    /// The default connection string with a tenant's fields substituted.
    ///
    /// Built on a private copy; the default model is never modified.
    pub fn tenant_connection_string(
        &self,
        key: &TenantKey,
        role: ConnectionRole,
    ) -> DbResult<ConnectionStringModel> {
        let fields = self.tenant_fields(key, role)?;
        let mut model = self.default_model.clone();
        model.override_with(&fields)?;
        Ok(model)
    }

    fn tenant_fields(&self, key: &TenantKey, role: ConnectionRole) -> DbResult<ConnectionFields> {
        let fields = self.tenants.resolve(key, role)?;
        match &self.decryptor {
            Some(decryptor) if self.settings.is_encrypted => Ok(ConnectionFields {
                server: decryptor.decrypt(&fields.server)?,
                database: decryptor.decrypt(&fields.database)?,
                user: decryptor.decrypt(&fields.user)?,
                password: decryptor.decrypt(&fields.password)?,
                port: fields.port,
            }),
            _ => Ok(fields),
        }
    }

    /// Open a connection with the default connection string.
    pub async fn create(&self) -> DbResult<DbConnection> {
        self.open_with_retry(&self.default_model, None).await
    }

    /// Open a connection to a tenant's main database.
    pub async fn create_for_tenant(&self, client_guid: &str) -> DbResult<DbConnection> {
        self.create_for(&TenantKey::guid(client_guid), ConnectionRole::Main)
            .await
    }

    pub async fn create_for(&self, key: &TenantKey, role: ConnectionRole) -> DbResult<DbConnection> {
        let model = self.tenant_connection_string(key, role)?;
        self.open_with_retry(&model, Some(key)).await
    }

    /// Request-shaped entry point: the tenant comes from the `ClientGuid` header.
    ///
    /// Single-tenant mode ignores the tenant and uses the default connection.
    pub async fn connect(&self, tenant: Option<&str>) -> DbResult<DbConnection> {
        match self.mode {
            TenancyMode::SingleTenant => self.create().await,
            TenancyMode::MultiTenant => {
                let guid = require_tenant(tenant)?;
                self.create_for_tenant(guid).await
            }
        }
    }

    pub fn data_adapter(&self, command: Command) -> DataAdapter {
        self.driver.data_adapter(command)
    }

    /// The database name a request will land in.
    pub fn client_database(&self, tenant: Option<&str>) -> DbResult<String> {
        match self.mode {
            TenancyMode::MultiTenant => {
                let guid = require_tenant(tenant)?;
                let key = TenantKey::guid(guid);
                let fields = self.tenant_fields(&key, ConnectionRole::Main)?;
                Ok(fields.database)
            }
            TenancyMode::SingleTenant => self
                .default_model
                .get(ConnectionField::Database)
                .map(str::to_string)
                .ok_or_else(|| {
                    DbError::configuration("Default connection string names no database")
                }),
        }
    }

    async fn open_with_retry(
        &self,
        model: &ConnectionStringModel,
        tenant: Option<&TenantKey>,
    ) -> DbResult<DbConnection> {
        let provider = self.provider();
        let tenant = tenant.map(|t| t.to_string()).unwrap_or_default();
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 1;

        loop {
            match self.driver.connect(model).await {
                Ok(connection) => {
                    info!(provider = %provider, tenant = %tenant, attempt, "Connection opened");
                    return Ok(connection);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        provider = %provider,
                        tenant = %tenant,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Connection attempt failed, retrying"
                    );
                    self.sleeper.sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        provider = %provider,
                        tenant = %tenant,
                        attempts = attempt,
                        error = %e,
                        connection_string = %model,
                        "Failed to open connection"
                    );
                    return Err(DbError::connection_open(provider, attempt, e));
                }
            }
        }
    }
}

fn require_tenant(tenant: Option<&str>) -> DbResult<&str> {
    tenant
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            DbError::invalid_input(format!(
                "A {TENANT_ID_HEADER} is required in multi-tenant mode"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionRecord;

    const GUID: &str = "b0ed668d-7ef2-4a23-a333-94ad278f45d7";

    fn clients() -> Vec<TenantClient> {
        vec![TenantClient::new(1, "acme", GUID).with_connection(ConnectionRecord::new(
            ConnectionRole::Main,
            "S",
            "D",
            "U",
            "P",
        ))]
    }

    fn mysql_settings() -> ConnectionSettings {
        ConnectionSettings::new(DatabaseType::MySQL, "Port=3306;SslMode=None").multi_tenant()
    }

    #[derive(Debug)]
    struct Rot13;

    impl CredentialDecryptor for Rot13 {
        fn decrypt(&self, value: &str) -> DbResult<String> {
            Ok(value
                .chars()
                .map(|c| match c {
                    'a'..='m' | 'A'..='M' => (c as u8 + 13) as char,
                    'n'..='z' | 'N'..='Z' => (c as u8 - 13) as char,
                    _ => c,
                })
                .collect())
        }
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(10));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_unsupported_provider_rejected_at_construction() {
        let settings = ConnectionSettings::new(DatabaseType::SqlServer, "Server=s;Database=d");
        let err = ConnectionFactory::new(settings, clients(), &ProviderRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, DbError::UnsupportedProvider { .. }));
    }

    #[test]
    fn test_invalid_default_connection_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let empty = ConnectionSettings::new(DatabaseType::MySQL, "  ");
        assert!(matches!(
            ConnectionFactory::new(empty, clients(), &registry).unwrap_err(),
            DbError::Configuration { .. }
        ));
        let malformed = ConnectionSettings::new(DatabaseType::MySQL, "Server=a;oops");
        assert!(matches!(
            ConnectionFactory::new(malformed, clients(), &registry).unwrap_err(),
            DbError::Configuration { .. }
        ));
    }

    #[test]
    fn test_mode_follows_settings() {
        let registry = ProviderRegistry::with_defaults();
        let single = ConnectionFactory::new(
            ConnectionSettings::new(DatabaseType::MySQL, "Server=a"),
            clients(),
            &registry,
        )
        .unwrap();
        assert_eq!(single.mode(), TenancyMode::SingleTenant);
        let multi = ConnectionFactory::new(mysql_settings(), clients(), &registry).unwrap();
        assert!(multi.is_multi_tenant());
    }

    #[test]
    fn test_tenant_connection_string_has_each_field_once() {
        let factory =
            ConnectionFactory::new(mysql_settings(), clients(), &ProviderRegistry::with_defaults())
                .unwrap();
        let model = factory
            .tenant_connection_string(&TenantKey::guid(GUID), ConnectionRole::Main)
            .unwrap();
        assert_eq!(
            model.serialize(),
            "Port=3306;SslMode=None;Server=S;Database=D;Uid=U;Pwd=P"
        );
        // The default stays untouched
        assert_eq!(
            factory.default_connection_string().serialize(),
            "Port=3306;SslMode=None"
        );
    }

    #[test]
    fn test_incomplete_tenant_credentials_are_not_substituted() {
        let partial = vec![TenantClient::new(1, "acme", GUID).with_connection(
            ConnectionRecord::new(ConnectionRole::Main, "S", "D", "", ""),
        )];
        let factory =
            ConnectionFactory::new(mysql_settings(), partial, &ProviderRegistry::with_defaults())
                .unwrap();
        let err = factory
            .tenant_connection_string(&TenantKey::guid(GUID), ConnectionRole::Main)
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("missing: user, password"));
    }

    #[test]
    fn test_encrypted_settings_require_decryptor() {
        let mut settings = mysql_settings();
        settings.is_encrypted = true;
        let registry = ProviderRegistry::with_defaults();
        let err = ConnectionFactory::new(settings.clone(), clients(), &registry).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));

        let encrypted = vec![TenantClient::new(1, "acme", GUID).with_connection(
            ConnectionRecord::new(ConnectionRole::Main, "qo", "nccf", "hfre", "frperg"),
        )];
        let factory = ConnectionFactory::builder(settings, encrypted)
            .decryptor(Arc::new(Rot13))
            .build(&registry)
            .unwrap();
        let model = factory
            .tenant_connection_string(&TenantKey::guid(GUID), ConnectionRole::Main)
            .unwrap();
        assert_eq!(model.get(ConnectionField::Server), Some("db"));
        assert_eq!(model.get(ConnectionField::Database), Some("apps"));
        assert_eq!(model.get(ConnectionField::User), Some("user"));
        assert_eq!(model.get(ConnectionField::Password), Some("secret"));
    }

    #[test]
    fn test_client_database() {
        let registry = ProviderRegistry::with_defaults();
        let multi = ConnectionFactory::new(mysql_settings(), clients(), &registry).unwrap();
        assert_eq!(multi.client_database(Some(GUID)).unwrap(), "D");
        assert!(matches!(
            multi.client_database(None).unwrap_err(),
            DbError::InvalidInput { .. }
        ));

        let single = ConnectionFactory::new(
            ConnectionSettings::new(DatabaseType::MySQL, "Server=a;Database=shared"),
            clients(),
            &registry,
        )
        .unwrap();
        assert_eq!(single.client_database(Some(GUID)).unwrap(), "shared");
    }

    #[tokio::test]
    async fn test_multi_tenant_connect_requires_tenant() {
        let factory =
            ConnectionFactory::new(mysql_settings(), clients(), &ProviderRegistry::with_defaults())
                .unwrap();
        for tenant in [None, Some(""), Some("   ")] {
            let err = factory.connect(tenant).await.unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }));
        }
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails_before_connecting() {
        let factory =
            ConnectionFactory::new(mysql_settings(), clients(), &ProviderRegistry::with_defaults())
                .unwrap();
        let err = factory
            .create_for_tenant("00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::TenantNotFound { .. }));
    }
}
