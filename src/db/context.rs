//! Database context and unit of work.
//!
//! A [`DatabaseContext`] owns exactly one open connection and the ordered set of
//! transactions begun on it. A [`UnitOfWork`] is one entry in that set: it is
//! registered when its transaction begins and removed on commit or rollback.
//!
//! Nested units of work share the outer transaction through savepoints, the
//! same way sqlx nests `Transaction`s.

use crate::db::executor::QueryExecutor;
use crate::db::factory::ConnectionFactory;
use crate::db::provider::{DataAdapter, DbConnection};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, DEFAULT_COMMAND_TIMEOUT_SECS, DatabaseType, TableSet, TransactionHandle,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What happens when a unit of work is created while another is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitOfWorkPolicy {
    /// Allowed; commands from `create_command` bind to the earliest active unit
    #[default]
    FirstWins,
    /// Fail with `InvalidState`
    Reject,
}

/// Per-context options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub command_timeout: Duration,
    pub policy: UnitOfWorkPolicy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            policy: UnitOfWorkPolicy::default(),
        }
    }
}

/// Metadata about an active transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub provider: DatabaseType,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub nested: bool,
}

struct ActiveTransaction {
    handle: TransactionHandle,
    provider: DatabaseType,
    savepoint: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Ordered membership set, earliest first.
#[derive(Default)]
struct ActiveTransactions {
    entries: RwLock<Vec<ActiveTransaction>>,
}

impl ActiveTransactions {
    fn read(&self) -> RwLockReadGuard<'_, Vec<ActiveTransaction>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ActiveTransaction>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, entry: ActiveTransaction) {
        self.write().push(entry);
    }

    /// Remove `handle` and every entry registered after it, since ending a
    /// transaction or savepoint ends the savepoints nested inside it.
    /// Returns how many entries were removed.
    fn deregister_from(&self, handle: &TransactionHandle) -> usize {
        let mut entries = self.write();
        match entries.iter().position(|e| &e.handle == handle) {
            Some(idx) => {
                let removed = entries.len() - idx;
                entries.truncate(idx);
                removed
            }
            None => 0,
        }
    }

    fn clear(&self) -> usize {
        self.write().drain(..).count()
    }

    fn earliest(&self) -> Option<TransactionHandle> {
        self.read().first().map(|e| e.handle.clone())
    }

    fn contains(&self, handle: &TransactionHandle) -> bool {
        self.read().iter().any(|e| &e.handle == handle)
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

fn begin_statement(provider: DatabaseType) -> &'static str {
    match provider {
        DatabaseType::MySQL => "START TRANSACTION",
        _ => "BEGIN",
    }
}

fn commit_statement(savepoint: Option<&str>) -> String {
    match savepoint {
        Some(name) => format!("RELEASE SAVEPOINT {name}"),
        None => "COMMIT".to_string(),
    }
}

fn rollback_statement(savepoint: Option<&str>) -> String {
    match savepoint {
        Some(name) => format!("ROLLBACK TO SAVEPOINT {name}"),
        None => "ROLLBACK".to_string(),
    }
}

/// One connection plus the transactions active on it.
pub struct DatabaseContext {
    connection: tokio::sync::Mutex<Option<DbConnection>>,
    provider: DatabaseType,
    transactions: ActiveTransactions,
    /// Rollbacks owed by units of work dropped while active
    pending_rollbacks: Mutex<Vec<String>>,
    /// Set once a timed-out statement leaves the connection unusable
    discarded: AtomicBool,
    executor: QueryExecutor,
    policy: UnitOfWorkPolicy,
}

impl std::fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("provider", &self.provider)
            .field("active_transactions", &self.transactions.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl DatabaseContext {
    /// Wrap an already-open connection.
    pub fn new(connection: DbConnection, options: ContextOptions) -> Self {
        Self {
            provider: connection.db_type(),
            connection: tokio::sync::Mutex::new(Some(connection)),
            transactions: ActiveTransactions::default(),
            pending_rollbacks: Mutex::new(Vec::new()),
            discarded: AtomicBool::new(false),
            executor: QueryExecutor::new(options.command_timeout),
            policy: options.policy,
        }
    }

    /// Open a connection for the request's tenant and wrap it.
    pub async fn connect(factory: &ConnectionFactory, tenant: Option<&str>) -> DbResult<Self> {
        Self::connect_with(factory, tenant, UnitOfWorkPolicy::default()).await
    }

    pub async fn connect_with(
        factory: &ConnectionFactory,
        tenant: Option<&str>,
        policy: UnitOfWorkPolicy,
    ) -> DbResult<Self> {
        let connection = factory.connect(tenant).await?;
        Ok(Self::new(
            connection,
            ContextOptions {
                command_timeout: factory.command_timeout(),
                policy,
            },
        ))
    }

    pub fn provider(&self) -> DatabaseType {
        self.provider
    }

    pub fn command_timeout(&self) -> Duration {
        self.executor.default_timeout()
    }

    pub fn policy(&self) -> UnitOfWorkPolicy {
        self.policy
    }

    /// Begin a transaction and register it as the newest active unit of work.
    pub async fn create_unit_of_work(&self) -> DbResult<UnitOfWork<'_>> {
        let mut guard = self.connection.lock().await;
        self.flush_pending(&mut guard).await;
        let conn = self.live(&mut guard)?;

        let depth = self.transactions.len();
        if depth > 0 && self.policy == UnitOfWorkPolicy::Reject {
            return Err(DbError::invalid_state(
                "A unit of work is already active on this context",
            ));
        }

        let handle = TransactionHandle::generate();
        let savepoint = (depth > 0).then(|| format!("sp_{}", handle.id()));
        let statement = match &savepoint {
            Some(name) => format!("SAVEPOINT {name}"),
            None => begin_statement(self.provider).to_string(),
        };
        let begun = self
            .executor
            .execute_control(conn, &statement, "begin transaction")
            .await;
        self.discard_on_timeout(&mut guard, begun)?;

        self.transactions.register(ActiveTransaction {
            handle: handle.clone(),
            provider: self.provider,
            savepoint: savepoint.clone(),
            started_at: Utc::now(),
            started: Instant::now(),
        });
        info!(
            transaction_id = %handle,
            provider = %self.provider,
            nested = savepoint.is_some(),
            "Transaction started"
        );

        Ok(UnitOfWork {
            context: self,
            handle: Some(handle),
            savepoint,
        })
    }

    /// A new command carrying the command timeout and, if any unit of work is
    /// active, the earliest one's transaction.
    pub fn create_command(&self) -> Command {
        let mut command = Command::default().with_timeout(self.command_timeout());
        command.bind_transaction(self.transactions.earliest());
        command
    }

    /// A new command bound to a specific unit of work.
    pub fn create_command_in(&self, unit_of_work: &UnitOfWork<'_>) -> Command {
        let mut command = Command::default().with_timeout(self.command_timeout());
        command.bind_transaction(unit_of_work.handle().cloned());
        command
    }

    pub fn data_adapter(&self, command: Command) -> DataAdapter {
        DataAdapter::new(self.provider, command)
    }

    pub async fn execute_non_query(&self, command: &Command) -> DbResult<u64> {
        let mut guard = self.connection.lock().await;
        self.flush_pending(&mut guard).await;
        let conn = self.live(&mut guard)?;
        self.check_transaction(command)?;
        let result = self.executor.execute_non_query(conn, command).await;
        self.discard_on_timeout(&mut guard, result)
    }

    pub async fn execute_data_set(&self, command: &Command) -> DbResult<TableSet> {
        let mut guard = self.connection.lock().await;
        self.flush_pending(&mut guard).await;
        let conn = self.live(&mut guard)?;
        self.check_transaction(command)?;
        let result = self.executor.fetch_tables(conn, command).await;
        self.discard_on_timeout(&mut guard, result)
    }

    /// Check the connection still answers.
    pub async fn ping(&self) -> DbResult<()> {
        let mut guard = self.connection.lock().await;
        let conn = self.live(&mut guard)?;
        conn.ping()
            .await
            .map_err(|e| DbError::query("ping", e))
    }

    /// Metadata for every active transaction, earliest first.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        self.transactions
            .read()
            .iter()
            .map(|e| TransactionInfo {
                transaction_id: e.handle.id().to_string(),
                provider: e.provider,
                started_at: e.started_at,
                duration_ms: u64::try_from(e.started.elapsed().as_millis()).unwrap_or(u64::MAX),
                nested: e.savepoint.is_some(),
            })
            .collect()
    }

    pub fn has_active_transaction(&self) -> bool {
        self.transactions.len() > 0
    }

    /// Roll back anything still open and close the connection.
    ///
    /// Failures are logged; the connection is gone either way.
    pub async fn close(self) {
        let mut guard = self.connection.lock().await;
        self.flush_pending(&mut guard).await;
        let Some(mut conn) = guard.take() else {
            return;
        };

        let leaked = self.transactions.clear();
        if leaked > 0 {
            warn!(
                provider = %self.provider,
                count = leaked,
                "Closing context with active transactions, rolling back"
            );
            if let Err(e) = self
                .executor
                .execute_control(&mut conn, "ROLLBACK", "rollback on close")
                .await
            {
                warn!(provider = %self.provider, error = %e, "Rollback on close failed");
            }
        }

        if let Err(e) = conn.close().await {
            warn!(provider = %self.provider, error = %e, "Failed to close connection");
        } else {
            debug!(provider = %self.provider, "Connection closed");
        }
    }

    fn check_transaction(&self, command: &Command) -> DbResult<()> {
        match command.transaction() {
            Some(handle) if !self.transactions.contains(handle) => {
                Err(DbError::invalid_state(format!(
                    "Transaction {handle} is no longer active"
                )))
            }
            _ => Ok(()),
        }
    }

    async fn flush_pending(&self, slot: &mut Option<DbConnection>) {
        let pending = std::mem::take(
            &mut *self
                .pending_rollbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for statement in pending {
            let Some(conn) = slot.as_mut() else {
                return;
            };
            let result = self
                .executor
                .execute_control(conn, &statement, "deferred rollback")
                .await;
            if let Err(e) = self.discard_on_timeout(slot, result) {
                warn!(provider = %self.provider, error = %e, "Deferred rollback failed");
            }
        }
    }

    /// Drop the connection when a statement timed out on it.
    ///
    /// The abandoned statement may still be running server-side, so the
    /// connection cannot serve another command. Its transactions end with it.
    fn discard_on_timeout<T>(
        &self,
        slot: &mut Option<DbConnection>,
        result: DbResult<T>,
    ) -> DbResult<T> {
        if matches!(result, Err(DbError::Timeout { .. })) && slot.take().is_some() {
            self.discarded.store(true, Ordering::SeqCst);
            self.pending_rollbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            let abandoned = self.transactions.clear();
            warn!(
                provider = %self.provider,
                abandoned_transactions = abandoned,
                "Command timed out, connection discarded"
            );
        }
        result
    }

    fn live<'g>(&self, slot: &'g mut Option<DbConnection>) -> DbResult<&'g mut DbConnection> {
        slot.as_mut().ok_or_else(|| {
            if self.discarded.load(Ordering::SeqCst) {
                DbError::invalid_state("Connection was discarded after a command timeout")
            } else {
                DbError::invalid_state("Database context is closed")
            }
        })
    }

    fn defer_rollback(&self, statement: String) {
        self.pending_rollbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement);
    }

    async fn finalize(&self, statement: &str, context: &str) -> DbResult<()> {
        let mut guard = self.connection.lock().await;
        self.flush_pending(&mut guard).await;
        let conn = self.live(&mut guard)?;
        let result = self.executor.execute_control(conn, statement, context).await;
        self.discard_on_timeout(&mut guard, result)
    }

    /// End a unit of work's entry and every entry nested inside it.
    fn end_transaction(&self, handle: &TransactionHandle) -> usize {
        let removed = self.transactions.deregister_from(handle);
        if removed > 1 {
            warn!(
                transaction_id = %handle,
                nested = removed - 1,
                "Nested units of work ended with their enclosing unit"
            );
        }
        removed
    }
}

/// One transaction on a [`DatabaseContext`].
///
/// Commit with [`save_changes`](Self::save_changes); anything else rolls back,
/// either through [`release`](Self::release) or when dropped.
pub struct UnitOfWork<'c> {
    context: &'c DatabaseContext,
    handle: Option<TransactionHandle>,
    savepoint: Option<String>,
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("handle", &self.handle)
            .field("nested", &self.savepoint.is_some())
            .finish()
    }
}

impl<'c> UnitOfWork<'c> {
    /// The transaction handle; `None` once committed or rolled back.
    pub fn handle(&self) -> Option<&TransactionHandle> {
        self.handle.as_ref()
    }

    /// False once finalized, or once an enclosing unit of work ended.
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| self.context.transactions.contains(handle))
    }

    pub fn context(&self) -> &'c DatabaseContext {
        self.context
    }

    /// A command bound to this unit of work.
    pub fn create_command(&self) -> Command {
        self.context.create_command_in(self)
    }

    /// Commit. Fails with `InvalidState` once the unit is finalized or an
    /// enclosing unit of work has ended.
    ///
    /// If the commit itself fails the unit stays active, so a later release
    /// still rolls back.
    pub async fn save_changes(&mut self) -> DbResult<()> {
        let Some(handle) = self.handle.clone() else {
            return Err(DbError::invalid_state(
                "Unit of work already finalized; save_changes cannot be called twice",
            ));
        };
        if !self.context.transactions.contains(&handle) {
            self.handle = None;
            return Err(DbError::invalid_state(format!(
                "Transaction {handle} already ended with its enclosing unit of work"
            )));
        }
        let statement = commit_statement(self.savepoint.as_deref());
        self.context.finalize(&statement, "commit").await?;
        self.context.end_transaction(&handle);
        self.handle = None;
        info!(transaction_id = %handle, "Transaction committed");
        Ok(())
    }

    /// Roll back if still active. Failures are logged, not returned.
    pub async fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !self.context.transactions.contains(&handle) {
            debug!(transaction_id = %handle, "Transaction already ended");
            return;
        }
        let statement = rollback_statement(self.savepoint.as_deref());
        match self.context.finalize(&statement, "rollback").await {
            Ok(()) => info!(transaction_id = %handle, "Transaction rolled back"),
            Err(e) => warn!(transaction_id = %handle, error = %e, "Rollback failed"),
        }
        self.context.end_transaction(&handle);
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.context.end_transaction(&handle) == 0 {
                return;
            }
            warn!(
                transaction_id = %handle,
                "Unit of work dropped while active, rollback deferred"
            );
            self.context
                .defer_rollback(rollback_statement(self.savepoint.as_deref()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements() {
        assert_eq!(begin_statement(DatabaseType::MySQL), "START TRANSACTION");
        assert_eq!(begin_statement(DatabaseType::SQLite), "BEGIN");
        assert_eq!(commit_statement(None), "COMMIT");
        assert_eq!(commit_statement(Some("sp_x")), "RELEASE SAVEPOINT sp_x");
        assert_eq!(rollback_statement(Some("sp_x")), "ROLLBACK TO SAVEPOINT sp_x");
    }

    #[test]
    fn test_membership_set_is_ordered() {
        let set = ActiveTransactions::default();
        let first = TransactionHandle::generate();
        let second = TransactionHandle::generate();
        for handle in [&first, &second] {
            set.register(ActiveTransaction {
                handle: handle.clone(),
                provider: DatabaseType::SQLite,
                savepoint: None,
                started_at: Utc::now(),
                started: Instant::now(),
            });
        }
        assert_eq!(set.earliest(), Some(first.clone()));
        assert_eq!(set.deregister_from(&second), 1);
        assert_eq!(set.deregister_from(&second), 0);
        assert_eq!(set.earliest(), Some(first));
    }

    #[test]
    fn test_ending_a_unit_ends_those_nested_inside_it() {
        let set = ActiveTransactions::default();
        let handles: Vec<_> = (0..3).map(|_| TransactionHandle::generate()).collect();
        for (depth, handle) in handles.iter().enumerate() {
            set.register(ActiveTransaction {
                handle: handle.clone(),
                provider: DatabaseType::SQLite,
                savepoint: (depth > 0).then(|| format!("sp_{depth}")),
                started_at: Utc::now(),
                started: Instant::now(),
            });
        }
        assert_eq!(set.deregister_from(&handles[1]), 2);
        assert!(set.contains(&handles[0]));
        assert!(!set.contains(&handles[2]));
        assert_eq!(set.deregister_from(&handles[0]), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_default_options() {
        let options = ContextOptions::default();
        assert_eq!(options.command_timeout, Duration::from_secs(240));
        assert_eq!(options.policy, UnitOfWorkPolicy::FirstWins);
    }
}
