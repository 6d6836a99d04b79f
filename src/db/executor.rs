//! Command execution engine.
//!
//! This module turns a [`Command`] into driver SQL and runs it on one
//! connection:
//! - Named `@param` placeholders are rewritten to the driver's positional form
//! - Stored procedures become `CALL name(...)`
//! - Every row-producing statement becomes one [`Table`]
//! - Each call is bounded by the command timeout
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific statement execution
//! - `postgres`: PostgreSQL-specific statement execution
//! - `sqlite`: SQLite-specific statement execution

use crate::db::params::BindParams;
use crate::db::provider::DbConnection;
use crate::db::types::RowValues;
use crate::error::{DbError, DbResult, QueryContext};
use crate::models::{
    Command, CommandKind, CommandParameter, DEFAULT_COMMAND_TIMEOUT_SECS, DatabaseType,
    QueryParam, Table, TableSet,
};
use futures_util::TryStreamExt;
use sqlx::Either;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// A command rewritten for one driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub sql: String,
    /// Values in placeholder order
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaceholderStyle {
    /// `?`, one value per occurrence
    Question,
    /// `$n`, repeated names reuse their index
    Dollar,
}

impl PlaceholderStyle {
    fn for_provider(db: DatabaseType) -> Self {
        match db {
            DatabaseType::PostgreSQL => Self::Dollar,
            _ => Self::Question,
        }
    }
}

/// Rewrite a command into the SQL and positional values a driver expects.
pub fn prepare(command: &Command, db: DatabaseType) -> DbResult<PreparedCommand> {
    let style = PlaceholderStyle::for_provider(db);
    match command.kind() {
        CommandKind::Text => Ok(rewrite_named_parameters(
            command.text(),
            command.parameters(),
            style,
        )),
        CommandKind::StoredProcedure => {
            if db == DatabaseType::SQLite {
                return Err(DbError::invalid_input(
                    "SQLite does not support stored procedures",
                ));
            }
            let name = command.text().trim();
            if name.is_empty() {
                return Err(DbError::invalid_input("Stored procedure name is empty"));
            }
            let placeholders = (1..=command.parameters().len())
                .map(|i| match style {
                    PlaceholderStyle::Question => "?".to_string(),
                    PlaceholderStyle::Dollar => format!("${i}"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            Ok(PreparedCommand {
                sql: format!("CALL {name}({placeholders})"),
                params: command
                    .parameters()
                    .iter()
                    .map(|p| p.value.clone())
                    .collect(),
            })
        }
    }
}

/// Replace `@name` placeholders outside quotes and comments.
///
/// Names with no matching parameter (and `@@system` variables) are left as-is.
fn rewrite_named_parameters(
    sql: &str,
    parameters: &[CommandParameter],
    style: PlaceholderStyle,
) -> PreparedCommand {
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    // Dollar style: parameter index -> assigned position
    let mut assigned: Vec<Option<usize>> = vec![None; parameters.len()];
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                for q in chars.by_ref() {
                    out.push(q);
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for n in chars.by_ref() {
                    out.push(n);
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(c);
                if let Some(star) = chars.next() {
                    out.push(star);
                }
                let mut prev = '\0';
                for n in chars.by_ref() {
                    out.push(n);
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            '@' if chars.peek() == Some(&'@') => {
                out.push(c);
                while let Some(n) = chars.next_if(|n| *n == '@') {
                    out.push(n);
                }
            }
            '@' if chars
                .peek()
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some(n) = chars.next_if(|n| n.is_ascii_alphanumeric() || *n == '_') {
                    name.push(n);
                }
                match parameters
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(&name))
                {
                    Some(idx) => match style {
                        PlaceholderStyle::Question => {
                            out.push('?');
                            params.push(parameters[idx].value.clone());
                        }
                        PlaceholderStyle::Dollar => {
                            let position = *assigned[idx].get_or_insert_with(|| {
                                params.push(parameters[idx].value.clone());
                                params.len()
                            });
                            out.push_str(&format!("${position}"));
                        }
                    },
                    None => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
            }
            _ => out.push(c),
        }
    }

    PreparedCommand { sql: out, params }
}

/// Runs commands on a single connection with a default timeout.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    default_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute a command and return the affected row count.
    pub async fn execute_non_query(
        &self,
        conn: &mut DbConnection,
        command: &Command,
    ) -> DbResult<u64> {
        let prepared = prepare(command, conn.db_type())?;
        let limit = command.timeout().unwrap_or(self.default_timeout);
        debug!(
            sql = %prepared.sql,
            params = prepared.params.len(),
            timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            "Executing non-query"
        );
        let fut = async {
            match conn {
                DbConnection::MySql(c) => mysql::execute(c, &prepared).await,
                DbConnection::Postgres(c) => postgres::execute(c, &prepared).await,
                DbConnection::SQLite(c) => sqlite::execute(c, &prepared).await,
            }
        };
        with_timeout("execute_non_query", limit, fut).await
    }

    /// Execute a command and collect every row-producing statement.
    pub async fn fetch_tables(
        &self,
        conn: &mut DbConnection,
        command: &Command,
    ) -> DbResult<TableSet> {
        let prepared = prepare(command, conn.db_type())?;
        let limit = command.timeout().unwrap_or(self.default_timeout);
        debug!(
            sql = %prepared.sql,
            params = prepared.params.len(),
            timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            "Executing query"
        );
        let fut = async {
            match conn {
                DbConnection::MySql(c) => mysql::fetch_tables(c, &prepared).await,
                DbConnection::Postgres(c) => postgres::fetch_tables(c, &prepared).await,
                DbConnection::SQLite(c) => sqlite::fetch_tables(c, &prepared).await,
            }
        };
        with_timeout("execute_data_set", limit, fut).await
    }

    /// Run a parameterless control statement such as `BEGIN` or `COMMIT`.
    pub async fn execute_control(
        &self,
        conn: &mut DbConnection,
        sql: &str,
        context: &str,
    ) -> DbResult<()> {
        debug!(sql = %sql, "Executing control statement");
        let fut = async {
            use sqlx::Executor;
            match conn {
                DbConnection::MySql(c) => c.execute(sql).await.map(|_| ()),
                DbConnection::Postgres(c) => c.execute(sql).await.map(|_| ()),
                DbConnection::SQLite(c) => c.execute(sql).await.map(|_| ()),
            }
        };
        match timeout(self.default_timeout, fut).await {
            Ok(result) => result.query_context(context),
            Err(_) => Err(timeout_error(context, self.default_timeout)),
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> DbResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result.query_context(operation),
        Err(_) => Err(timeout_error(operation, limit)),
    }
}

fn timeout_error(operation: &str, limit: Duration) -> DbError {
    DbError::timeout(operation, limit)
}

/// Groups a result stream into tables, one per row-producing statement.
#[derive(Default)]
struct TableCollector {
    tables: Vec<Table>,
    current: Option<Table>,
}

impl TableCollector {
    fn push_row<R: RowValues>(&mut self, row: &R) {
        let table = self
            .current
            .get_or_insert_with(|| Table::new(row.column_names()));
        table.rows.push(row.values());
    }

    fn end_statement(&mut self) {
        if let Some(table) = self.current.take() {
            self.tables.push(table);
        }
    }

    fn finish(mut self) -> TableSet {
        self.end_statement();
        TableSet {
            tables: self.tables,
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySqlConnection;

    pub async fn execute(
        conn: &mut MySqlConnection,
        prepared: &PreparedCommand,
    ) -> Result<u64, sqlx::Error> {
        // Raw SQL when unparameterized: some statements can't be prepared
        if prepared.params.is_empty() {
            use sqlx::Executor;
            return conn
                .execute(prepared.sql.as_str())
                .await
                .map(|r| r.rows_affected());
        }
        sqlx::query(&prepared.sql)
            .bind_params(&prepared.params)
            .execute(&mut *conn)
            .await
            .map(|r| r.rows_affected())
    }

    #[allow(deprecated)]
    pub async fn fetch_tables(
        conn: &mut MySqlConnection,
        prepared: &PreparedCommand,
    ) -> Result<TableSet, sqlx::Error> {
        let mut stream = if prepared.params.is_empty() {
            sqlx::Executor::fetch_many(&mut *conn, prepared.sql.as_str())
        } else {
            let query = sqlx::query(&prepared.sql).bind_params(&prepared.params);
            sqlx::Executor::fetch_many(&mut *conn, query)
        };
        let mut collector = TableCollector::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(_) => collector.end_statement(),
                Either::Right(row) => collector.push_row(&row),
            }
        }
        Ok(collector.finish())
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;

    pub async fn execute(
        conn: &mut PgConnection,
        prepared: &PreparedCommand,
    ) -> Result<u64, sqlx::Error> {
        if prepared.params.is_empty() {
            use sqlx::Executor;
            return conn
                .execute(prepared.sql.as_str())
                .await
                .map(|r| r.rows_affected());
        }
        sqlx::query(&prepared.sql)
            .bind_params(&prepared.params)
            .execute(&mut *conn)
            .await
            .map(|r| r.rows_affected())
    }

    #[allow(deprecated)]
    pub async fn fetch_tables(
        conn: &mut PgConnection,
        prepared: &PreparedCommand,
    ) -> Result<TableSet, sqlx::Error> {
        let mut stream = if prepared.params.is_empty() {
            sqlx::Executor::fetch_many(&mut *conn, prepared.sql.as_str())
        } else {
            let query = sqlx::query(&prepared.sql).bind_params(&prepared.params);
            sqlx::Executor::fetch_many(&mut *conn, query)
        };
        let mut collector = TableCollector::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(_) => collector.end_statement(),
                Either::Right(row) => collector.push_row(&row),
            }
        }
        Ok(collector.finish())
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqliteConnection;

    pub async fn execute(
        conn: &mut SqliteConnection,
        prepared: &PreparedCommand,
    ) -> Result<u64, sqlx::Error> {
        if prepared.params.is_empty() {
            use sqlx::Executor;
            return conn
                .execute(prepared.sql.as_str())
                .await
                .map(|r| r.rows_affected());
        }
        sqlx::query(&prepared.sql)
            .bind_params(&prepared.params)
            .execute(&mut *conn)
            .await
            .map(|r| r.rows_affected())
    }

    #[allow(deprecated)]
    pub async fn fetch_tables(
        conn: &mut SqliteConnection,
        prepared: &PreparedCommand,
    ) -> Result<TableSet, sqlx::Error> {
        let mut stream = if prepared.params.is_empty() {
            sqlx::Executor::fetch_many(&mut *conn, prepared.sql.as_str())
        } else {
            let query = sqlx::query(&prepared.sql).bind_params(&prepared.params);
            sqlx::Executor::fetch_many(&mut *conn, query)
        };
        let mut collector = TableCollector::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(_) => collector.end_statement(),
                Either::Right(row) => collector.push_row(&row),
            }
        }
        Ok(collector.finish())
    }
}
