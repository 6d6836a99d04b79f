//! Sample IP address repository.
//!
//! Statement text depends on the driver: MySQL uses stored procedures for
//! everything, PostgreSQL uses a procedure for the insert and set-returning
//! functions for reads, SQLite uses inline SQL.

use super::{Repository, column, scalar_to_int, scalar_to_string};
use crate::db::context::{DatabaseContext, UnitOfWork};
use crate::error::DbResult;
use crate::models::{Command, CommandKind, DatabaseType, TableRow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Table layout used by the SQLite statements.
pub const SQLITE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sample_ip (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressRecord {
    pub id: i64,
    pub ip_address: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIpAddress {
    pub ip_address: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewIpAddress {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// How one statement is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    Text(&'static str),
    Procedure(&'static str),
}

/// Per-driver statements for the sample IP table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpAddressStatements {
    pub add: Statement,
    pub list_all: Statement,
    pub count_active: Statement,
}

impl IpAddressStatements {
    pub fn for_provider(provider: DatabaseType) -> Self {
        match provider {
            DatabaseType::MySQL | DatabaseType::SqlServer => Self {
                add: Statement::Procedure("sp_add_sample_ip"),
                list_all: Statement::Procedure("sp_get_all_sample_ips"),
                count_active: Statement::Procedure("sp_count_active_sample_ips"),
            },
            DatabaseType::PostgreSQL => Self {
                add: Statement::Procedure("sp_add_sample_ip"),
                list_all: Statement::Text(
                    "SELECT id, ip_address, is_active FROM get_all_sample_ips()",
                ),
                count_active: Statement::Text("SELECT count_active_sample_ips()"),
            },
            DatabaseType::SQLite => Self {
                add: Statement::Text(
                    "INSERT INTO sample_ip (ip_address, is_active) VALUES (@ip_address, @is_active)",
                ),
                list_all: Statement::Text(
                    "SELECT id, ip_address, is_active FROM sample_ip ORDER BY id",
                ),
                count_active: Statement::Text(
                    "SELECT COUNT(*) FROM sample_ip WHERE is_active = 1",
                ),
            },
        }
    }
}

/// Reads and writes sample IP addresses.
#[derive(Debug, Clone, Copy)]
pub struct IpAddressRepository<'c> {
    repository: Repository<'c>,
    statements: IpAddressStatements,
}

impl<'c> IpAddressRepository<'c> {
    pub fn new(context: &'c DatabaseContext) -> Self {
        Self {
            repository: Repository::new(context),
            statements: IpAddressStatements::for_provider(context.provider()),
        }
    }

    pub fn statements(&self) -> IpAddressStatements {
        self.statements
    }

    fn command(&self, statement: Statement) -> Command {
        shape(self.repository.context().create_command(), statement)
    }

    fn add_command(&self, base: Command, ip: &NewIpAddress) -> Command {
        let command = base.with_parameter("ip_address", ip.ip_address.as_str());
        match self.statements.add {
            // The stored procedures take the address only
            Statement::Procedure(_) => command,
            Statement::Text(_) => command.with_parameter("is_active", ip.is_active),
        }
    }

    /// Insert one address; returns the affected row count.
    pub async fn add(&self, ip: &NewIpAddress) -> DbResult<u64> {
        let command = self.add_command(self.command(self.statements.add), ip);
        self.repository.execute_non_query(&command).await
    }

    /// Insert one address inside a specific unit of work.
    pub async fn add_in(&self, unit_of_work: &UnitOfWork<'_>, ip: &NewIpAddress) -> DbResult<u64> {
        let base = shape(unit_of_work.create_command(), self.statements.add);
        let command = self.add_command(base, ip);
        self.repository.execute_non_query(&command).await
    }

    pub async fn list_all(&self) -> DbResult<Vec<IpAddressRecord>> {
        let command = self.command(self.statements.list_all);
        self.repository.query_map(&command, map_record).await
    }

    pub async fn count_active(&self) -> DbResult<i64> {
        let command = self.command(self.statements.count_active);
        self.repository.execute_scalar_int(&command).await
    }
}

fn shape(base: Command, statement: Statement) -> Command {
    match statement {
        Statement::Text(sql) => base.with_text(sql),
        Statement::Procedure(name) => base.with_text(name).with_kind(CommandKind::StoredProcedure),
    }
}

fn map_record(row: TableRow<'_>) -> DbResult<IpAddressRecord> {
    Ok(IpAddressRecord {
        id: scalar_to_int(column(&row, "id")?),
        ip_address: scalar_to_string(column(&row, "ip_address")?),
        is_active: match row.get("is_active") {
            Some(JsonValue::Bool(b)) => *b,
            Some(other) => scalar_to_int(other) != 0,
            None => true,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;
    use serde_json::json;

    #[test]
    fn test_statements_per_provider() {
        let mysql = IpAddressStatements::for_provider(DatabaseType::MySQL);
        assert_eq!(mysql.add, Statement::Procedure("sp_add_sample_ip"));
        let pg = IpAddressStatements::for_provider(DatabaseType::PostgreSQL);
        assert!(matches!(pg.list_all, Statement::Text(_)));
        let sqlite = IpAddressStatements::for_provider(DatabaseType::SQLite);
        assert!(matches!(sqlite.add, Statement::Text(sql) if sql.contains("@ip_address")));
    }

    #[test]
    fn test_map_record() {
        let table = Table {
            columns: vec!["Id".into(), "IP_ADDRESS".into(), "is_active".into()],
            rows: vec![
                vec![json!(1), json!("10.0.0.1"), json!(1)],
                vec![json!(2), json!("10.0.0.2"), json!(false)],
            ],
        };
        let records: Vec<_> = table.iter().map(map_record).collect::<DbResult<_>>().unwrap();
        assert_eq!(
            records,
            vec![
                IpAddressRecord {
                    id: 1,
                    ip_address: "10.0.0.1".into(),
                    is_active: true
                },
                IpAddressRecord {
                    id: 2,
                    ip_address: "10.0.0.2".into(),
                    is_active: false
                },
            ]
        );
    }

    #[test]
    fn test_map_record_requires_columns() {
        let table = Table {
            columns: vec!["id".into()],
            rows: vec![vec![json!(1)]],
        };
        assert!(map_record(table.row(0).unwrap()).is_err());
    }
}
