//! Repository base.
//!
//! [`Repository`] builds commands on a [`DatabaseContext`] and runs them.
//! Typed scalar helpers turn a database null (or an unconvertible value) into
//! the type's default, but execution failures always propagate.

pub mod ip_address;

pub use ip_address::{IpAddressRecord, IpAddressRepository, IpAddressStatements, NewIpAddress};

use crate::db::context::DatabaseContext;
use crate::db::types::DATE_TIME_FORMAT;
use crate::error::{DbError, DbResult};
use crate::models::{Command, CommandKind, Table, TableRow, TableSet};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

/// Command helpers over one database context.
#[derive(Debug, Clone, Copy)]
pub struct Repository<'c> {
    context: &'c DatabaseContext,
}

impl<'c> Repository<'c> {
    pub fn new(context: &'c DatabaseContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &'c DatabaseContext {
        self.context
    }

    /// A text command from the context (timeout and active transaction attached).
    pub fn command(&self, text: &str) -> Command {
        self.context.create_command().with_text(text)
    }

    /// A stored procedure command from the context.
    pub fn procedure(&self, name: &str) -> Command {
        self.context
            .create_command()
            .with_text(name)
            .with_kind(CommandKind::StoredProcedure)
    }

    /// Returns the number of affected rows.
    pub async fn execute_non_query(&self, command: &Command) -> DbResult<u64> {
        self.context.execute_non_query(command).await
    }

    /// First column of the first row, or `Null` when there is none.
    pub async fn execute_scalar(&self, command: &Command) -> DbResult<JsonValue> {
        let table = self.execute_data_table(command).await?;
        Ok(table.first_value())
    }

    /// `""` for a null or missing value.
    pub async fn execute_scalar_string(&self, command: &Command) -> DbResult<String> {
        self.execute_scalar(command)
            .await
            .map(|v| scalar_to_string(&v))
    }

    /// `0` for a null or unconvertible value.
    pub async fn execute_scalar_int(&self, command: &Command) -> DbResult<i64> {
        self.execute_scalar(command).await.map(|v| scalar_to_int(&v))
    }

    /// `NaiveDateTime::MIN` for a null or unparsable value.
    pub async fn execute_scalar_date_time(&self, command: &Command) -> DbResult<NaiveDateTime> {
        self.execute_scalar(command)
            .await
            .map(|v| scalar_to_date_time(&v))
    }

    pub async fn execute_data_set(&self, command: &Command) -> DbResult<TableSet> {
        self.context
            .data_adapter(command.clone())
            .fill(self.context)
            .await
    }

    /// The first table, empty when the command produced no rows.
    pub async fn execute_data_table(&self, command: &Command) -> DbResult<Table> {
        self.execute_data_set(command)
            .await
            .map(TableSet::into_first)
    }

    /// Map every row of the first table with an explicit mapper.
    pub async fn query_map<T, F>(&self, command: &Command, mapper: F) -> DbResult<Vec<T>>
    where
        F: Fn(TableRow<'_>) -> DbResult<T>,
    {
        let table = self.execute_data_table(command).await?;
        table.iter().map(mapper).collect()
    }
}

/// Read a required column from a row.
pub fn column<'a>(row: &TableRow<'a>, name: &str) -> DbResult<&'a JsonValue> {
    row.get(name).ok_or_else(|| {
        DbError::query("read column", sqlx::Error::ColumnNotFound(name.to_string()))
    })
}

pub fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn scalar_to_int(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().and_then(float_to_int))
            .unwrap_or(0),
        JsonValue::Bool(b) => i64::from(*b),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    let rounded = f.round();
    (rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64)
        .then_some(rounded as i64)
}

pub fn scalar_to_date_time(value: &JsonValue) -> NaiveDateTime {
    match value {
        JsonValue::String(s) => parse_date_time(s.trim()).unwrap_or(NaiveDateTime::MIN),
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc())
            .unwrap_or(NaiveDateTime::MIN),
        _ => NaiveDateTime::MIN,
    }
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in [DATE_TIME_FORMAT, "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
