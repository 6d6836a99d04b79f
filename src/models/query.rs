//! Command and result models.
//!
//! This module defines the command object handed out by a database context and
//! the row-set types produced by executing it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// A parameter value for parameterized commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Date and time without a zone
    DateTime(NaiveDateTime),
    /// JSON document
    Json(JsonValue),
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDateTime> for QueryParam {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifies one transaction begun by a unit of work. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: String,
}

impl TransactionHandle {
    pub(crate) fn generate() -> Self {
        Self {
            id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Plain SQL with `@name` placeholders
    #[default]
    Text,
    /// Name of a stored procedure; parameters are passed in declaration order
    StoredProcedure,
}

/// A named command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandParameter {
    /// Stored without the leading `@`
    pub name: String,
    pub value: QueryParam,
}

/// A command built by a database context. Created fresh per call.
#[derive(Debug, Clone, Default)]
pub struct Command {
    text: String,
    kind: CommandKind,
    parameters: Vec<CommandParameter>,
    transaction: Option<TransactionHandle>,
    timeout: Option<Duration>,
}

impl Command {
    /// Create a text command.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Create a stored procedure command.
    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a named parameter. A leading `@` in the name is optional.
    pub fn with_parameter(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        self.add_parameter(name, value);
        self
    }

    /// Add a named parameter, replacing an earlier one with the same name.
    pub fn add_parameter(&mut self, name: &str, value: impl Into<QueryParam>) -> &mut Self {
        let name = normalize_parameter_name(name);
        let value = value.into();
        match self
            .parameters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.value = value,
            None => self.parameters.push(CommandParameter { name, value }),
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn bind_transaction(&mut self, handle: Option<TransactionHandle>) {
        self.transaction = handle;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn parameters(&self) -> &[CommandParameter] {
        &self.parameters
    }

    /// Look up a parameter value by name (case-insensitive).
    pub fn parameter(&self, name: &str) -> Option<&QueryParam> {
        let name = normalize_parameter_name(name);
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
            .map(|p| &p.value)
    }

    /// The transaction this command joins, if any.
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn normalize_parameter_name(name: &str) -> String {
    name.trim().trim_start_matches(['@', ':', '$']).to_string()
}

/// One result set: ordered column names and rows of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn row(&self, index: usize) -> Option<TableRow<'_>> {
        self.rows.get(index).map(|values| TableRow {
            table: self,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = TableRow<'_>> {
        self.rows.iter().map(move |values| TableRow {
            table: self,
            values,
        })
    }

    /// The first column of the first row; `Null` when the table is empty.
    pub fn first_value(&self) -> JsonValue {
        self.rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(JsonValue::Null)
    }
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    table: &'a Table,
    values: &'a [JsonValue],
}

impl<'a> TableRow<'a> {
    /// Value of a column by name; `None` if the column does not exist.
    pub fn get(&self, column: &str) -> Option<&'a JsonValue> {
        self.table
            .column_index(column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, index: usize) -> Option<&'a JsonValue> {
        self.values.get(index)
    }

    pub fn values(&self) -> &'a [JsonValue] {
        self.values
    }
}

/// All result sets produced by one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSet {
    pub tables: Vec<Table>,
}

impl TableSet {
    pub fn first(&self) -> Option<&Table> {
        self.tables.first()
    }

    pub fn into_first(self) -> Table {
        self.tables.into_iter().next().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_from_option() {
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(42)), QueryParam::Int(42));
    }

    #[test]
    fn test_add_parameter_normalizes_and_replaces() {
        let mut cmd = Command::new("SELECT @id");
        cmd.add_parameter("@id", 1);
        cmd.add_parameter("ID", 2);
        assert_eq!(cmd.parameters().len(), 1);
        assert_eq!(cmd.parameter("id"), Some(&QueryParam::Int(2)));
        assert_eq!(cmd.parameters()[0].name, "id");
    }

    #[test]
    fn test_stored_procedure_kind() {
        let cmd = Command::stored_procedure("sp_list").with_parameter("active", true);
        assert_eq!(cmd.kind(), CommandKind::StoredProcedure);
        assert_eq!(cmd.text(), "sp_list");
        assert!(cmd.transaction().is_none());
    }

    #[test]
    fn test_transaction_handles_are_unique() {
        let a = TransactionHandle::generate();
        let b = TransactionHandle::generate();
        assert_ne!(a, b);
        assert!(a.id().starts_with("tx_"));
        assert_eq!(a.id().len(), 3 + 32);
    }

    #[test]
    fn test_table_row_lookup_is_case_insensitive() {
        let table = Table {
            columns: vec!["Id".into(), "IpAddress".into()],
            rows: vec![vec![json!(1), json!("10.0.0.1")]],
        };
        let row = table.row(0).unwrap();
        assert_eq!(row.get("ipaddress"), Some(&json!("10.0.0.1")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(table.first_value(), json!(1));
    }

    #[test]
    fn test_empty_table_set() {
        let set = TableSet::default();
        assert!(set.first().is_none());
        assert_eq!(set.into_first(), Table::default());
        assert_eq!(Table::default().first_value(), JsonValue::Null);
    }
}
