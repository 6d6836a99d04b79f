//! Keyword connection strings (`Key=Value;Key=Value`).
//!
//! Each driver variant maps the logical fields (server, port, database, user,
//! password) to a canonical keyword plus the aliases that driver accepts.
//! Tenant overrides remove every alias of a field before re-adding it, so the
//! serialized string never carries the same field twice.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionFields, DatabaseType};

/// Logical connection-string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionField {
    Server,
    Port,
    Database,
    User,
    Password,
}

/// The four fields a tenant record always overrides.
pub const CREDENTIAL_FIELDS: [ConnectionField; 4] = [
    ConnectionField::Server,
    ConnectionField::Database,
    ConnectionField::User,
    ConnectionField::Password,
];

const MASK: &str = "****";

/// Maps logical fields to a driver's connection-string keywords.
pub trait ConnectionStringBuilder: Send + Sync {
    fn provider(&self) -> DatabaseType;

    /// Accepted keywords for a field, canonical first. Empty when unsupported.
    fn keywords(&self, field: ConnectionField) -> &'static [&'static str];

    /// Parse a connection string into a model bound to this builder.
    fn build(&self, connection_string: &str) -> DbResult<ConnectionStringModel> {
        Ok(ConnectionStringModel {
            provider: self.provider(),
            entries: parse_entries(connection_string)?,
        })
    }
}

/// SQL Server keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerConnectionString;

/// MySQL / MariaDB keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnectionString;

/// PostgreSQL keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnectionString;

/// SQLite keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnectionString;

impl ConnectionStringBuilder for SqlServerConnectionString {
    fn provider(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn keywords(&self, field: ConnectionField) -> &'static [&'static str] {
        match field {
            ConnectionField::Server => &[
                "Server",
                "Data Source",
                "Address",
                "Addr",
                "Network Address",
            ],
            ConnectionField::Port => &[],
            ConnectionField::Database => &["Database", "Initial Catalog"],
            ConnectionField::User => &["User Id", "UID", "User"],
            ConnectionField::Password => &["Password", "PWD"],
        }
    }
}

impl ConnectionStringBuilder for MySqlConnectionString {
    fn provider(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn keywords(&self, field: ConnectionField) -> &'static [&'static str] {
        match field {
            ConnectionField::Server => &[
                "Server",
                "Host",
                "Data Source",
                "DataSource",
                "Address",
                "Addr",
                "Network Address",
            ],
            ConnectionField::Port => &["Port"],
            ConnectionField::Database => &["Database", "Initial Catalog"],
            ConnectionField::User => &["Uid", "User Id", "Username", "User name", "User"],
            ConnectionField::Password => &["Pwd", "Password"],
        }
    }
}

impl ConnectionStringBuilder for PostgresConnectionString {
    fn provider(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn keywords(&self, field: ConnectionField) -> &'static [&'static str] {
        match field {
            ConnectionField::Server => &["Host", "Server"],
            ConnectionField::Port => &["Port"],
            ConnectionField::Database => &["Database", "DB"],
            ConnectionField::User => &["Username", "User Id", "User Name", "UserId", "User"],
            ConnectionField::Password => &["Password", "PSW", "PWD"],
        }
    }
}

impl ConnectionStringBuilder for SqliteConnectionString {
    fn provider(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn keywords(&self, field: ConnectionField) -> &'static [&'static str] {
        match field {
            ConnectionField::Database => &["Data Source", "DataSource", "Filename"],
            _ => &[],
        }
    }
}

/// The builder for a database type.
pub fn builder_for(db_type: DatabaseType) -> &'static dyn ConnectionStringBuilder {
    match db_type {
        DatabaseType::SqlServer => &SqlServerConnectionString,
        DatabaseType::MySQL => &MySqlConnectionString,
        DatabaseType::PostgreSQL => &PostgresConnectionString,
        DatabaseType::SQLite => &SqliteConnectionString,
    }
}

/// A parsed connection string. Entry order is preserved on serialization.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionStringModel {
    provider: DatabaseType,
    entries: Vec<(String, String)>,
}

impl ConnectionStringModel {
    pub fn provider(&self) -> DatabaseType {
        self.provider
    }

    fn keywords(&self, field: ConnectionField) -> &'static [&'static str] {
        builder_for(self.provider).keywords(field)
    }

    /// Whether this driver accepts the field at all.
    pub fn supports(&self, field: ConnectionField) -> bool {
        !self.keywords(field).is_empty()
    }

    /// Value of a logical field under any of its aliases.
    pub fn get(&self, field: ConnectionField) -> Option<&str> {
        let keywords = self.keywords(field);
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| keywords.iter().any(|k| k.eq_ignore_ascii_case(key)))
            .map(|(_, value)| value.as_str())
    }

    /// Value of a raw keyword (case-insensitive), e.g. `SslMode`.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key.trim()))
            .map(|(_, value)| value.as_str())
    }

    /// Remove a field under every alias. Returns whether anything was removed.
    pub fn remove(&mut self, field: ConnectionField) -> bool {
        let keywords = self.keywords(field);
        let before = self.entries.len();
        self.entries
            .retain(|(key, _)| !keywords.iter().any(|k| k.eq_ignore_ascii_case(key)));
        before != self.entries.len()
    }

    /// Set a field under its canonical keyword, dropping any alias entries.
    pub fn set(&mut self, field: ConnectionField, value: impl Into<String>) -> DbResult<()> {
        let Some(canonical) = self.keywords(field).first() else {
            return Err(DbError::configuration(format!(
                "{} connection strings do not support {field:?}",
                self.provider
            )));
        };
        self.remove(field);
        self.entries.push((canonical.to_string(), value.into()));
        Ok(())
    }

    /// Replace the credential fields with a tenant's values.
    ///
    /// The port is only replaced when the tenant record carries one. Fields the
    /// driver does not support are skipped.
    pub fn override_with(&mut self, fields: &ConnectionFields) -> DbResult<()> {
        let values = [
            (ConnectionField::Server, fields.server.as_str()),
            (ConnectionField::Database, fields.database.as_str()),
            (ConnectionField::User, fields.user.as_str()),
            (ConnectionField::Password, fields.password.as_str()),
        ];
        for (field, value) in values {
            if self.supports(field) {
                self.set(field, value)?;
            }
        }
        if let Some(port) = fields.port {
            if self.supports(ConnectionField::Port) {
                self.set(ConnectionField::Port, port.to_string())?;
            }
        }
        Ok(())
    }

    /// Serialize back to `Key=Value;...` form.
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={}", quote_value(value)))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Serialized form with the password replaced; safe to log.
    pub fn masked(&self) -> String {
        let mut copy = self.clone();
        if copy.get(ConnectionField::Password).is_some() {
            // Set cannot fail: a password is present, so the field is supported.
            let _ = copy.set(ConnectionField::Password, MASK);
        }
        copy.serialize()
    }
}

impl std::fmt::Debug for ConnectionStringModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStringModel")
            .field("provider", &self.provider)
            .field("connection_string", &self.masked())
            .finish()
    }
}

impl std::fmt::Display for ConnectionStringModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_entries(input: &str) -> DbResult<Vec<(String, String)>> {
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        // Key
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(';') if key.trim().is_empty() => key.clear(),
                Some(';') | None if !key.trim().is_empty() => {
                    return Err(DbError::configuration(format!(
                        "Connection string segment '{}' has no '='",
                        key.trim()
                    )));
                }
                None => return Ok(entries),
                Some(c) => key.push(c),
            }
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(DbError::configuration(
                "Connection string contains an empty keyword",
            ));
        }

        // Value
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let value = match chars.peek() {
            Some(&quote @ ('"' | '\'')) => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => {
                            if chars.next_if_eq(&quote).is_some() {
                                value.push(quote);
                            } else {
                                break;
                            }
                        }
                        Some(c) => value.push(c),
                        None => {
                            return Err(DbError::configuration(format!(
                                "Unterminated quoted value for '{key}'"
                            )));
                        }
                    }
                }
                while chars.next_if(|c| c.is_whitespace()).is_some() {}
                match chars.next() {
                    Some(';') | None => {}
                    Some(other) => {
                        return Err(DbError::configuration(format!(
                            "Unexpected '{other}' after quoted value for '{key}'"
                        )));
                    }
                }
                value
            }
            _ => {
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value.trim().to_string()
            }
        };

        // Later duplicates win
        entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        entries.push((key, value));
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.contains(';')
        || value.starts_with('"')
        || value.starts_with('\'')
        || value.trim() != value;
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionRecord, ConnectionRole};

    fn tenant_fields() -> ConnectionFields {
        ConnectionRecord::new(ConnectionRole::Main, "S", "D", "U", "P").fields()
    }

    fn count_alias_entries(model: &ConnectionStringModel, field: ConnectionField) -> usize {
        let keywords = model.keywords(field);
        model
            .entries
            .iter()
            .filter(|(k, _)| keywords.iter().any(|kw| kw.eq_ignore_ascii_case(k)))
            .count()
    }

    #[test]
    fn test_parse_basic() {
        let model = MySqlConnectionString
            .build("Server=db1; Database=app;Uid=root;Pwd=secret;")
            .unwrap();
        assert_eq!(model.get(ConnectionField::Server), Some("db1"));
        assert_eq!(model.get(ConnectionField::Database), Some("app"));
        assert_eq!(model.get(ConnectionField::User), Some("root"));
        assert_eq!(model.get(ConnectionField::Password), Some("secret"));
        assert_eq!(model.get(ConnectionField::Port), None);
    }

    #[test]
    fn test_parse_aliases_are_case_insensitive() {
        let model = MySqlConnectionString
            .build("host=db1;user id=admin;PASSWORD=x")
            .unwrap();
        assert_eq!(model.get(ConnectionField::Server), Some("db1"));
        assert_eq!(model.get(ConnectionField::User), Some("admin"));
        assert_eq!(model.get(ConnectionField::Password), Some("x"));
    }

    #[test]
    fn test_parse_quoted_values() {
        let model = PostgresConnectionString
            .build(r#"Host=db;Password="a;b""c";SslMode='Require'"#)
            .unwrap();
        assert_eq!(model.get(ConnectionField::Password), Some(r#"a;b"c"#));
        assert_eq!(model.option("sslmode"), Some("Require"));
    }

    #[test]
    fn test_parse_rejects_segment_without_equals() {
        let err = MySqlConnectionString.build("Server=db;garbage").unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(MySqlConnectionString.build("Password=\"open").is_err());
    }

    #[test]
    fn test_parse_empty_and_trailing_separators() {
        let model = MySqlConnectionString.build(" ;Server=a;; ").unwrap();
        assert_eq!(model.serialize(), "Server=a");
        assert_eq!(MySqlConnectionString.build("").unwrap().serialize(), "");
    }

    #[test]
    fn test_override_without_existing_fields_adds_each_once() {
        let mut model = MySqlConnectionString
            .build("Port=3306;SslMode=None;")
            .unwrap();
        model.override_with(&tenant_fields()).unwrap();
        for field in CREDENTIAL_FIELDS {
            assert_eq!(count_alias_entries(&model, field), 1, "{field:?}");
        }
        assert_eq!(
            model.serialize(),
            "Port=3306;SslMode=None;Server=S;Database=D;Uid=U;Pwd=P"
        );
    }

    #[test]
    fn test_override_replaces_every_alias() {
        let mut model = MySqlConnectionString
            .build("Host=old;Data Source=older;User Id=a;Username=b;Password=x;Database=o")
            .unwrap();
        model.override_with(&tenant_fields()).unwrap();
        for field in CREDENTIAL_FIELDS {
            assert_eq!(count_alias_entries(&model, field), 1, "{field:?}");
        }
        assert_eq!(model.get(ConnectionField::Server), Some("S"));
        assert_eq!(model.get(ConnectionField::User), Some("U"));
    }

    #[test]
    fn test_override_port_only_when_present() {
        let mut model = PostgresConnectionString.build("Port=5432").unwrap();
        model.override_with(&tenant_fields()).unwrap();
        assert_eq!(model.get(ConnectionField::Port), Some("5432"));

        let record = ConnectionRecord::new(ConnectionRole::Main, "S", "D", "U", "P").with_port(6543);
        model.override_with(&record.fields()).unwrap();
        assert_eq!(model.get(ConnectionField::Port), Some("6543"));
    }

    #[test]
    fn test_sqlite_only_overrides_database() {
        let mut model = SqliteConnectionString.build("Data Source=base.db").unwrap();
        model.override_with(&tenant_fields()).unwrap();
        assert_eq!(model.serialize(), "Data Source=D");
        assert!(model.set(ConnectionField::User, "x").is_err());
    }

    #[test]
    fn test_masked_hides_password() {
        let model = SqlServerConnectionString
            .build("Server=s;Database=d;User Id=u;Password=hunter2")
            .unwrap();
        let masked = model.masked();
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains("Password=****"));
        assert!(!format!("{model:?}").contains("hunter2"));
        // The model itself is unchanged
        assert_eq!(model.get(ConnectionField::Password), Some("hunter2"));
    }

    #[test]
    fn test_serialize_quotes_special_values() {
        let mut model = MySqlConnectionString.build("Server=a").unwrap();
        model.set(ConnectionField::Password, "p;w\"d").unwrap();
        let serialized = model.serialize();
        assert_eq!(serialized, r#"Server=a;Pwd="p;w""d""#);
        let reparsed = MySqlConnectionString.build(&serialized).unwrap();
        assert_eq!(reparsed.get(ConnectionField::Password), Some("p;w\"d"));
    }

    #[test]
    fn test_builder_for_matches_provider() {
        for db_type in DatabaseType::ALL {
            assert_eq!(builder_for(db_type).provider(), db_type);
        }
    }
}
