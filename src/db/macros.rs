//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand to a plain `match` over the driver variants, so each
//! arm stays readable while the per-driver bodies can differ.

/// Macro for generating `DbConnection` dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => c.ping().await,
///     Postgres(c) => c.ping().await,
///     SQLite(c) => c.ping().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::provider::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
