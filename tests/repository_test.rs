//! Integration tests for the repository layer and the sample IP service.

use chrono::{NaiveDate, NaiveDateTime};
use multitenant_db::db::{ConnectionFactory, DatabaseContext, ProviderRegistry};
use multitenant_db::error::DbError;
use multitenant_db::models::{ConnectionSettings, DatabaseType, TenantClient};
use multitenant_db::repository::ip_address::SQLITE_SCHEMA;
use multitenant_db::repository::{IpAddressRepository, NewIpAddress, Repository};
use multitenant_db::service::IpAddressService;
use serde_json::json;

async fn memory_context() -> DatabaseContext {
    let factory = ConnectionFactory::new(
        ConnectionSettings::new(DatabaseType::SQLite, "Data Source=:memory:"),
        Vec::<TenantClient>::new(),
        &ProviderRegistry::with_defaults(),
    )
    .unwrap();
    DatabaseContext::connect(&factory, None).await.unwrap()
}

async fn ip_context() -> DatabaseContext {
    let context = memory_context().await;
    Repository::new(&context)
        .execute_non_query(&context.create_command().with_text(SQLITE_SCHEMA))
        .await
        .unwrap();
    context
}

#[tokio::test]
async fn test_scalar_defaults_for_empty_results() {
    let context = memory_context().await;
    let repository = Repository::new(&context);
    let empty = repository.command("SELECT 1 WHERE 0");

    assert_eq!(repository.execute_scalar(&empty).await.unwrap(), json!(null));
    assert_eq!(repository.execute_scalar_string(&empty).await.unwrap(), "");
    assert_eq!(repository.execute_scalar_int(&empty).await.unwrap(), 0);
    assert_eq!(
        repository.execute_scalar_date_time(&empty).await.unwrap(),
        NaiveDateTime::MIN
    );
}

#[tokio::test]
async fn test_scalar_defaults_for_null() {
    let context = memory_context().await;
    let repository = Repository::new(&context);
    let null = repository.command("SELECT NULL");

    assert_eq!(repository.execute_scalar_string(&null).await.unwrap(), "");
    assert_eq!(repository.execute_scalar_int(&null).await.unwrap(), 0);
    assert_eq!(
        repository.execute_scalar_date_time(&null).await.unwrap(),
        NaiveDateTime::MIN
    );
}

#[tokio::test]
async fn test_typed_scalars() {
    let context = memory_context().await;
    let repository = Repository::new(&context);

    let text = repository
        .command("SELECT @greeting")
        .with_parameter("greeting", "hello");
    assert_eq!(repository.execute_scalar_string(&text).await.unwrap(), "hello");

    let number = repository
        .command("SELECT @a + @a")
        .with_parameter("a", 21_i64);
    assert_eq!(repository.execute_scalar_int(&number).await.unwrap(), 42);

    let date = repository.command("SELECT '2024-03-01 10:30:00'");
    assert_eq!(
        repository.execute_scalar_date_time(&date).await.unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    );
}

#[tokio::test]
async fn test_data_set_keeps_row_producing_statements() {
    let context = memory_context().await;
    let repository = Repository::new(&context);

    let set = repository
        .execute_data_set(&repository.command("SELECT 1 AS a; SELECT 2 AS b, 3 AS c"))
        .await
        .unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.tables[0].columns, vec!["a"]);
    assert_eq!(set.tables[1].columns, vec!["b", "c"]);
    assert_eq!(set.tables[1].rows, vec![vec![json!(2), json!(3)]]);

    let empty = repository
        .execute_data_set(&repository.command("SELECT 1 WHERE 0"))
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert!(
        repository
            .execute_data_table(&repository.command("SELECT 1 WHERE 0"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_query_map_and_non_query() {
    let context = memory_context().await;
    let repository = Repository::new(&context);

    repository
        .execute_non_query(&repository.command("CREATE TABLE t (id INTEGER, label TEXT)"))
        .await
        .unwrap();
    let affected = repository
        .execute_non_query(&repository.command("INSERT INTO t VALUES (1, 'one'), (2, 'two')"))
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let labels = repository
        .query_map(&repository.command("SELECT id, label FROM t ORDER BY id"), |row| {
            Ok(multitenant_db::repository::scalar_to_string(
                multitenant_db::repository::column(&row, "LABEL")?,
            ))
        })
        .await
        .unwrap();
    assert_eq!(labels, vec!["one", "two"]);
}

#[tokio::test]
async fn test_execution_errors_propagate() {
    let context = memory_context().await;
    let repository = Repository::new(&context);

    let err = repository
        .execute_scalar_int(&repository.command("SELECT * FROM does_not_exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryExecution { .. }));
    assert!(err.driver_error().is_some());
}

#[tokio::test]
async fn test_stored_procedure_rejected_on_sqlite() {
    let context = memory_context().await;
    let repository = Repository::new(&context);

    let err = repository
        .execute_non_query(&repository.procedure("sp_anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_ip_repository_round_trip() {
    let context = ip_context().await;
    let repository = IpAddressRepository::new(&context);

    assert_eq!(repository.add(&NewIpAddress::new("10.0.0.1")).await.unwrap(), 1);
    assert_eq!(
        repository
            .add(&NewIpAddress::new("10.0.0.2").inactive())
            .await
            .unwrap(),
        1
    );

    let records = repository.list_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].ip_address, "10.0.0.1");
    assert!(records[0].is_active);
    assert!(!records[1].is_active);
    assert_eq!(repository.count_active().await.unwrap(), 1);
}

#[tokio::test]
async fn test_service_add_many_commits_batch() {
    let context = ip_context().await;
    let service = IpAddressService::new(&context);

    let inserted = service
        .add_many(&[
            NewIpAddress::new("192.168.0.1"),
            NewIpAddress::new("192.168.0.2"),
            NewIpAddress::new("192.168.0.3").inactive(),
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 3);
    assert_eq!(service.count_active().await.unwrap(), 2);
    assert_eq!(service.list_all().await.unwrap().len(), 3);
    assert!(!context.has_active_transaction());
}

#[tokio::test]
async fn test_service_wraps_errors() {
    // No schema: every operation fails at the driver
    let context = memory_context().await;
    let service = IpAddressService::new(&context);

    let err = service.add(&NewIpAddress::new("10.0.0.1")).await.unwrap_err();
    assert_eq!(err.message(), "Error occurred while adding Sample IP data.");
    assert!(matches!(err.cause(), DbError::QueryExecution { .. }));

    let err = service.list_all().await.unwrap_err();
    assert_eq!(err.message(), "Error occurred while fetching Sample IP data.");
    assert!(std::error::Error::source(&err).is_some());

    assert!(service.count_active().await.is_err());
}

#[tokio::test]
async fn test_service_add_many_rolls_back_on_failure() {
    let context = memory_context().await;
    Repository::new(&context)
        .execute_non_query(&context.create_command().with_text(
            "CREATE TABLE sample_ip (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address TEXT NOT NULL UNIQUE,
                is_active INTEGER NOT NULL DEFAULT 1
            )",
        ))
        .await
        .unwrap();
    let service = IpAddressService::new(&context);

    let err = service
        .add_many(&[
            NewIpAddress::new("10.0.0.1"),
            NewIpAddress::new("10.0.0.1"),
        ])
        .await
        .unwrap_err();
    assert!(err.message().contains("adding Sample IP data"));
    assert!(matches!(err.into_cause(), DbError::QueryExecution { .. }));

    assert!(!context.has_active_transaction());
    assert!(service.list_all().await.unwrap().is_empty());
}
