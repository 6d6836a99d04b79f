//! Tests that require a running MySQL database.
//!
//! Set TEST_MYSQL_CONNECTION to run them, e.g.
//! TEST_MYSQL_CONNECTION="Server=localhost;Port=3306;Database=test_db;Uid=root;Pwd=root"

use multitenant_db::db::{
    ConnectionFactory, ConnectionField, DatabaseContext, ProviderRegistry, TenantKey,
};
use multitenant_db::models::{
    ConnectionRecord, ConnectionRole, ConnectionSettings, DatabaseType, TenantClient,
};
use multitenant_db::repository::Repository;

fn mysql_connection() -> Option<String> {
    match std::env::var("TEST_MYSQL_CONNECTION") {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_CONNECTION not set");
            None
        }
    }
}

#[tokio::test]
async fn test_mysql_unit_of_work_rollback() {
    let Some(connection_string) = mysql_connection() else {
        return;
    };
    let factory = ConnectionFactory::new(
        ConnectionSettings::new(DatabaseType::MySQL, connection_string),
        Vec::<TenantClient>::new(),
        &ProviderRegistry::with_defaults(),
    )
    .unwrap();
    let context = DatabaseContext::connect(&factory, None).await.unwrap();
    let repository = Repository::new(&context);

    repository
        .execute_non_query(&repository.command(
            "CREATE TABLE IF NOT EXISTS uow_test (id INT PRIMARY KEY, name VARCHAR(100)) ENGINE=InnoDB",
        ))
        .await
        .unwrap();
    repository
        .execute_non_query(&repository.command("DELETE FROM uow_test WHERE id = 12345"))
        .await
        .unwrap();

    let mut unit_of_work = context.create_unit_of_work().await.unwrap();
    let insert = unit_of_work
        .create_command()
        .with_text("INSERT INTO uow_test (id, name) VALUES (@id, @name)")
        .with_parameter("id", 12345)
        .with_parameter("name", "rollback_test");
    assert_eq!(repository.execute_non_query(&insert).await.unwrap(), 1);
    unit_of_work.release().await;

    let count = repository
        .execute_scalar_int(
            &repository
                .command("SELECT COUNT(*) FROM uow_test WHERE id = @id")
                .with_parameter("id", 12345),
        )
        .await
        .unwrap();
    assert_eq!(count, 0);
    drop(unit_of_work);
    context.close().await;
}

#[tokio::test]
async fn test_mysql_tenant_override() {
    let Some(connection_string) = mysql_connection() else {
        return;
    };
    let settings = ConnectionSettings::new(DatabaseType::MySQL, connection_string).multi_tenant();
    let defaults = ConnectionFactory::new(
        settings.clone(),
        Vec::<TenantClient>::new(),
        &ProviderRegistry::with_defaults(),
    )
    .unwrap();
    let model = defaults.default_connection_string();
    let field = |f: ConnectionField| {
        model
            .get(f)
            .map(str::to_string)
            .unwrap_or_default()
    };
    let mut record = ConnectionRecord::new(
        ConnectionRole::Main,
        field(ConnectionField::Server),
        field(ConnectionField::Database),
        field(ConnectionField::User),
        field(ConnectionField::Password),
    );
    if let Some(port) = model.get(ConnectionField::Port).and_then(|p| p.parse().ok()) {
        record = record.with_port(port);
    }

    let factory = ConnectionFactory::new(
        settings,
        vec![TenantClient::new(1, "local", "local-guid").with_connection(record)],
        &ProviderRegistry::with_defaults(),
    )
    .unwrap();
    let connection = factory
        .create_for(&TenantKey::code("LOCAL"), ConnectionRole::Main)
        .await
        .unwrap();
    connection.close().await.unwrap();
}
