//! multitenant-db - command line entry point.
//!
//! Loads the settings file, builds the connection factory and runs one of the
//! diagnostic subcommands against the configured tenants.

use multitenant_db::config::{AppSettings, CliCommand, Config, TargetArgs};
use multitenant_db::db::{
    ConnectionFactory, ContextOptions, DatabaseContext, DbConnection, ProviderRegistry, TenantKey,
};
use multitenant_db::error::{DbError, DbResult};
use multitenant_db::repository::Repository;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays clean
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn target_key(target: &TargetArgs) -> Option<TenantKey> {
    match (&target.tenant, &target.code) {
        (Some(guid), _) => Some(TenantKey::guid(guid.as_str())),
        (None, Some(code)) => Some(TenantKey::code(code.as_str())),
        (None, None) => None,
    }
}

async fn open(factory: &ConnectionFactory, target: &TargetArgs) -> DbResult<DbConnection> {
    match target_key(target) {
        Some(key) => factory.create_for(&key, target.role).await,
        None if factory.is_multi_tenant() => Err(DbError::invalid_input(
            "Multi-tenant settings require --tenant or --code",
        )),
        None => factory.create().await,
    }
}

async fn run(config: &Config) -> DbResult<()> {
    let settings = AppSettings::load(&config.settings)?;
    let registry = ProviderRegistry::with_defaults();
    let factory = ConnectionFactory::new(settings.connection, settings.clients, &registry)?;

    info!(
        provider = %factory.provider(),
        mode = ?factory.mode(),
        tenants = factory.tenants().clients().len(),
        settings = %config.settings.display(),
        "Settings loaded"
    );

    match &config.command {
        CliCommand::Resolve(target) => {
            let model = match target_key(target) {
                Some(key) => factory.tenant_connection_string(&key, target.role)?,
                None => factory.default_connection_string().clone(),
            };
            println!("{}", model.masked());
        }
        CliCommand::Check(target) => {
            let connection = open(&factory, target).await?;
            let context = DatabaseContext::new(
                connection,
                ContextOptions {
                    command_timeout: factory.command_timeout(),
                    ..ContextOptions::default()
                },
            );
            let value = Repository::new(&context)
                .execute_scalar_int(&context.create_command().with_text("SELECT 1"))
                .await;
            context.close().await;
            let value = value?;
            println!("ok ({}, SELECT 1 = {value})", factory.provider());
        }
        CliCommand::Tenants => {
            for client in factory.tenants().clients() {
                let roles: Vec<String> = client
                    .connections
                    .iter()
                    .map(|c| c.role.to_string())
                    .collect();
                println!(
                    "{}\t{}\t{}",
                    client.code,
                    client.client_guid,
                    roles.join(",")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    init_tracing(&config);

    if let Err(e) = run(&config).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        if let Some(hint) = e.suggestion() {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}
