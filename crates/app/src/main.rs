use clap::Parser;
use engine::{Authority, EngineError, Money};
use migration::{Migrator, MigratorTrait};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = cli::Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "cashbox={level},engine={level}",
                level = settings.app.level
            ))
        }))
        .with_writer(std::io::stderr)
        .init();

    let database = parse_database(&settings.database).await?;
    let default_tolerance: Money = settings.ledger.default_tolerance.parse()?;
    let engine = engine::Engine::builder()
        .database(database)
        .egress_policy(settings.ledger.egress_policy)
        .register_scope(settings.ledger.register_scope)
        .default_tolerance(default_tolerance)
        .build()
        .await?;

    let actor = cli.actor.unwrap_or(settings.ledger.actor);
    let mut authority = Authority::new(actor, cli.role);
    if let Some(operator) = cli.operator {
        authority = authority.operator(operator);
    }

    if let Err(err) = commands::run(&engine, &authority, cli.command).await {
        match err.downcast_ref::<EngineError>() {
            Some(engine_err) => eprintln!("{}: {}", engine_err.kind(), engine_err.detail()),
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let database = sea_orm::Database::connect(config.url()).await?;
    Migrator::up(&database, None).await?;
    tracing::debug!("database ready");
    Ok(database)
}
