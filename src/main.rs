//! sqlroute - main entry point.
//!
//! `sqlroute query` runs one statement through the facade and prints the result
//! as JSON. `sqlroute serve` answers the remote execution protocol.

use clap::Parser;
use serde_json::{Value as JsonValue, json};
use sqlroute::bridge::BackendServer;
use sqlroute::config::{Command, Config, QueryKind};
use sqlroute::models::{CommandKind, params_from_json};
use sqlroute::{Database, TaskIdentity};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays JSON.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let settings = config.settings()?;
    info!(
        database = %settings.database.masked(),
        pooling = settings.pooling,
        remote = ?settings.remote.as_ref().map(|r| r.address()),
        "Starting sqlroute v{}",
        env!("CARGO_PKG_VERSION")
    );

    let database = Database::connect(&settings).await?;

    let result = match config.command {
        Command::Query { kind, sql, params } => run_query(&database, kind, &sql, &params).await,
        Command::Serve { listen } => serve(database, &listen).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "sqlroute failed");
    }
    result
}

async fn run_query(
    database: &Database,
    kind: QueryKind,
    sql: &str,
    raw_params: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let values = raw_params
        .iter()
        .map(|p| serde_json::from_str::<JsonValue>(p))
        .collect::<Result<Vec<_>, _>>()?;
    let params = params_from_json(&values)?;

    // The CLI runs outside any spawned task: ad-hoc connection, blocking transport
    let task = TaskIdentity::current();
    let output = match kind {
        QueryKind::Command(CommandKind::Select) => json!(database.select(task, sql, &params).await?),
        QueryKind::Command(CommandKind::First) => json!(database.first(task, sql, &params).await?),
        QueryKind::Command(CommandKind::Count) => json!(database.count(task, sql, &params).await?),
        QueryKind::Command(CommandKind::Sum) => json!(database.sum(task, sql, &params).await?),
        QueryKind::Command(CommandKind::Insert) => {
            json!({ "last_insert_id": database.insert(task, sql, &params).await? })
        }
        QueryKind::Command(CommandKind::Update) => {
            json!({ "rows_affected": database.update(task, sql, &params).await? })
        }
        QueryKind::Delete => json!({ "rows_affected": database.delete(task, sql, &params).await? }),
        QueryKind::Command(CommandKind::Execute) => {
            database.execute(task, sql, &params).await?;
            JsonValue::Null
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn serve(database: Database, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = BackendServer::new(database)?;
    let listener = TcpListener::bind(listen).await?;

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
