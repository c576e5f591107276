use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use resilientdb::testing::{FaultInjector, TestDatabase};
use resilientdb::{
    CancellationToken, Column, DataType, Database, DatabaseConfig, DbError, Row, TableSchema,
    Value,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilientdb")]
#[command(about = "Run units of work against a fault-injecting in-memory database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert rows in one retried transaction while replaying injected faults
    Simulate(SimulateArgs),
    /// Print the default simulation config as JSON
    DefaultConfig,
}

#[derive(Args)]
struct SimulateArgs {
    /// JSON database config; defaults to a single `items` table
    #[arg(long)]
    config: Option<PathBuf>,
    /// Table to insert into; defaults to the first declared table
    #[arg(long)]
    table: Option<String>,
    /// Number of rows inserted by the transaction
    #[arg(long, default_value_t = 1)]
    rows: usize,
    /// Execution faults, e.g. `true,null,false` (true = before effect, false = after)
    #[arg(long, default_value = "")]
    execution_failures: String,
    /// Commit faults, same notation as --execution-failures
    #[arg(long, default_value = "")]
    commit_failures: String,
    #[arg(long)]
    max_retry_count: Option<usize>,
    #[arg(long)]
    max_retry_delay_ms: Option<u64>,
    #[arg(long)]
    delay_coefficient_ms: Option<u64>,
}

/// Context carried through every attempt of the simulated unit of work.
struct Simulation {
    table: String,
    key_column: String,
    rows: Vec<Row>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate(args) => simulate(args).await,
        Command::DefaultConfig => {
            println!("{}", default_config().to_json()?);
            Ok(())
        }
    }
}

fn default_config() -> DatabaseConfig {
    DatabaseConfig::new("simulation").table(
        TableSchema::new(
            "items",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("name", DataType::Text),
            ],
        )
        .primary_key("id"),
    )
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DatabaseConfig::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => default_config(),
    };

    if let Some(count) = args.max_retry_count {
        config.retry.max_retry_count = count;
    }
    if let Some(ms) = args.max_retry_delay_ms {
        config.retry.max_retry_delay_ms = ms;
    }
    if let Some(ms) = args.delay_coefficient_ms {
        config.retry.delay_coefficient_ms = ms;
    }

    let injector = FaultInjector::new()
        .with_execution_failures(parse_failures(&args.execution_failures)?)
        .with_commit_failures(parse_failures(&args.commit_failures)?);
    let test_db = TestDatabase::setup(config.clone(), Arc::new(injector))
        .context("Invalid configuration")?;
    let db = test_db.db();

    let schema = match &args.table {
        Some(name) => config.tables.iter().find(|t| t.name() == name),
        None => config.tables.first(),
    }
    .ok_or_else(|| anyhow!("Config declares no table to insert into"))?;
    let key_column = schema
        .columns()
        .first()
        .map(|column| column.name.clone())
        .ok_or_else(|| anyhow!("Table '{}' has no columns", schema.name()))?;

    let mut simulation = Simulation {
        table: schema.name().to_string(),
        key_column,
        rows: (1..=args.rows).map(|id| sample_row(schema, id as i64)).collect(),
    };

    let outcome = db
        .execution_strategy()
        .execute_in_transaction(
            db,
            &mut simulation,
            |sim, conn| {
                Box::pin(async move { conn.insert_batch(&sim.table, sim.rows.clone()).await })
            },
            |sim, db| {
                Box::pin(async move {
                    let Some(key) = sim.rows.first().and_then(|row| row.first()).cloned() else {
                        return Ok::<_, DbError>(false);
                    };
                    let mut conn = db.open().await?;
                    let found = conn.find(&sim.table, &sim.key_column, key).await?;
                    Ok(!found.is_empty())
                })
            },
            &CancellationToken::new(),
        )
        .await;

    match &outcome {
        Ok(inserted) => println!("Outcome: committed {} row(s)", inserted),
        Err(err) => {
            println!("Outcome: {}", err);
            if let Some(last) = err.last_transient_error() {
                println!("Last transient error: {}", last);
            }
        }
    }

    report(db, &simulation.table).await
}

async fn report(db: &Database, table: &str) -> Result<()> {
    println!("{}", db.stats());
    println!("Rows in '{}': {}", table, db.committed_count(table).await?);
    Ok(())
}

fn sample_row(schema: &TableSchema, id: i64) -> Row {
    schema
        .columns()
        .iter()
        .map(|column| match column.data_type {
            DataType::Integer => Value::Integer(id),
            DataType::Float => Value::Float(id as f64),
            DataType::Text => Value::Text(format!("{} {}", column.name, id)),
            DataType::Boolean => Value::Boolean(id % 2 == 0),
        })
        .collect()
}

/// Parse `true,null,false` into fault flags
fn parse_failures(input: &str) -> Result<Vec<Option<bool>>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            "null" | "none" | "-" => Ok(None),
            other => Err(anyhow!("Unknown fault flag '{}'", other)),
        })
        .collect()
}
