mod config;

use clap::{Parser, Subcommand};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use klage_migrate::{
    ColumnSpec, DECLARED_VERSION, Database, DefaultValue, IndexKind, IndexSpec, OperatorOutcome,
    PgDatabase, PgOptionStore, ReconcileConfig, ReconciliationCoordinator, SchemaCatalog,
    SchemaOperator, SqlType, TableStatus, claims_catalog, schema_status,
};
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tokio_postgres::NoTls;
use tracing_subscriber::EnvFilter;

const NO_DATABASE_URL: &str =
    "no database URL: pass --database-url, set DATABASE_URL or add database_url to .config/klage.toml";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Schema reconciliation for the klage case tables.
#[derive(Parser, Debug)]
#[command(name = "klage", version)]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the compiled-in catalog
    Catalog,
    #[command(flatten)]
    Database(DbCommand),
}

/// Commands that need a database connection.
#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Bring existing tables up to the catalog if the stored version is older
    Reconcile {
        /// Version to reconcile to
        #[arg(long, default_value = DECLARED_VERSION)]
        version: String,
    },
    /// Compare every catalog table with the database
    Status,
    /// Show the live columns and indexes of a table
    Inspect { table: String },
    /// Add a column
    AddColumn {
        table: String,
        #[command(flatten)]
        column: ColumnArgs,
    },
    /// Change the type, nullability or default of a column
    ModifyColumn {
        table: String,
        #[command(flatten)]
        column: ColumnArgs,
    },
    /// Drop a column (system and primary key columns are refused)
    DropColumn { table: String, name: String },
    /// Add an index or unique key
    AddIndex {
        table: String,
        name: String,
        #[arg(required = true)]
        columns: Vec<String>,
        /// Create a unique key instead of a plain index
        #[arg(long)]
        unique: bool,
    },
    /// Drop an index (the primary key is refused)
    DropIndex { table: String, name: String },
}

#[derive(clap::Args, Debug)]
struct ColumnArgs {
    name: String,
    /// Column type, e.g. `varchar(255)`, `bigint`, `decimal(10,2)`
    #[arg(long = "type")]
    sql_type: SqlType,
    #[arg(long)]
    not_null: bool,
    /// Default value; `NULL`, a number, or text
    #[arg(long)]
    default: Option<String>,
}

impl ColumnArgs {
    fn into_spec(self) -> ColumnSpec {
        let mut column = ColumnSpec::new(self.name, self.sql_type).nullable(!self.not_null);
        if let Some(raw) = self.default {
            column.default = Some(parse_default(&column.sql_type, &raw));
        }
        column
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("klage=info")),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, BoxError> {
    let (file_config, config_path) = config::load()?;
    if let Some(path) = &config_path {
        tracing::debug!("loaded {}", path.display());
    }
    let settings = file_config.reconcile;
    let catalog = claims_catalog()?;

    let command = match cli.command {
        Commands::Catalog => {
            print_catalog(&catalog);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Database(command) => command,
    };

    let database_url = cli
        .database_url
        .or(file_config.database_url)
        .ok_or(NO_DATABASE_URL)?;
    tracing::info!("connecting to {}", mask_password(&database_url));
    let pool = connect(&database_url)?;
    let db = PgDatabase::with_prefix(pool.get().await?, &settings.table_prefix);

    match command {
        DbCommand::Reconcile { version } => {
            reconcile(&catalog, &db, &pool, &settings, &version).await
        }
        DbCommand::Status => {
            let status = schema_status(&catalog, &db).await;
            for (table, state) in &status.tables {
                let line = format!("{table}: {state}");
                match state {
                    TableStatus::Synchronized => println!("{}", line.green()),
                    TableStatus::OutOfSync { .. } | TableStatus::Missing => {
                        println!("{}", line.yellow())
                    }
                    TableStatus::Unavailable(_) => println!("{}", line.red()),
                }
            }
            Ok(if status.is_synchronized() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        DbCommand::Inspect { table } => {
            let Some(live) = db.inspect_table(&table).await? else {
                println!("{} does not exist", table.bold());
                return Ok(ExitCode::FAILURE);
            };
            println!("{}", live.name.bold());
            for col in &live.columns {
                let mut attrs = Vec::new();
                if !col.nullable {
                    attrs.push("NOT NULL".to_string());
                }
                if let Some(default) = &col.default {
                    attrs.push(format!("DEFAULT {}", default));
                }
                if col.is_system {
                    attrs.push("system".to_string());
                }
                println!("  {}: {}{}", col.name, col.sql_type, bracketed(&attrs));
            }
            for index in &live.indexes {
                println!(
                    "  {} {} ({})",
                    index.kind.dimmed(),
                    index.name,
                    index.columns.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        DbCommand::AddColumn { table, column } => {
            let operator = SchemaOperator::new(&db).with_catalog(&catalog);
            report(operator.add_column(&table, column.into_spec()).await?)
        }
        DbCommand::ModifyColumn { table, column } => {
            let operator = SchemaOperator::new(&db).with_catalog(&catalog);
            report(operator.modify_column(&table, column.into_spec()).await?)
        }
        DbCommand::DropColumn { table, name } => {
            let operator = SchemaOperator::new(&db).with_catalog(&catalog);
            report(operator.drop_column(&table, &name).await?)
        }
        DbCommand::AddIndex {
            table,
            name,
            columns,
            unique,
        } => {
            let kind = if unique {
                IndexKind::Unique
            } else {
                IndexKind::Plain
            };
            let operator = SchemaOperator::new(&db).with_catalog(&catalog);
            report(
                operator
                    .add_index(&table, IndexSpec::new(name, kind, columns))
                    .await?,
            )
        }
        DbCommand::DropIndex { table, name } => {
            let operator = SchemaOperator::new(&db).with_catalog(&catalog);
            report(operator.drop_index(&table, &name).await?)
        }
    }
}

async fn reconcile(
    catalog: &SchemaCatalog,
    db: &PgDatabase<deadpool_postgres::Object>,
    pool: &Pool,
    settings: &ReconcileConfig,
    version: &str,
) -> Result<ExitCode, BoxError> {
    let store = PgOptionStore::new(pool.get().await?, settings.options_table_name());
    store.ensure_table().await?;

    let result = ReconciliationCoordinator::new(catalog, db, &store, settings)
        .reconcile(version)
        .await?;

    if result.is_clean() {
        print!("{}", result.green());
    } else {
        print!("{}", result.yellow());
    }

    Ok(if result.actions_failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Pooled connections are cleaned on reuse, which also drops any advisory
/// lock a cancelled run left behind.
fn manager_config() -> ManagerConfig {
    ManagerConfig {
        recycling_method: RecyclingMethod::Clean,
    }
}

fn connect(database_url: &str) -> Result<Pool, BoxError> {
    let pg_config: tokio_postgres::Config = database_url.parse()?;
    let manager = Manager::from_config(pg_config, NoTls, manager_config());
    // one connection for DDL and the advisory lock, one for the options table
    Ok(Pool::builder(manager).max_size(2).build()?)
}

fn report(outcome: OperatorOutcome) -> Result<ExitCode, BoxError> {
    match outcome {
        OperatorOutcome::Applied => println!("{}", "applied".green()),
        OperatorOutcome::AlreadySatisfied => println!("{}", "already satisfied".dimmed()),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_catalog(catalog: &SchemaCatalog) {
    println!("Catalog {} ({} tables):", DECLARED_VERSION, catalog.len());
    println!();
    for table in catalog.tables() {
        println!("  {} ({} columns)", table.name.bold(), table.columns.len());
        for col in &table.columns {
            let mut attrs = Vec::new();
            if col.is_system {
                attrs.push("system".to_string());
            }
            if !col.nullable {
                attrs.push("NOT NULL".to_string());
            }
            if let Some(default) = &col.default {
                attrs.push(format!("DEFAULT {}", default));
            }
            println!("    {}: {}{}", col.name, col.sql_type, bracketed(&attrs));
        }
        for index in &table.indexes {
            println!(
                "    {} {} ({})",
                index.kind,
                index.name,
                index.columns.join(", ")
            );
        }
        println!();
    }
}

fn bracketed(attrs: &[String]) -> String {
    if attrs.is_empty() {
        String::new()
    } else {
        format!(" [{}]", attrs.join(", "))
    }
}

/// Interpret a default typed on the command line for a column of type `ty`.
fn parse_default(ty: &SqlType, raw: &str) -> DefaultValue {
    if raw.eq_ignore_ascii_case("null") {
        DefaultValue::Null
    } else if ty.is_textual() {
        DefaultValue::Text(raw.to_string())
    } else if raw.parse::<f64>().is_ok() {
        DefaultValue::Number(raw.to_string())
    } else {
        DefaultValue::Expr(raw.to_string())
    }
}

/// Mask password in database URL for display
fn mask_password(url: &str) -> String {
    if let Some(start) = url.find("://") {
        if let Some(at) = url.rfind('@') {
            let prefix = &url[..start + 3];
            let suffix = &url[at..];
            if let Some(colon) = url[start + 3..at].find(':') {
                let user = &url[start + 3..start + 3 + colon];
                return format!("{}{}:***{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
