//! Command-line interface for dbqueue: inspect the SQL each dialect generates.
//!
//! ## What
//!
//! - `dbqueue sql` prints every statement issued for the configured queues.
//! - `dbqueue dialects` lists the supported dialects and their locking capabilities.
//!
//! ### Example
//!
//! ```sh
//! dbqueue --config dbqueue.yaml sql
//! dbqueue --format json sql --dialect mssql --queue mail
//! dbqueue --format sql sql --dialect oracle > queue.sql
//! dbqueue dialects
//! ```
use anyhow::Context;
use clap::{Parser, Subcommand};
use dbqueue::config::Config;
use dbqueue::{render_statements, DatabaseDialect, RenderedStatement};
use serde::Serialize;
use std::fs::File;
use std::process;
use tabled::Tabled;

mod output;

use crate::output::{write_rows, write_statements, OutputFormat};

#[derive(Parser)]
#[command(name = "dbqueue")]
#[command(about = "Inspect the SQL of a database-backed task queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (overrides environment variables and defaults)
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Log destination: stderr or file path
    #[arg(long, default_value = "stderr")]
    log_dest: String,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Output destination: stdout or file path
    #[arg(long, default_value = "stdout")]
    out: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated statements of every configured queue
    Sql {
        /// Render for this dialect instead of the configured one
        #[arg(long)]
        dialect: Option<String>,

        /// Only this queue
        #[arg(long, short = 'q')]
        queue: Option<String>,
    },
    /// List supported dialects
    Dialects,
}

#[derive(Serialize, Tabled)]
struct DialectInfo {
    name: &'static str,
    skip_locked: bool,
    id_sequence: bool,
    placeholders: &'static str,
}

impl From<DatabaseDialect> for DialectInfo {
    fn from(dialect: DatabaseDialect) -> Self {
        Self {
            name: dialect.name(),
            skip_locked: dialect.supports_skip_locked(),
            id_sequence: dialect.requires_id_sequence(),
            placeholders: match dialect {
                DatabaseDialect::StandardSql => "$1",
                DatabaseDialect::Mssql => "@p1",
                DatabaseDialect::LegacySequence => ":1",
                DatabaseDialect::Embedded => "?",
            },
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        other => {
            eprintln!("Unknown log level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let builder = tracing_subscriber::FmtSubscriber::builder().with_max_level(level);
    if cli.log_dest == "stderr" {
        tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())?;
    } else {
        let file = File::create(&cli.log_dest)
            .with_context(|| format!("Failed to create log file '{}'", cli.log_dest))?;
        tracing::subscriber::set_global_default(
            builder.with_writer(std::sync::Mutex::new(file)).finish(),
        )?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    if let Err(e) = run_cli(cli) {
        tracing::error!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let mut out_writer: Box<dyn std::io::Write> = match cli.out.as_str() {
        "stdout" => Box::new(std::io::stdout()),
        _ => Box::new(File::create(&cli.out)?),
    };
    let out: &mut dyn std::io::Write = out_writer.as_mut();

    match cli.command {
        Commands::Sql { dialect, queue } => {
            // Priority: --config, DBQUEUE_CONFIG_FILE, DBQUEUE_* variables, ./dbqueue.yaml
            let config = Config::load_with_options(cli.config.as_deref())
                .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
            let dialect = match dialect {
                Some(name) => name.parse::<DatabaseDialect>()?,
                None => config.dialect()?,
            };
            let statements = collect_statements(&config, dialect, queue.as_deref())?;
            tracing::info!(
                "Rendered {} statements for dialect {}",
                statements.len(),
                dialect
            );
            write_statements(cli.format, &statements, out)?;
        }
        Commands::Dialects => {
            let dialects: Vec<DialectInfo> =
                DatabaseDialect::ALL.into_iter().map(DialectInfo::from).collect();
            write_rows(cli.format, &dialects, out)?;
        }
    }
    Ok(())
}

fn collect_statements(
    config: &Config,
    dialect: DatabaseDialect,
    only_queue: Option<&str>,
) -> anyhow::Result<Vec<RenderedStatement>> {
    let mut statements = Vec::new();
    for queue in &config.queues {
        if only_queue.is_some_and(|id| id != queue.queue_id) {
            continue;
        }
        let location = queue.location()?;
        statements.extend(render_statements(dialect, &config.schema, &location));
    }
    if statements.is_empty() {
        anyhow::bail!("No queues configured");
    }
    Ok(statements)
}
