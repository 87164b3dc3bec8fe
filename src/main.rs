// ABOUTME: CLI entry point for pg-dump-restore-filter
// ABOUTME: Parses the filter mode and options, then streams the dump through one filter

use clap::{Args, Parser, Subcommand};
use pg_dump_restore_filter::commands::{self, FilterOptions};
use pg_dump_restore_filter::config;
use pg_dump_restore_filter::restore::RestoreMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pg-dump-restore-filter")]
#[command(about = "Keep only selected schemas and tables from a plain-text dump", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter the schema (DDL) section of a dump
    Schema {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        rename: RenameArgs,
    },
    /// Filter the data (COPY) section of a dump
    Data {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        rename: RenameArgs,
    },
    /// Filter the post-data section (indexes, rules, triggers, constraints)
    PostData {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[derive(Args)]
struct SelectionArgs {
    /// File with one qualified name per line (schema.table, table may be *)
    #[arg(short = 't', long)]
    table_file: Option<PathBuf>,
    /// Restore every table of this schema (repeatable)
    #[arg(short = 's', long = "schema")]
    schemas: Vec<String>,
    /// TOML config with tables, schemas, change_schema and logging settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dump file to read (defaults to stdin)
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,
    /// Where to write the filtered dump (defaults to stdout)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Show a progress bar on stderr while reading --input
    #[arg(long)]
    progress: bool,
}

#[derive(Args, Default)]
struct RenameArgs {
    /// File holding the schema name to restore into
    #[arg(short = 'c', long)]
    change_schema_file: Option<PathBuf>,
    /// Schema name to restore into
    #[arg(long)]
    change_schema: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mode, selection, rename) = match cli.command {
        Commands::Schema { selection, rename } => (RestoreMode::Schema, selection, rename),
        Commands::Data { selection, rename } => (RestoreMode::Data, selection, rename),
        Commands::PostData { selection } => (RestoreMode::PostData, selection, RenameArgs::default()),
    };

    let config = selection
        .config
        .as_deref()
        .map(config::load_filter_config)
        .transpose()?;

    // Logs go to stderr; stdout carries the filtered dump.
    // RUST_LOG wins, then the config file, then INFO.
    let default_filter = config
        .as_ref()
        .and_then(|c| c.logging.filter.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = FilterOptions {
        table_file: selection.table_file,
        schemas: selection.schemas,
        change_schema_file: rename.change_schema_file,
        change_schema: rename.change_schema,
        config,
        input: selection.input,
        output: selection.output,
        progress: selection.progress,
    };

    commands::filter(mode, &options)?;
    Ok(())
}
