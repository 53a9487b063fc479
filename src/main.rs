mod config;
mod figma;
mod handler;
mod okr;
mod server;
mod warehouse;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;

use crate::figma::{CommentSource, FigmaClient, FixtureSource};
use crate::handler::{Handler, SystemClock};
use crate::warehouse::{BigQueryWarehouse, DryRunWarehouse, Warehouse};

/// figma-okr: records how many comments on a Figma file are open vs
/// resolved, appending one row per run to a BigQuery table named after the file.
#[derive(Parser, Debug)]
#[command(name = "figma-okr", version, about)]
struct Cli {
    /// Config file (defaults to .figma-okr.toml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the comment summary for one file and exit
    Run {
        /// Figma file key (e.g., the `abc123` in figma.com/file/abc123/...)
        #[arg(short, long)]
        file: String,

        /// Use the built-in sample comments instead of calling Figma
        #[arg(long)]
        r#mock: bool,

        /// Log the insert instead of sending it to BigQuery
        #[arg(long)]
        dry_run: bool,
    },

    /// Serve `GET /?file=<key>` and record a summary per request
    Serve {
        /// Log inserts instead of sending them to BigQuery
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            file,
            r#mock,
            dry_run,
        } => {
            let _main_span = info_span!("run", file = %file).entered();
            let handler = build_handler(&config, r#mock, dry_run)?;
            let summary = handler.handle(Some(file.as_str()), pending()).await?;

            println!(
                "{} {}: {} resolved, {} open, {} total",
                "✔".green().bold(),
                file.bold(),
                summary.resolved.to_string().green(),
                summary.open().to_string().yellow(),
                summary.total
            );
        }
        Command::Serve { dry_run } => {
            let handler = build_handler(&config, false, dry_run)?;
            info!(address = %config.server.address, port = config.server.port, "starting server");
            server::build(handler, &config.server).launch().await?;
        }
    }

    Ok(())
}

/// Wire the handler from configuration. Clients are built once and shared by
/// every request.
fn build_handler(
    config: &config::Config,
    mock: bool,
    dry_run: bool,
) -> Result<Handler, Box<dyn std::error::Error>> {
    let source: Arc<dyn CommentSource> = if mock {
        info!("using mock comment data for demo");
        Arc::new(FixtureSource)
    } else {
        Arc::new(FigmaClient::new(&config.figma)?)
    };

    let warehouse: Arc<dyn Warehouse> = if dry_run {
        Arc::new(DryRunWarehouse)
    } else {
        Arc::new(BigQueryWarehouse::new(&config.warehouse)?)
    };

    Ok(Handler::new(
        source,
        warehouse,
        Arc::new(SystemClock),
        config.warehouse.project()?,
        config.warehouse.table_group()?,
    ))
}
