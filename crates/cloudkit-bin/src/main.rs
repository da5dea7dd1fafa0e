#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub, clippy::pedantic)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use clap::{Parser, Subcommand};
use cloudkit::{StoreConfig, StoreEngine, implementations::postgres::PostgresBackend, tokio, tracing};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod config;
mod serve;

pub(crate) use config::CONFIG_BIN;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the database schema exists, then exit.
    Migrate {},
    /// Run the server.
    Serve {},
    /// Print the version of the server.
    Version {},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_file(CONFIG_BIN.debug.extended_logs)
        .with_line_number(CONFIG_BIN.debug.extended_logs)
        .with_env_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .init();

    match cli.command {
        Some(Commands::Migrate {}) => {
            connect().await?;
            println!("Schema is up to date.");
        }
        Some(Commands::Serve {}) => serve().await?,
        Some(Commands::Version {}) => println!("{}", env!("CARGO_PKG_VERSION")),
        None => {
            if CONFIG_BIN.debug.auto_serve {
                serve().await?;
            } else {
                eprintln!("No subcommand provided. Use --help for more information.");
                anyhow::bail!("no subcommand provided");
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PostgresBackend> {
    let config = StoreConfig::load()?;
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("CLOUDKIT__DATABASE_URL is required"))?;
    let backend = PostgresBackend::connect(database_url).await?;
    Ok(backend)
}

async fn serve() -> anyhow::Result<()> {
    let config = StoreConfig::load()?;
    let backend = connect().await?;
    let engine = StoreEngine::new(backend, config)?;

    let bind_addr = std::net::SocketAddr::from((CONFIG_BIN.bind_ip, CONFIG_BIN.listen_port));
    tracing::info!("starting cloudkit-server on {bind_addr}");
    serve::serve_default(bind_addr, engine).await
}
