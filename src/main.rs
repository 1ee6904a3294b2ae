//! Service entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use pairgate::client::DevConnector;
use pairgate::config::Config;
use pairgate::connection::{FlowOptions, LifecycleManager};
use pairgate::server::{self, AppState};
use pairgate::storage::StorageProvider;

#[derive(Parser, Debug)]
#[command(name = "pairgate", version, about = "Pairing-code issuance service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pairing service.
    Serve {
        /// Address to bind, overriding PAIRGATE_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            serve(config).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let provider = StorageProvider::from_config(&config)?;
    provider.prepare().await?;

    // Simulated transport; a real protocol client plugs in behind the same
    // Connector trait.
    let connector = Arc::new(DevConnector::default());

    let options = FlowOptions::from_config(&config);
    let manager = Arc::new(LifecycleManager::new(options, connector, provider));
    server::serve(config.bind_addr, AppState::new(manager)).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pairgate=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
