//! LaserGui CLI - launches the engine process and serves the web GUI.

use clap::Parser;
use lasergui::assets::AssetServer;
use lasergui::broker::RequestBroker;
use lasergui::config::{ConfigError, GuiConfig};
use lasergui::engine::EngineSession;
use lasergui::{logging, server};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "lasergui", version = lasergui::VERSION)]
#[command(about = "Serve the laser-chess web GUI over a UCI-style engine", long_about = None)]
struct Args {
    /// HTTP listen port
    #[arg(long)]
    port: Option<u16>,

    /// Path to the engine executable
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Directory to serve static assets from
    #[arg(long)]
    asset_root: Option<PathBuf>,

    /// Optional INI configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the session log file (stdout only when omitted)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging = match logging::init_logging(args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{e}");
        process::exit(1);
    }
}

/// Config file first, CLI flags on top.
fn load_config(args: &Args) -> Result<GuiConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => GuiConfig::load_from(path)?,
        None => GuiConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(engine) = &args.engine {
        config.engine_command = engine.clone();
    }
    if let Some(root) = &args.asset_root {
        config.asset_root = root.clone();
    }
    Ok(config)
}

async fn run(config: GuiConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = Arc::new(
        EngineSession::spawn(&config.engine_command, config.session.clone()).await?,
    );
    info!(engine = %config.engine_command.display(), "engine handshake complete");

    let broker = RequestBroker::new(session, config.broker.clone());
    let assets = Arc::new(AssetServer::new(&config.asset_root)?);

    let shutdown = CancellationToken::new();
    tokio::spawn(broker.clone().run_evictions(shutdown.clone()));

    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            on_ctrl_c.cancel();
        }
    });

    server::serve(config.port, broker, assets, shutdown).await?;
    info!("server stopped");
    Ok(())
}
