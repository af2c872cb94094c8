use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use mediad::{AppState, Config, routes};

#[derive(Debug, Parser)]
#[command(
    name = "mediad",
    version,
    about = "Media directory server with streaming tar downloads"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, value_name = "PATH", env = "MEDIAD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Register a root without a config file (repeatable)
    #[arg(long, value_name = "NAME=PATH")]
    root: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    for spec in &cli.root {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("invalid --root {spec:?}, expected NAME=PATH"))?;
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("cannot resolve root directory {path:?}"))?;
        config.roots.insert(name.to_string(), path);
    }
    config.validate()?;

    serve(config)
}

#[tokio::main]
async fn serve(config: Config) -> Result<()> {
    let bind = config.bind;
    let app = routes::router(AppState::new(config));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("media server listening on http://{bind}");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
