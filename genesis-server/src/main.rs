//! Genesis server - submit generation requests and follow their progress.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use genesis::io::config::{DEFAULT_CONFIG_FILE, load_config};
use genesis::logging;
use genesis::io::progress::ProgressHub;
use genesis::io::sessions::InMemorySessions;
use genesis::pipeline::Orchestrator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "genesis-server")]
#[command(about = "HTTP surface for submitting and observing generation sessions")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Config file; defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory containing UI static files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with_default("genesis_server=info,genesis=info");

    let args = Args::parse();

    let cfg = load_config(&args.config)?;
    info!(
        config = %args.config.display(),
        output_dir = %cfg.output_dir.display(),
        "starting genesis-server"
    );

    let orchestrator =
        Orchestrator::from_config(&cfg, Arc::new(InMemorySessions::new()), ProgressHub::new())?;
    let state = AppState::new(orchestrator, cfg.output_dir.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    match args.ui_dir {
        Some(ui_dir) if ui_dir.exists() => {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app = app
                .fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
        }
        Some(ui_dir) => {
            info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        }
        None => {}
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
