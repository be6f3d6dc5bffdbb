//! Storycheck server: repository-event intake, run lookups and live progress.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use engine::io::config::{DEFAULT_CONFIG_FILE, load_config};
use engine::observer::BroadcastObserver;
use engine::orchestrate::Engine;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "storycheck-server")]
#[command(about = "HTTP intake for repository events and run status")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Engine config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Buffered run events per SSE subscriber before it lags
    #[arg(long, default_value = "256")]
    event_capacity: usize,
}

/// Directive enabling this binary's own `info` events; its tracing target is
/// the crate name derived from the `[[bin]]` name.
fn own_log_directive() -> String {
    format!("{}=info", env!("CARGO_CRATE_NAME"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(own_log_directive().parse()?)
                .add_directive("engine=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config_dir = match args.config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let cfg = load_config(&args.config)?;
    info!(config = %args.config.display(), repos = cfg.repos.len(), "starting storycheck-server");

    let observer = BroadcastObserver::new(args.event_capacity.max(1));
    let event_tx = observer.sender();
    let engine = Engine::from_config(&cfg, &config_dir, Arc::new(observer))?;
    let state = AppState::new(Arc::new(engine), event_tx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directive_matches_module_targets() {
        let crate_target = module_path!().split("::").next().unwrap_or_default();
        assert_eq!(own_log_directive(), format!("{crate_target}=info"));
        assert_eq!(own_log_directive(), "storycheck_server=info");
        assert!(own_log_directive().parse::<tracing_subscriber::filter::Directive>().is_ok());
    }
}
