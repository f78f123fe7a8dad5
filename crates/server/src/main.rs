//! WebTerm server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use webterm_server::auth::AuthService;
use webterm_server::config::Config;
use webterm_server::filter::CommandFilter;
use webterm_server::http::{build_router, AppState};
use webterm_server::session::{PtySpawner, SessionRegistry, ShellSpawner};

/// WebTerm - shell sessions for the browser over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "webterm-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_or_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let filter_directive = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter_directive.as_str())
        .init();

    info!("WebTerm server starting");

    let auth = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        Duration::from_secs(config.auth.token_ttl_secs),
    ));
    auth.seed_user(&config.auth.admin_user, &config.auth.admin_password);

    let spawner = Arc::new(PtySpawner::new()) as Arc<dyn ShellSpawner>;
    let registry = SessionRegistry::new(
        spawner,
        config.session.max_sessions,
        config.timeout_policy(),
        config.spawn_spec(),
    );

    let command_filter = Arc::new(CommandFilter::new(config.filter.enabled));

    let state = AppState {
        registry,
        auth,
        filter: command_filter,
    };
    let app = build_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, max_sessions = config.session.max_sessions, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("WebTerm server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
