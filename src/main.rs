//! Tidepool - main entry point.
//!
//! This binary wires the controller to its real collaborators (GitHub, the
//! job substrate, local git), drives sync iterations on a ticker, and serves
//! the pool snapshot over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tidepool::config::TideConfig;
use tidepool::controller::{Controller, PoolsHandle};
use tidepool::forge::github::GithubForge;
use tidepool::git::LocalWorkspaces;
use tidepool::server::{AppState, build_router};
use tidepool::substrate::http::HttpSubstrate;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runtime knobs for the binary.
///
/// Pool semantics (queries, presubmits, dry-run) live in the JSON config
/// file; these are deployment concerns only.
struct RuntimeConfig {
    /// Address to bind the status endpoint to.
    listen_addr: SocketAddr,

    /// Interval between sync iterations.
    sync_period: Duration,

    /// Path to the JSON controller configuration.
    config_path: PathBuf,

    /// Base URL of the job substrate API.
    substrate_url: String,

    /// URL root repositories are cloned from.
    clone_base: String,
}

impl RuntimeConfig {
    /// Loads runtime configuration from environment variables with defaults.
    fn from_env() -> Self {
        let listen_addr = std::env::var("TIDE_LISTEN_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8888)));

        let sync_period = std::env::var("TIDE_SYNC_PERIOD_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let config_path = std::env::var("TIDE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./tide.json"));

        let substrate_url = std::env::var("TIDE_SUBSTRATE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        let clone_base =
            std::env::var("TIDE_CLONE_BASE").unwrap_or_else(|_| "https://github.com".to_string());

        RuntimeConfig {
            listen_addr,
            sync_period,
            config_path,
            substrate_url,
            clone_base,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidepool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = RuntimeConfig::from_env();

    let config = match TideConfig::from_file(&runtime.config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(
                path = %runtime.config_path.display(),
                error = %err,
                "failed to load configuration"
            );
            std::process::exit(1);
        }
    };

    tracing::info!(
        queries = config.queries.len(),
        repos = config.presubmits.len(),
        dry_run = config.dry_run,
        "starting tidepool"
    );

    let token = std::env::var("GITHUB_TOKEN").unwrap_or_else(|_| {
        tracing::warn!("GITHUB_TOKEN not set, forge requests will be unauthenticated");
        String::new()
    });
    let forge = GithubForge::from_token(token).expect("failed to build GitHub client");
    let substrate = HttpSubstrate::new(runtime.substrate_url);
    let workspaces = LocalWorkspaces::new(runtime.clone_base);

    let pools = PoolsHandle::new();
    let controller = Arc::new(Controller::new(
        config,
        forge,
        substrate,
        workspaces,
        pools.clone(),
    ));

    let cancel = CancellationToken::new();

    // Ctrl-C stops the server and cancels an in-flight iteration at its next
    // I/O boundary.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    // The sync ticker. Iterations run strictly one at a time: the next tick
    // is not serviced until the previous sync returns.
    {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        let period = runtime.sync_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(err) = controller.sync(&cancel).await {
                    tracing::error!(error = %err, "sync failed");
                }
            }
        });
    }

    let app = build_router(AppState::new(pools));
    let listener = tokio::net::TcpListener::bind(runtime.listen_addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!("listening on {}", runtime.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .expect("server failed");
}
