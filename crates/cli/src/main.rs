use std::sync::Arc;

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    fluxlive_auth::{InMemoryUserProvider, SessionStore, SessionTokenGuard},
    fluxlive_config::LiveConfig,
    fluxlive_gateway::AppState,
    fluxlive_live::LiveRuntime,
};

#[derive(Parser)]
#[command(name = "fluxlive", about = "FluxLive — live component runtime server")]
struct Cli {
    /// Address to bind to (overrides FLUXLIVE_BIND).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides FLUXLIVE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Seed an admin user as name:password (e.g. for demos). The account
    /// gets the admin role and full user-management permissions.
    #[arg(long, env = "FLUXLIVE_SEED_ADMIN")]
    seed_admin: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut config = LiveConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let sessions = Arc::new(SessionStore::new(config.session_lifetime()));
    let provider = Arc::new(InMemoryUserProvider::new());
    seed_admin(&provider, cli.seed_admin.as_deref())?;

    let guard = Arc::new(SessionTokenGuard::new(Arc::clone(&sessions)));
    let runtime = Arc::new(LiveRuntime::new(config.clone(), guard));
    fluxlive_components::register_all(&runtime);
    info!(components = ?runtime.component_names(), "runtime ready");

    let state = AppState::new(runtime, sessions, provider, config);
    fluxlive_gateway::serve(state, shutdown_signal()).await
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    }
    Ok(())
}

fn seed_admin(provider: &InMemoryUserProvider, raw: Option<&str>) -> anyhow::Result<()> {
    let Some(raw) = raw else {
        return Ok(());
    };
    let Some((name, password)) = raw.split_once(':') else {
        anyhow::bail!("--seed-admin expects name:password");
    };
    if password.len() < 8 {
        warn!("seed admin password is shorter than 8 characters");
    }
    provider.seed(
        name,
        password,
        ["admin"],
        ["users.delete", "users.write", "admin"],
    )?;
    info!(username = name, "seeded admin user");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler");
    }
    info!("shutting down");
}
