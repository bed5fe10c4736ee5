use std::env;

use localdeals_server::AppState;
use localdeals_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    localdeals_server::observability::init_tracing();

    let config_path = resolve_config_path();
    let cfg = load_config(config_path.as_deref()).map_err(anyhow::Error::msg)?;
    tracing::info!(
        path = config_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH),
        "Configuration loaded"
    );

    localdeals_server::observability::apply_logging_level(&cfg.logging.level);
    localdeals_server::metrics::init_metrics();

    let state = AppState::connect(&cfg).await?;
    tracing::info!("localdeals core ready; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    state.shutdown().await;

    if let Some(rendered) = localdeals_server::metrics::render_metrics() {
        tracing::debug!(metrics = %rendered, "final metrics");
    }
    Ok(())
}

/// `--config <path>`, then `LOCALDEALS_CONFIG`, then the default file if present.
fn resolve_config_path() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Some(path);
            }
        }
    }

    env::var("LOCALDEALS_CONFIG").ok().filter(|p| !p.is_empty())
}
