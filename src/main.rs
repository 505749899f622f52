// pagereader service binary: HTTP server plus the nightly crunch schedule.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pagereader::{AppState, ReaderConfig};

#[derive(Debug, Parser)]
#[command(name = "pagereader", about = "URL-to-text reader service")]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, env = "READER_BIND_ADDR")]
    bind: Option<std::net::SocketAddr>,

    /// Data directory for object storage and the record index
    #[arg(long, env = "READER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run the browser with a visible window (debugging)
    #[arg(long)]
    headed: bool,

    /// Override the derived browser pool size
    #[arg(long, env = "READER_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Disable the 02:00 UTC crunch schedule
    #[arg(long)]
    no_schedule: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let mut config = ReaderConfig::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if cli.headed {
        config.headless = false;
    }
    if let Some(pool_size) = cli.pool_size {
        config.pool_size = pool_size;
    }

    let state = AppState::build(config).await?;

    if !cli.no_schedule {
        spawn_crunch_schedule(state.clone());
    }

    let app = pagereader::create_router(state.clone());
    let addr = state.config.bind_addr;
    tracing::info!("pagereader listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.pool.shutdown().await;
    Ok(())
}

/// Daily crunch at 02:00 UTC, retried 3 times with 60 s minimum backoff.
fn spawn_crunch_schedule(state: AppState) {
    tokio::spawn(async move {
        loop {
            let now = chrono::Utc::now();
            let next = pagereader::cruncher::next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!("next crunch scheduled at {next}");
            tokio::time::sleep(wait).await;

            let budget = state.config.crunch.scheduled_timeout;
            for attempt in 0..3u32 {
                if attempt > 0 {
                    let backoff = Duration::from_secs(60) * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!("crunch retry {attempt} after {backoff:?}");
                    tokio::time::sleep(backoff).await;
                }
                match tokio::time::timeout(budget, state.cruncher.crunch(None)).await {
                    Ok(Ok(files)) => {
                        tracing::info!("nightly crunch produced {} archives", files.len());
                        break;
                    }
                    Ok(Err(e)) => tracing::error!("nightly crunch failed: {e}"),
                    Err(_) => tracing::error!(
                        "nightly crunch timed out after {}s",
                        budget.as_secs()
                    ),
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received");
}
