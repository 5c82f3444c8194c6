use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use wallet_update_daemon::config::GlobalConfig;
use wallet_update_daemon::ipc::{self, auth::AuthToken, prompts::PromptBroker, updates::UpdateState};
use wallet_updater_lib::AppUpdater;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("Wallet update daemon starting");

    let cfg = GlobalConfig::load()?;
    let running = cfg.running_version();
    tracing::info!(
        "Running app {} (bundle {:?}), platform {:?}",
        running.app_version,
        running.bundle_version,
        cfg.platform
    );

    let prompts = Arc::new(PromptBroker::default());
    let updater = AppUpdater::assemble(&cfg.updater, running, cfg.platform, prompts.clone()).await?;

    if cfg.updater.enabled && cfg.updater.check_on_start {
        let controller = updater.controller.clone();
        tokio::spawn(async move {
            controller.run_startup_check(true).await;
        });
    } else {
        tracing::info!("Startup update check disabled");
    }

    let auth = if cfg.ipc.auth_disabled {
        tracing::warn!("IPC auth disabled");
        AuthToken::disabled()
    } else {
        AuthToken::generate_and_save(&ipc::auth::token_file_path())?
    };

    let server = ipc::IPCServer::new(UpdateState::new(updater.controller.clone(), prompts), auth, &cfg.ipc.listen_addr);

    // Graceful shutdown: Ctrl+C 시 서버 종료
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    if let Err(e) = server.start(shutdown).await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("Wallet update daemon shutting down");
    Ok(())
}
