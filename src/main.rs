use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use genalpha_bot::channels::{SlackClient, SocketModeAdapter, verify_setup};
use genalpha_bot::config::BotConfig;
use genalpha_bot::health;
use genalpha_bot::llm::OpenAiTransformer;
use genalpha_bot::pipeline::filter::FilterConfig;
use genalpha_bot::pipeline::processor::{Dispatcher, MessageProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = BotConfig::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.verbose));
    let config = config.context("Failed to load configuration")?;

    let channels = if config.monitors_all_channels() {
        "all joined channels".to_string()
    } else {
        config.slack.channel_ids.join(", ")
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %channels,
        target_users = %config.slack.target_users.join(", "),
        model = %config.transform.model,
        publish_mode = ?config.slack.publish_mode,
        "Starting Gen Alpha Slack bot"
    );

    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();

    // ── Health check ────────────────────────────────────────────────────
    let health_cancel = cancel.clone();
    let health_port = config.health_port;
    tasks.spawn(async move {
        if let Err(e) = health::serve(health_port, health_cancel).await {
            error!(port = health_port, error = %e, "Health check server failed");
        }
    });

    // ── Slack + pipeline ────────────────────────────────────────────────
    let slack = SlackClient::new(&config.slack).context("Failed to build Slack client")?;

    if config.verbose {
        verify_setup(&slack, &config.slack, config.debug).await;
    }

    let transformer = OpenAiTransformer::new(config.transform.clone())
        .context("Failed to build transformation client")?;
    let slack_api = Arc::new(slack.clone());
    let processor = MessageProcessor::new(
        FilterConfig::new(
            config.slack.channel_ids.clone(),
            config.slack.target_users.clone(),
        ),
        slack_api.clone(),
        Arc::new(transformer),
        slack_api,
    )
    .with_publish_mode(config.slack.publish_mode);
    let dispatcher = Dispatcher::new(Arc::new(processor));

    let mut adapter = SocketModeAdapter::new(slack);
    let handler = dispatcher.clone();
    adapter.subscribe_messages(move |msg| {
        let _ = handler.dispatch(msg);
    });

    // ── Shutdown signal ─────────────────────────────────────────────────
    let signal_cancel = cancel.clone();
    tasks.spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                signal_cancel.cancel();
            }
            _ = signal_cancel.cancelled() => {}
        }
    });

    info!("Gen Alpha Slack bot is running");
    let result = adapter.start(cancel.clone()).await;

    cancel.cancel();
    dispatcher.shutdown().await;
    tasks.close();
    tasks.wait().await;

    result.context("Socket Mode subscription failed")?;
    info!("Shut down cleanly");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,genalpha_bot=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
