use std::sync::Arc;

use progress_bot::channels::TelegramChannel;
use progress_bot::commands;
use progress_bot::config::{TelegramConfig, TrackerConfig};
use progress_bot::notifier::{LogNotifier, Notifier};
use progress_bot::server;
use progress_bot::tracker::{JobTracker, TrackerContext};
use progress_bot::trigger::HttpTrigger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = TrackerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let telegram_config = TelegramConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📈 Progress Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Job: {}", config.settings.job_name);
    eprintln!("   Callback: http://{}/callback", config.listen_addr);
    eprintln!("   Trigger: {}", config.trigger_url);
    eprintln!(
        "   Watchdog: every {}s, timeout {}s",
        config.settings.poll_interval.as_secs(),
        config.settings.timeout.as_secs()
    );

    // ── Notifier ─────────────────────────────────────────────────────────
    let telegram = telegram_config.map(|c| Arc::new(TelegramChannel::new(c)));
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(channel) => {
            if let Err(e) = channel.health_check().await {
                tracing::warn!(error = %e, "Telegram health check failed");
            }
            eprintln!("   Telegram: enabled");
            Arc::clone(channel) as Arc<dyn Notifier>
        }
        None => {
            eprintln!("   Telegram: disabled (status goes to the log)");
            Arc::new(LogNotifier::new())
        }
    };

    // ── Tracker ──────────────────────────────────────────────────────────
    let ctx = TrackerContext::new(notifier, config.settings.clone());
    let trigger = Arc::new(HttpTrigger::new(
        config.trigger_url.clone(),
        config.settings.job_name.clone(),
    ));
    let tracker = JobTracker::new(ctx, trigger);

    let server = server::serve(config.listen_addr, tracker.clone());

    match telegram {
        Some(channel) => {
            let stream = channel.start().await?;
            tokio::select! {
                result = server => result?,
                _ = commands::run(stream, &channel, tracker) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
        None => {
            tokio::select! {
                result = server => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
    }

    Ok(())
}
