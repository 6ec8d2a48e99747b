//! scan-bridge - barcode scans to Grocy stock actions
//!
//! Reads scans from barcode-server (websocket or MQTT) or a serial scanner,
//! tells single scans from double scans, and applies the configured Grocy
//! action for each. An optional buzzer plays a melody per outcome.
//!
//! Module structure:
//! - `domain/` - Core types (ScanEvent, Decision, StockAction, Melody)
//! - `io/` - External interfaces (feeds, Grocy, buzzer, Prometheus)
//! - `services/` - Business logic (Disambiguator, dispatchers)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use scan_bridge::domain::{BuzzerKind, Melody, ScanKind};
use scan_bridge::infra::{Config, FeedKind, Metrics};
use scan_bridge::io::{
    start_mqtt_feed, Buzzer, GrocyClient, MqttFeedConfig, SerialFeed, SysfsBuzzer, SysfsPwmBuzzer,
    WebsocketFeed, WebsocketFeedConfig,
};
use scan_bridge::services::{ActionDispatcher, Disambiguator, Dispatcher, FeedbackDispatcher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// scan-bridge - single/double barcode scans to Grocy stock actions
#[derive(Parser, Debug)]
#[command(name = "scan-bridge", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

/// Wrap the action dispatcher with buzzer feedback when a pin is configured
async fn build_dispatcher(
    config: &Config,
    actions: ActionDispatcher<GrocyClient>,
) -> anyhow::Result<Box<dyn Dispatcher>> {
    let Some(pin) = config.buzzer_pin() else {
        return Ok(Box::new(actions));
    };

    let kind = config.buzzer_kind();
    let buzzer: Arc<dyn Buzzer> = match kind {
        BuzzerKind::Buzzer => Arc::new(
            SysfsBuzzer::open(pin).await.with_context(|| format!("Failed to open buzzer on GPIO {pin}"))?,
        ),
        BuzzerKind::Tonal => Arc::new(
            SysfsPwmBuzzer::open(config.pwm_chip(), pin)
                .await
                .with_context(|| format!("Failed to open PWM channel {pin}"))?,
        ),
    };

    let failure = Melody::parse(config.failure_melody(), kind).context("Invalid failure melody")?;

    let mut success = Vec::new();
    for scan_kind in [ScanKind::Single, ScanKind::Double] {
        let Some(action) = actions.action_for(scan_kind) else { continue };
        if let Some(source) = config.melody_for(action) {
            let melody = Melody::parse(source, kind)
                .with_context(|| format!("Invalid melody for {action}"))?;
            success.push((scan_kind, melody));
        }
    }

    let mut feedback = FeedbackDispatcher::new(actions, buzzer, failure);
    for (scan_kind, melody) in success {
        feedback = feedback.with_success(scan_kind, melody);
    }
    Ok(Box::new(feedback))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "scan-bridge starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path)?;

    info!(
        config_file = %config.config_file(),
        grocy_url = %config.grocy_url(),
        single_action = %config.single_action(),
        double_action = ?config.double_action().map(|a| a.to_string()),
        double_scan_timeout_ms = %config.double_scan_timeout().as_millis(),
        feed = %config.feed_kind().as_str(),
        buzzer_pin = ?config.buzzer_pin(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let grocy = GrocyClient::new(config.grocy_url(), config.grocy_api_key(), config.grocy_timeout())
        .context("Failed to create Grocy client")?;
    let actions =
        ActionDispatcher::new(Arc::new(grocy), config.single_action(), config.double_action());
    let double_scan_enabled = actions.double_scan_enabled();
    let dispatcher = build_dispatcher(&config, actions).await?;

    // Bounded for backpressure; feeds wait instead of dropping scans
    let (scan_tx, scan_rx) = mpsc::channel(config.channel_capacity());

    let feed_shutdown = shutdown_rx.clone();
    match config.feed_kind() {
        FeedKind::Websocket => {
            let client_id = config
                .websocket_client_id()
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let feed = WebsocketFeed::new(
                WebsocketFeedConfig {
                    url: config.websocket_url().to_string(),
                    client_id,
                    auth_token: config.websocket_auth_token().map(str::to_string),
                },
                metrics.clone(),
            );
            tokio::spawn(feed.run(scan_tx, feed_shutdown));
        }
        FeedKind::Mqtt => {
            let mqtt_config = MqttFeedConfig {
                host: config.mqtt_host().to_string(),
                port: config.mqtt_port(),
                topic: config.mqtt_topic().to_string(),
                client_id: format!("scan-bridge-{}", uuid::Uuid::new_v4().simple()),
                username: config.mqtt_username().map(str::to_string),
                password: config.mqtt_password().map(str::to_string),
            };
            let mqtt_metrics = metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = start_mqtt_feed(mqtt_config, scan_tx, mqtt_metrics, feed_shutdown).await {
                    error!(error = %e, "mqtt_feed_error");
                }
            });
        }
        FeedKind::Serial => {
            let feed = SerialFeed::new(config.serial_device(), config.serial_baud(), metrics.clone());
            tokio::spawn(feed.run(scan_tx, feed_shutdown));
        }
    }

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = scan_bridge::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Runs until the feed drops its sender, then flushes the pending scan
    let mut disambiguator = Disambiguator::new(
        double_scan_enabled,
        config.double_scan_timeout(),
        dispatcher,
        metrics.clone(),
    );
    disambiguator.run(scan_rx).await;

    metrics.report().log();
    info!("scan-bridge shutdown complete");
    Ok(())
}
