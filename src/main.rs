mod config;
mod device;
mod error;
mod supervisor;
mod telemetry;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use device::auth::Credential;
use device::DeviceEndpoint;
use supervisor::Supervisor;
use telemetry::{LogSink, TelemetryPublisher, TelemetrySink};

#[derive(Parser)]
#[command(name = "router-watchdog")]
#[command(about = "Keeps a cellular hotspot online and republishes its status")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load_or_default(&cli.config)?;

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("router-watchdog v{}", env!("CARGO_PKG_VERSION"));

    let endpoint = DeviceEndpoint::parse(&config.device.address)?;
    info!("Router: {}", endpoint.base());

    let sink = telemetry_sink(&config.telemetry);
    let publisher = TelemetryPublisher::new(sink, config.telemetry.topic.clone())
        .with_redactions(config.telemetry.redact.clone());

    if config.reconnect.enabled {
        info!(
            "Reconnect enabled: up to {} attempts, {}s settle",
            config.reconnect.max_attempts, config.reconnect.settle_secs
        );
    } else {
        info!("Reconnect disabled, status will only be reported");
    }

    let supervisor = Arc::new(Supervisor::new(
        endpoint,
        Credential::new(config.device.password.clone()),
        config.polling.clone(),
        config.reconnect.clone(),
        publisher,
    ));

    info!("Starting loop. Press Ctrl+C to stop.");
    tokio::select! {
        result = supervisor.run() => {
            if let Err(ref e) = result {
                error!("Exit requested: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    }
}

fn telemetry_sink(config: &config::TelemetryConfig) -> Arc<dyn TelemetrySink> {
    #[cfg(feature = "mqtt")]
    if let Some(ref mqtt_config) = config.mqtt {
        info!("Telemetry to MQTT topic {}", config.topic);
        return Arc::new(telemetry::mqtt::MqttSink::connect(mqtt_config));
    }

    #[cfg(not(feature = "mqtt"))]
    if config.mqtt.is_some() {
        info!("MQTT config found but mqtt feature not enabled");
    }

    info!("Telemetry broker not configured, logging status only");
    Arc::new(LogSink)
}
