mod bridge;
mod clock;
mod config;
mod home_assistant;
mod mqtt_client;
mod notifier;
mod processors;
mod protocol;
mod provisioning;
mod qingping_api;
mod state;
mod tasks;

use crate::config::Config;
use crate::provisioning::{BrokerConfig, Credentials, Provisioner};
use crate::qingping_api::developer_client::DeveloperClient;
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt};

/// Bridges Qingping air monitors on a private MQTT broker into Home Assistant.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file. An example is written there if it does not exist.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge (default).
    Run,
    /// Point one device at this broker through the developer portal.
    Provision {
        #[arg(long)]
        mac: String,
    },
    /// Bind every unbound Air Monitor Lite on the account.
    ProvisionAll,
    /// Unbind and bind a device again so it reloads its configuration.
    Reconnect {
        #[arg(long)]
        mac: String,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config).or_else(|e| {
        if std::path::Path::new(&args.config).exists() {
            return Err(e);
        }
        println!("Config file not found. Creating example {}...", args.config);
        Config::save_example(&args.config)?;
        println!("Please edit {} with your settings and restart the application.", args.config);
        Err(e)
    })?;
    config.validate().context("Invalid configuration")?;

    // One file per level
    let log_dir = &config.logging.directory;
    let debug_file = rolling::daily(log_dir, &config.logging.debug_file);
    let info_file = rolling::daily(log_dir, &config.logging.info_file);
    let warn_file = rolling::daily(log_dir, &config.logging.warn_file);
    let error_file = rolling::daily(log_dir, &config.logging.error_file);

    let debug_layer = fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug"));
    let info_layer = fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);
    let warn_layer = fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);
    let error_layer = fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);
    let console_layer = fmt::layer()
        .pretty()
        .with_filter(EnvFilter::new(&config.logging.console_level));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(debug_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .init();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => bridge::run(config).await,
        Command::Provision { mac } => {
            let (provisioner, credentials, broker) = provisioning_inputs(&config)?;
            let outcome = provisioner
                .ensure_provisioned(&credentials, &broker, &mac)
                .await?;
            info!(
                config_id = outcome.config_id,
                config = ?outcome.config,
                device = ?outcome.device,
                "device provisioned"
            );
            Ok(())
        }
        Command::ProvisionAll => {
            let (provisioner, credentials, broker) = provisioning_inputs(&config)?;
            let macs = provisioner.provision_unbound(&credentials, &broker).await?;
            info!(count = macs.len(), macs = ?macs, "provisioning finished");
            Ok(())
        }
        Command::Reconnect { mac } => {
            let (provisioner, credentials, broker) = provisioning_inputs(&config)?;
            let outcome = provisioner.rebind(&credentials, &broker, &mac).await?;
            info!(config_id = outcome.config_id, "device re-bound");
            Ok(())
        }
    }
}

fn provisioning_inputs(
    config: &Config,
) -> anyhow::Result<(Provisioner<DeveloperClient>, Credentials, BrokerConfig)> {
    let developer = config
        .developer
        .as_ref()
        .ok_or_else(|| anyhow!("[developer] section is required for provisioning"))?;

    let client = DeveloperClient::new(Duration::from_secs(developer.request_timeout_seconds))
        .context("Unable to build developer portal client")?;
    let credentials = Credentials {
        email: developer.email.clone(),
        password: developer.password.clone(),
    };
    let broker = BrokerConfig {
        host: developer
            .device_broker_host
            .clone()
            .unwrap_or_else(|| config.mqtt.host.clone()),
        port: developer.device_broker_port.unwrap_or(config.mqtt.port),
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        config_name: developer.config_name.clone(),
    };
    Ok((Provisioner::new(client), credentials, broker))
}
