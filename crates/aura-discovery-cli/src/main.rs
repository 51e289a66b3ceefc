//! Discovery node CLI
//!
//! Runs a discovery endpoint from the command line: announce this node,
//! log what peers say, or fire a single event.

use anyhow::{Context, Result};
use aura_discovery::{
    Endpoint, EndpointConfig, EndpointEvent, EventKey, ProcessIdentity, ANNOUNCEMENT_EVENT,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

mod config;

use config::{load_config, EndpointArgs};

#[derive(Parser)]
#[command(name = "aura-discovery")]
#[command(about = "Aura peer discovery over broadcast, multicast or unicast UDP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "discovery.toml")]
    config: PathBuf,

    #[command(flatten)]
    endpoint: EndpointArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce this node periodically and log peer traffic
    Run {
        /// Seconds between announcements
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Additional named events to log
        #[arg(short, long)]
        listen: Vec<String>,
    },

    /// Send a single event and exit
    Send {
        /// Event name
        event: String,

        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let identity = ProcessIdentity::generate();
    let config = cli.endpoint.apply(load_config(&cli.config)?);

    match cli.command {
        Commands::Run { interval, listen } => run(config, &identity, interval, listen).await,
        Commands::Send { event, data } => {
            let payload = data
                .map(|text| serde_json::from_str::<Value>(&text))
                .transpose()
                .context("--data must be valid JSON")?;
            send_once(config, &identity, &event, payload).await
        }
    }
}

async fn run(
    config: EndpointConfig,
    identity: &ProcessIdentity,
    interval: u64,
    listen: Vec<String>,
) -> Result<()> {
    let endpoint = Endpoint::new(config, identity);

    for name in std::iter::once(ANNOUNCEMENT_EVENT.to_string()).chain(listen) {
        endpoint.on(EventKey::named(name), log_event);
    }
    endpoint.on(EventKey::Message, log_event);

    endpoint.start().await.context("starting discovery endpoint")?;
    info!(
        process = %endpoint.process_id(),
        instance = %endpoint.instance_id(),
        host = endpoint.host_name(),
        "announcing every {interval}s"
    );

    let announcement = json!({
        "hostName": endpoint.host_name(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                endpoint.send(ANNOUNCEMENT_EVENT, Some(announcement.clone())).await;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    endpoint.stop().await?;
    Ok(())
}

async fn send_once(
    config: EndpointConfig,
    identity: &ProcessIdentity,
    event: &str,
    payload: Option<Value>,
) -> Result<()> {
    let endpoint = Endpoint::new(config, identity);
    endpoint.start().await.context("starting discovery endpoint")?;
    endpoint.send(event, payload).await;
    info!(event, destinations = ?endpoint.destinations(), "sent");
    endpoint.stop().await?;
    Ok(())
}

fn log_event(event: &EndpointEvent) {
    match event {
        EndpointEvent::Named {
            event,
            payload,
            envelope,
            sender,
        } => info!(
            %event,
            %payload,
            host = %envelope.host_name,
            instance = %envelope.iid,
            %sender,
            "peer event"
        ),
        EndpointEvent::Message(envelope) => info!(
            event = %envelope.event,
            host = %envelope.host_name,
            instance = %envelope.iid,
            "peer message"
        ),
        EndpointEvent::Error(err) => warn!(error = %err, "endpoint error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_overrides() {
        let cli = Cli::try_parse_from([
            "aura-discovery",
            "--unicast",
            "10.0.0.1,10.0.0.2",
            "--port",
            "4000",
            "send",
            "job",
            "--data",
            "{\"id\":1}",
        ])
        .unwrap();

        assert_eq!(cli.endpoint.port, Some(4000));
        assert_eq!(cli.endpoint.unicast.as_deref(), Some("10.0.0.1,10.0.0.2"));
        match cli.command {
            Commands::Send { event, data } => {
                assert_eq!(event, "job");
                assert_eq!(data.as_deref(), Some("{\"id\":1}"));
            }
            Commands::Run { .. } => panic!("expected send"),
        }
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["aura-discovery", "run", "-l", "job"]).unwrap();
        assert!(!cli.verbose);
        assert_eq!(cli.config, PathBuf::from("discovery.toml"));
        match cli.command {
            Commands::Run { interval, listen } => {
                assert_eq!(interval, 5);
                assert_eq!(listen, vec!["job".to_string()]);
            }
            Commands::Send { .. } => panic!("expected run"),
        }
    }
}
