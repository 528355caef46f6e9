//! microcomms command line.
//!
//! Wires the HTTP transport, an in-process queue and the static discovery
//! provider from a config file, then runs a single command against them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use microcomms::config::{self, DispatchConfig};
use microcomms::discovery::{DiscoveryCache, StaticProvider};
use microcomms::dispatch::{Dispatcher, DispatcherBuilder, ProtocolPolicy};
use microcomms::observability::{logging, metrics};
use microcomms::transport::http::HttpTransport;
use microcomms::transport::memory::{MemoryQueue, QueueReceiver};
use microcomms::transport::{MessageRequest, Payload, Protocol};

#[derive(Parser)]
#[command(name = "microcomms")]
#[command(about = "Send messages through breakers, limiters and discovery", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the response
    ///
    /// Only the http and queue transports are wired here. Under `auto` a
    /// dotted target selects rpc and fails with an unsupported protocol,
    /// so pass `--protocol http` for such targets.
    Send {
        target: String,
        /// auto, fallback, or a protocol name (http or queue)
        #[arg(short, long, default_value = "auto")]
        protocol: String,
        /// Text body; an empty body sends an HTTP GET
        #[arg(short, long)]
        data: Option<String>,
        /// Treat --data as JSON
        #[arg(long)]
        json: bool,
        /// Extra header as name=value, repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        /// Overrides transport.timeout_ms
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Resolve a service name through the discovery cache
    Resolve { service: String },
    /// Register an instance with the discovery provider
    ///
    /// The provider is rebuilt from the config on every run, so the
    /// registration only lasts for this invocation. Add persistent
    /// instances under `[[discovery.services]]` instead.
    Register {
        name: String,
        address: String,
        port: u16,
    },
    /// Remove an instance by id
    ///
    /// Like `register`, this only changes the provider held by this run.
    Deregister { id: String },
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => DispatchConfig::default(),
    };

    logging::init_logging(&config.observability)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let discovery = config.discovery.enabled.then(|| {
        let provider = StaticProvider::from_entries(&config.discovery.services);
        DiscoveryCache::new(Arc::new(provider), config.discovery.cache_settings())
    });

    match cli.command {
        Commands::Send {
            target,
            protocol,
            data,
            json,
            headers,
            timeout_ms,
        } => {
            let policy: ProtocolPolicy = protocol.parse()?;
            let (dispatcher, _queue) = build_dispatcher(&config, discovery);

            let mut request = MessageRequest::new(target);
            if let Some(data) = data {
                let payload = if json {
                    Payload::Json(serde_json::from_str(&data)?)
                } else {
                    Payload::Text(data)
                };
                request = request.with_payload(payload);
            }
            for (name, value) in headers {
                request = request.with_header(name, value);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(ms));
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, cancelling");
                    on_signal.cancel();
                }
            });

            let response = dispatcher.send_with_cancel(&request, policy, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Resolve { service } => {
            let cache = require_discovery(discovery)?;
            let instance = cache.find_service(&service).await?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }
        Commands::Register {
            name,
            address,
            port,
        } => {
            let cache = require_discovery(discovery)?;
            let id = cache.register_service(&name, &address, port).await?;
            println!("{}", id);
        }
        Commands::Deregister { id } => {
            let cache = require_discovery(discovery)?;
            cache.deregister_service(&id).await?;
            println!("deregistered {}", id);
        }
        Commands::CheckConfig => {
            tracing::info!(
                fallback_order = ?config.fallback_protocols(),
                timeout_ms = config.transport.timeout_ms,
                rate_limit = config.rate_limit.enabled,
                services = config.discovery.services.len(),
                "Configuration valid"
            );
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// HTTP and queue transports. The queue receiver is returned so the channel
/// stays open for the lifetime of the command.
fn build_dispatcher(
    config: &DispatchConfig,
    discovery: Option<DiscoveryCache>,
) -> (Dispatcher, QueueReceiver) {
    let (queue, receiver) = MemoryQueue::new(config.queue.capacity, config.queue.send_timeout());

    let mut builder = DispatcherBuilder::from_config(config)
        .transport(Protocol::Http, HttpTransport::new())
        .transport(Protocol::Queue, queue);
    if let Some(cache) = discovery {
        builder = builder.discovery(cache);
    }

    (builder.build(), receiver)
}

fn require_discovery(discovery: Option<DiscoveryCache>) -> Result<DiscoveryCache, String> {
    discovery.ok_or_else(|| "discovery is disabled in the configuration".to_string())
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}
