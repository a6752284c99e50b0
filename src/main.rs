//! cbrt-service: a delimiter-framed cube root service
//!
//! A server answers each framed integer with its cube root; a client
//! pipelines a batch of integers and reads the answers back in order.
//!
//! Features:
//! - Single-byte frame delimiter (tab by default)
//! - One task per connection, idle connections reclaimed after a timeout
//! - Malformed requests answered in-band without closing the connection
//! - Server, client and combined demo modes
//! - Configuration via CLI arguments or TOML file

mod client;
mod codec;
mod compute;
mod config;
mod connection;
mod lifecycle;
mod protocol;
mod server;

use client::Client;
use config::{Config, Mode};
use lifecycle::{BoxError, Lifecycle};
use server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        listen = %config.listen,
        delimiter = config.delimiter,
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        batch_size = config.batch_size,
        clients = config.clients,
        "Starting cbrt-service"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(async move {
        match config.mode {
            Mode::Server => run_server(config).await,
            Mode::Client => run_clients(config).await,
            Mode::Demo => run_demo(config).await,
        }
    })
}

/// Serve until Ctrl-C.
async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut lifecycle = Lifecycle::new();
    start_server(&mut lifecycle, &config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");

    lifecycle.stop();
    lifecycle.join().await;
    Ok(())
}

/// Drive a server that runs elsewhere.
async fn run_clients(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut clients = Lifecycle::new();
    start_clients(&mut clients, &config, &config.listen);

    let summary = clients.join().await;
    info!(finished = summary.finished, failed = summary.failed, "Clients done");
    Ok(())
}

/// Start a server, run the clients against it, then stop the server.
async fn run_demo(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut services = Lifecycle::new();
    let address = start_server(&mut services, &config).await?;

    let mut clients = Lifecycle::new();
    start_clients(&mut clients, &config, &address);

    let summary = clients.join().await;
    info!(finished = summary.finished, failed = summary.failed, "Clients done");

    services.stop();
    services.join().await;
    Ok(())
}

/// Bind the server and spawn its accept loop. Returns the bound address.
async fn start_server(
    lifecycle: &mut Lifecycle,
    config: &Config,
) -> Result<String, Box<dyn std::error::Error>> {
    let server = Server::bind(config).await?;
    let address = server.local_addr()?.to_string();

    let shutdown = lifecycle.shutdown();
    lifecycle.spawn("server", async move {
        server.run(shutdown).await;
        Ok::<(), BoxError>(())
    });

    Ok(address)
}

fn start_clients(lifecycle: &mut Lifecycle, config: &Config, address: &str) {
    for id in 1..=config.clients {
        let client = Client::new(id, config);
        let address = address.to_string();
        let batch_size = config.batch_size;

        lifecycle.spawn("client", async move {
            let report = client.run(&address, batch_size).await?;
            if report.is_complete() {
                info!(client = id, responses = report.responses.len(), "Batch complete");
            } else {
                warn!(
                    client = id,
                    sent = report.requests.len(),
                    received = report.responses.len(),
                    "Batch cut short"
                );
            }
            Ok::<(), BoxError>(())
        });
    }

    info!(clients = config.clients, address, "Clients started");
}
