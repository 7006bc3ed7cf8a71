//! SAMR demo server
//!
//! Run with: cargo run --bin samr-server -- --port 1500 --domain CONTOSO

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dcerpc::{DceRpcServer, DceRpcServerConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use samr_server::SamStore;

#[derive(Parser)]
#[command(name = "samr-server")]
#[command(about = "SAMR server over an in-memory account database")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "1500")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Name of the account domain
    #[arg(short, long, default_value = "CONTOSO")]
    domain: String,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Largest fragment accepted and sent
    #[arg(long, default_value = "4280")]
    max_frag: u16,

    #[arg(long, default_value = "100")]
    max_connections: usize,

    /// Calls in flight per connection
    #[arg(long, default_value = "16")]
    max_concurrent_calls: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let store = SamStore::demo(&args.domain)?;

    info!("Starting SAMR server");
    info!("Interface UUID: {}", samr::SAMR_UUID);
    info!("Version: {}.{}", samr::SAMR_VERSION_MAJOR, samr::SAMR_VERSION_MINOR);
    info!("Serving {} domains on {}", store.domain_count(), addr);

    let config = DceRpcServerConfig::default()
        .with_max_frag(args.max_frag, args.max_frag)
        .with_max_connections(args.max_connections)
        .with_max_concurrent_calls(args.max_concurrent_calls);
    let server = DceRpcServer::with_config(config);
    server.register_interface(samr::interface(Arc::new(store))).await;

    server
        .run_until(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
