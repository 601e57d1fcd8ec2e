use anyhow::Context;
use clap::Parser;
use plinko_simulator::{Api, Simulator, NAMESPACE, STARTING_BALANCE};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[arg(short, long, default_value = NAMESPACE)]
    namespace: String,

    /// Balance credited to new accounts
    #[arg(short, long, default_value_t = STARTING_BALANCE)]
    balance: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let simulator = Arc::new(Simulator::new(args.namespace.clone(), args.balance));
    let api = Api::new(simulator);
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}/{}", addr, args.namespace);
    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}
