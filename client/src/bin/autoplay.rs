//! Headless autoplay - connects one player and plays rounds until done
//!
//! Usage:
//!   cargo run --bin autoplay -- --token <TOKEN> [OPTIONS]
//!
//! Options:
//!   -u, --url        Server URL (default: http://localhost:8080)
//!   -t, --token      Session token (required)
//!   -n, --namespace  Socket namespace (default: plinko)
//!   -r, --rounds     Rounds to play (default: until the balance runs out)
//!   -c, --config     YAML config file
//!   -l, --log-level  Overrides the config log level

use anyhow::Context;
use clap::Parser;
use plinko_client::{game::Signal, Client, Config, Credential};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless autoplay for the plinko client")]
struct Args {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long)]
    token: String,

    #[arg(short, long, default_value = "plinko")]
    namespace: String,

    #[arg(short, long)]
    rounds: Option<u32>,

    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long)]
    log_level: Option<String>,

    /// Simulated fall time of each drop in milliseconds
    #[arg(long, default_value_t = 1500)]
    fall_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("failed to load {path}"))?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    let settings = config.validate().context("invalid config")?;

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .init();

    let credential = Credential::new(args.token, args.url, args.namespace);
    let mut client = Client::connect(&settings, credential).context("failed to connect")?;
    let fall = Duration::from_millis(args.fall_ms);
    let mut started = false;
    let mut stopped = false;
    let mut wins = 0u64;
    let mut settled = 0u64;
    let mut state = client.watch();

    loop {
        let signal = tokio::select! {
            signal = client.next_signal() => signal,
            // Let in-flight drops settle before leaving
            changed = state.changed(), if stopped => {
                if changed.is_err() || state.borrow_and_update().in_flight == 0 {
                    break;
                }
                continue;
            }
        };
        let Some(signal) = signal else {
            break;
        };
        match signal {
            Signal::Configured(config) => {
                info!(
                    bets = config.bets.len(),
                    risks = config.risks.len(),
                    rows = config.rows.len(),
                    "configured"
                );
                if !started {
                    started = true;
                    client
                        .game()
                        .start_autoplay(args.rounds)
                        .await
                        .context("failed to start autoplay")?;
                }
            }
            Signal::Balance(balance) => info!(balance, "balance"),
            Signal::Drop(ball) => {
                // Outer slots take a little longer to reach
                let center = ball.rows as usize / 2;
                let travel = fall + Duration::from_millis(40 * ball.slot.abs_diff(center) as u64);
                tokio::spawn(async move {
                    tokio::time::sleep(travel).await;
                    let slot = ball.slot;
                    ball.completion.complete(slot);
                });
            }
            Signal::Settled(settlement) => {
                settled += 1;
                info!(
                    settled,
                    slot = settlement.slot,
                    multiplier = settlement.multiplier,
                    balance = settlement.balance,
                    "settled"
                );
            }
            Signal::Win { amount, multiplier } => {
                wins += 1;
                info!(amount, multiplier, "win");
            }
            Signal::Advisory(message) => warn!(%message, "advisory"),
            Signal::Reconnecting => warn!("reconnecting"),
            Signal::AdvisoryCleared => info!("connection restored"),
            Signal::AutoplayStopped(stop) => {
                info!(?stop, "autoplay stopped");
                stopped = true;
            }
            Signal::Fatal(reason) => {
                client.shutdown().await;
                anyhow::bail!("session failed: {reason}");
            }
            Signal::ForcedLogout => {
                client.shutdown().await;
                anyhow::bail!("logged in from another device");
            }
            Signal::AuthenticationRequired => {}
        }
        if stopped && state.borrow_and_update().in_flight == 0 {
            break;
        }
    }

    let balance = client.state().balance;
    info!(settled, wins, balance, "done");
    client.shutdown().await;
    Ok(())
}
