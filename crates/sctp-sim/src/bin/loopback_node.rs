//! Loopback smoke test.
//!
//! Brings up two transports over the loopback engine, exchanges a greeting
//! in each direction plus a batch of binary messages, and prints both
//! sides' statistics as JSON. Exits non-zero if anything fails to arrive.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use sctp_sim::{connect_pair, CompletionMode, LoopbackEngine};
use sctp_transport::{Message, TransportConfig};

#[derive(Parser, Debug)]
#[command(name = "loopback-node", about = "Exercise sctp-transport over an in-memory link")]
struct Cli {
    /// Binary messages sent from side 1 after the greetings.
    #[arg(long, default_value_t = 16)]
    messages: usize,

    /// Size in bytes of each binary message.
    #[arg(long, default_value_t = 100_000)]
    size: usize,

    /// Override `max_fragment_size`.
    #[arg(long)]
    fragment: Option<usize>,

    /// Largest piece the engine hands to the receive callback.
    #[arg(long, default_value_t = 16 * 1024)]
    delivery_unit: usize,

    /// Complete lower-transport writes from a separate thread.
    #[arg(long, default_value_t = false)]
    deferred: bool,

    /// TOML transport configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-step timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            TransportConfig::from_toml_str(&text).context("parsing transport config")?
        }
        None => TransportConfig::default(),
    };
    if let Some(fragment) = cli.fragment {
        config.max_fragment_size = fragment.max(1);
    }
    let timeout = Duration::from_millis(cli.timeout_ms);
    let mode = if cli.deferred {
        CompletionMode::Deferred
    } else {
        CompletionMode::Inline
    };

    tracing::info!(
        messages = cli.messages,
        size = cli.size,
        fragment = config.max_fragment_size,
        ?mode,
        "loopback-node starting"
    );

    let engine = LoopbackEngine::with_delivery_unit(cli.delivery_unit);
    let pair = connect_pair(engine, config.clone(), mode).context("opening transports")?;
    if !pair.wait_connected(timeout) {
        bail!(
            "association did not come up (1: {}, 2: {})",
            pair.a.transport.state(),
            pair.b.transport.state()
        );
    }
    tracing::info!("association established");

    pair.a.transport.send(Message::text(1, "Hello from 1"))?;
    pair.b.transport.send(Message::text(1, "Hello from 2"))?;

    let greeting = pair.b.next_message(timeout).context("side 2 got no greeting")?;
    println!("Received 2: {}", greeting.as_text().unwrap_or("<binary>"));
    let greeting = pair.a.next_message(timeout).context("side 1 got no greeting")?;
    println!("Received 1: {}", greeting.as_text().unwrap_or("<binary>"));

    let size = cli.size.min(config.max_message_size);
    for i in 0..cli.messages {
        let payload: Vec<u8> = (0..size).map(|j| (i + j) as u8).collect();
        pair.a.transport.send(Message::binary(2, payload))?;
    }
    for i in 0..cli.messages {
        let message = pair
            .b
            .next_message(timeout)
            .with_context(|| format!("binary message {i} never arrived"))?;
        let intact = message.len() == size
            && message
                .payload
                .iter()
                .enumerate()
                .all(|(j, b)| *b == (i + j) as u8);
        if !intact {
            bail!("binary message {i} corrupted ({} bytes)", message.len());
        }
    }
    tracing::info!(count = cli.messages, size, "binary messages verified");

    let stats = serde_json::json!({
        "side1": pair.a.transport.stats(),
        "side2": pair.b.transport.stats(),
        "packets_1_to_2": pair.a.outbound.packets_carried(),
        "packets_2_to_1": pair.b.outbound.packets_carried(),
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);

    pair.a.transport.shutdown();
    pair.b.transport.shutdown();
    Ok(())
}
