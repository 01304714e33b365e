//! iotws-monitor: watch and publish to AWS IoT topics over WebSocket.
//!
//! Usage: `iotws-monitor [config.toml|-] [topic...]`
//!
//! With `-` (or no argument) the config comes from `IOT_*` environment
//! variables. Inbound messages are printed to stdout as JSON lines; each
//! stdin line of the form `{"topic": ..., "message": ...}` is published.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use iotws_channel::{IotConfig, IotDriver, IotError, OutboundMessage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "iotws-monitor starting");

    // ── Load config ─────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let config = match args.next().as_deref() {
        None | Some("-") => IotConfig::from_env(),
        Some(path) => IotConfig::from_file(path)?,
    };
    let topics: Vec<String> = args.collect();

    let mut driver = IotDriver::new(config)?;

    // ── Subscriptions ───────────────────────────────────────────
    for topic in &topics {
        let _ = driver.subscribe(topic);
    }
    let mut messages = driver.messages();
    tracing::info!(topics = topics.len(), "subscriptions registered");

    let mut state = driver.state();
    let mut errors = driver.errors();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(message) = messages.recv() => {
                println!("{}", serde_json::to_string(&message)?);
            }
            Ok(()) = state.changed() => {
                let current = *state.borrow_and_update();
                tracing::info!(state = ?current, "connection state changed");
            }
            Ok(error) = errors.recv() => {
                tracing::warn!(error = %error, "driver error");
                if matches!(error, IotError::Credentials(_)) {
                    // Credential failures leave the driver idle until asked.
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    driver.reconnect()?;
                }
            }
            line = stdin.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<OutboundMessage>(&line) {
                    Ok(message) => driver.send(message)?,
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed stdin line"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    driver.dispose();
    tracing::info!("iotws-monitor stopped");
    Ok(())
}
