use anyhow::{Result, bail};
use tokio::signal;

use yticker::TickerClient;

mod stream_logic;
use stream_logic::{config, logger};

/// Resolves when the process is asked to stop.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                Ok("Ctrl-C")
            }
            _ = term_signal.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("Ctrl-C")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let symbols = config.symbols();
    if symbols.is_empty() {
        bail!("No symbols configured. Pass --symbols or set YTICKER_SYMBOLS.");
    }

    let client = TickerClient::new(config.to_client_config());
    let mut quotes = client.subscribe(symbols.clone(), None).await?.listen();
    log::info!("Streaming {} symbols from {}", symbols.len(), client.config().endpoint);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            reason = &mut shutdown => {
                log::info!("{} received, initiating shutdown.", reason?);
                break;
            }
            quote = quotes.recv() => match quote {
                Some(record) => println!("{}", record.to_json()),
                None => {
                    log::warn!("Quote stream ended.");
                    break;
                }
            },
        }
    }

    client.unsubscribe().await;
    log::info!("Shutdown complete. Frame stats: {}", serde_json::to_string(&client.stats())?);
    Ok(())
}
