//! Scripted two-client demo: pairs two in-process clients and drives them
//! through the full session - enter, five windows, tissue pull, ending.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use tandem::model::{Episode, WINDOW_COUNT};
use tandem::{Client, ClientInput, Config, SessionEvent, Store};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Scripted two-client demo of the tandem session engine")]
struct Cli {
    /// Directory containing an optional config.toml
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "tandem=debug,tandem_store=debug"
    } else {
        "tandem=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let file_config: tandem::config::FileConfig = tandem::config::load_config(&cli.config_dir)
        .extract()
        .context("failed to load configuration")?;
    let config = Config::from_file(&file_config);

    let store = Store::new();
    let first = tokio::spawn(drive_client("ada", Client::new(store.clone(), config.clone())));
    let second = tokio::spawn(drive_client("bea", Client::new(store.clone(), config.clone())));

    let (first, second) = tokio::try_join!(first, second)?;
    first?;
    second?;
    info!("both clients reached the ending");
    Ok(())
}

/// React to session events the way a player would: enter when asked, click
/// every window, hold and tug until the tissue comes out.
async fn drive_client(name: &'static str, client: Client) -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(async move { client.run(input_rx, event_tx).await });

    let mut holding = false;
    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::PairingStarted { client } => {
                info!(player = name, id = %client, "looking for a partner");
            }
            SessionEvent::Paired { room, partner, role } => {
                info!(player = name, %room, %partner, ?role, "paired");
            }
            SessionEvent::EpisodeEntered { episode } => {
                info!(player = name, stage = %episode, "stage entered");
                match episode {
                    Episode::Opening => input_tx.send(ClientInput::Enter).await?,
                    Episode::Lights => {
                        for index in 0..WINDOW_COUNT {
                            input_tx.send(ClientInput::WindowClick { index }).await?;
                        }
                    }
                    Episode::Tissue => {
                        holding = true;
                        input_tx.send(ClientInput::PointerDown).await?;
                        input_tx.send(ClientInput::PointerMove { x: 960.0, y: 540.0 }).await?;
                    }
                    Episode::Ending => break,
                }
            }
            SessionEvent::WindowsChanged { windows_off, .. } => {
                info!(player = name, windows_off, "windows updated");
            }
            SessionEvent::PartnerHoldingChanged { holding: partner_holding } => {
                if partner_holding && holding {
                    // the partner may have pressed after us; press again so
                    // both sides see each other holding, then tug
                    input_tx.send(ClientInput::PointerDown).await?;
                    input_tx.send(ClientInput::PointerMove { x: 960.0, y: 540.0 }).await?;
                }
            }
            SessionEvent::ProgressChanged { progress } => {
                if holding && progress < 100.0 {
                    input_tx.send(ClientInput::PointerMove { x: 960.0, y: 540.0 }).await?;
                }
            }
            SessionEvent::TissueCompleted => {
                holding = false;
                input_tx.send(ClientInput::PointerUp).await?;
                info!(player = name, "tissue pulled out");
            }
            SessionEvent::PartnerCursorMoved { .. }
            | SessionEvent::PartnerLeft
            | SessionEvent::SessionEnded { .. } => {}
        }
    }

    // Closing the input channel ends the session run.
    drop(input_tx);
    match session.await? {
        Ok(outcome) => info!(player = name, ?outcome, "session closed"),
        Err(e) => {
            warn!(player = name, error = %e, "session failed");
            return Err(e.into());
        }
    }
    Ok(())
}
