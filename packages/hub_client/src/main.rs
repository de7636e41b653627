use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hub_client::config::{ConfigOverrides, default_config_path, load_config};
use hub_client::{ConnectionState, HubClient, HubClientConfig, HubFileConfig};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Connect to a real-time hub, watch its events, send messages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hub base URL (e.g. https://example.com)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token (empty = unauthenticated)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Hub path appended to the base URL
    #[arg(long, global = true)]
    hub_path: Option<String>,

    /// Config file (defaults to ~/.config/hub/hub.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every hub event until Ctrl-C or the connection drops
    Listen,

    /// Send a chat message
    Send {
        /// Message text
        message: String,
    },

    /// Send a notification
    Notify {
        /// Notification text
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug { "hub=debug,hub_client=debug" } else { "hub_client=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = cli.config.clone().or_else(default_config_path);
    let overrides = ConfigOverrides {
        base_url: cli.base_url.clone(),
        token: cli.token.clone(),
        hub_path: cli.hub_path.clone(),
    };
    let file: HubFileConfig = load_config(config_path.as_deref(), &overrides)
        .extract()
        .context("Failed to load hub configuration")?;
    let config = HubClientConfig::from_file(&file)?;

    let client = HubClient::from_config(&config).context("Failed to create hub client")?;
    info!(url = %client.url(), "hub client ready");

    let result = match cli.command {
        Commands::Listen => listen(&client).await,
        Commands::Send { message } => async {
            connect(&client).await?;
            client
                .send(&message)
                .await
                .inspect_err(|e| warn!(code = e.error_code(), "hub send failed"))
                .context("Message was not delivered")
        }
        .await,
        Commands::Notify { message } => async {
            connect(&client).await?;
            client
                .notify(&message)
                .await
                .inspect_err(|e| warn!(code = e.error_code(), "hub notify failed"))
                .context("Notification was not delivered")
        }
        .await,
    };

    if let Err(e) = client.dispose().await {
        warn!(code = e.error_code(), error = %e, "hub client did not stop cleanly");
    }
    result
}

/// Start, printing events to stdout until Ctrl-C or the connection ends.
async fn listen(client: &HubClient) -> Result<()> {
    let mut events = client.subscribe();
    let mut state = client.watch_state();

    let cancel = CancellationToken::new();
    let start = client.start(cancel.clone());
    tokio::pin!(start);
    tokio::select! {
        result = &mut start => result
            .inspect_err(|e| warn!(code = e.error_code(), "hub start failed"))
            .context("Failed to connect to hub")?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            let _ = start.await;
            return Ok(());
        }
    }
    eprintln!("[hub: connected to {} -- Ctrl-C to exit]", client.url());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = state.wait_for(|s| *s != ConnectionState::Started) => {
                eprintln!("[hub: connection closed]");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn connect(client: &HubClient) -> Result<()> {
    client
        .start(CancellationToken::new())
        .await
        .inspect_err(|e| warn!(code = e.error_code(), "hub start failed"))
        .context("Failed to connect to hub")
}
