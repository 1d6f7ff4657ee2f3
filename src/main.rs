// mirror - operator front end for the mirrorlink client

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mirrorlink::api::HttpArchiveClient;
use mirrorlink::cooldown::TrackerEvent;
use mirrorlink::pairing::PairingAnnouncement;
use mirrorlink::storage::SledSecretStore;
use mirrorlink::sync::{ConnectionStatus, ReconnectPolicy};
use mirrorlink::transport::WebSocketConnector;
use mirrorlink::{ClientConfig, MirrorClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "mirrorlink=info,mirror=info";
const WATCH_RETRIES: u32 = 8;

/// Remote control client for a headless agent CLI
#[derive(Parser, Debug)]
#[command(name = "mirror", author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the secret store
    #[arg(long, default_value = ".mirrorlink")]
    data_dir: PathBuf,

    /// Transport endpoint (ws:// or wss://)
    #[arg(long)]
    server_url: Option<String>,

    /// HTTP API base URL
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Complete pairing from a scanned payload
    Pair { payload: String },
    /// Show pairing status
    Status,
    /// Connect and log every update until Ctrl-C
    Watch {
        /// Entity ids to subscribe to
        #[arg(long = "subscribe")]
        subscribe: Vec<String>,
        /// Retry with backoff when the connection drops
        #[arg(long)]
        reconnect: bool,
    },
    /// Archive a session whose revival failed
    Archive {
        session: String,
        #[arg(long, default_value = "revival failed")]
        reason: String,
    },
    /// Forget the pairing and all key material
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = ClientConfig::default();
    if let Some(url) = cli.server_url {
        config = config.with_server_url(url);
    }
    if let Some(url) = cli.api_url {
        config = config.with_api_url(url);
    }
    if let Command::Watch { reconnect: true, .. } = &cli.command {
        config = config.with_reconnect(ReconnectPolicy::exponential(WATCH_RETRIES));
    }

    let store = SledSecretStore::open(&cli.data_dir)
        .with_context(|| format!("opening secret store at {}", cli.data_dir.display()))?;
    let client = MirrorClient::new(config, Arc::new(store), Arc::new(WebSocketConnector::new()))?;

    match cli.command {
        Command::Pair { payload } => pair(&client, &payload),
        Command::Status => status(&client),
        Command::Watch { subscribe, .. } => watch(&client, &subscribe).await,
        Command::Archive { session, reason } => archive(&client, &session, &reason).await,
        Command::Logout => {
            client.pairing().logout()?;
            println!("Logged out");
            Ok(())
        }
    }
}

fn pair(client: &MirrorClient, payload: &str) -> Result<()> {
    let announcement = PairingAnnouncement::parse(payload)?;
    let peer_id = announcement.peer_id.clone();
    let own_key = client.pairing().complete(announcement)?;

    println!("Paired with {peer_id}");
    println!("Public key for the peer: {}", own_key.to_base64());
    println!("Fingerprint: {}", own_key.fingerprint());
    Ok(())
}

fn status(client: &MirrorClient) -> Result<()> {
    let Some(credentials) = client.pairing().credentials()? else {
        println!("Not paired");
        return Ok(());
    };
    let own_key = client.pairing().key_agreement().own_public_key()?;

    println!("Paired with {}", credentials.peer_id);
    if let Some(name) = credentials.peer_display_name {
        println!("Peer name: {name}");
    }
    if let Some(key) = own_key {
        println!("Own key fingerprint: {}", key.fingerprint());
    }
    println!("Server: {}", client.config().server_url);
    Ok(())
}

async fn archive(client: &MirrorClient, session: &str, reason: &str) -> Result<()> {
    let Some(token) = client.pairing().auth_token()? else {
        bail!("not paired; run `mirror pair` first");
    };
    let api = HttpArchiveClient::new(&client.config().api_url, token)?;
    client.tracker().on_local_failure_signal(session, reason);
    client.tracker().archive_failure(session, &api).await?;
    println!("Archived {session}");
    Ok(())
}

async fn watch(client: &MirrorClient, subscriptions: &[String]) -> Result<()> {
    let channel = client.channel();
    let events = channel.events();

    let mut status = events.subscribe_status();
    let mut errors = events.subscribe_errors();
    let mut sessions = events.subscribe_sessions();
    let mut messages = events.subscribe_messages();
    let mut updates = events.subscribe_updates();
    let mut tracker_events = client.tracker().subscribe();
    let tracking = client.track_cooldowns();

    for entity_id in subscriptions {
        channel.subscribe(entity_id).await?;
    }
    channel.connect_with_retry().await?;

    let reconnect = client.config().reconnect.is_enabled();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            event = status.recv() => match event {
                Ok(ConnectionStatus::Disconnected(reason)) => {
                    if reason.is_auth_rejected() {
                        error!("credentials rejected; pair again");
                        break;
                    }
                    if !reason.is_connection_lost() {
                        debug!(?reason, "disconnect event");
                        continue;
                    }
                    if !reconnect {
                        warn!(?reason, "connection lost");
                        break;
                    }
                    warn!(?reason, "connection lost; reconnecting");
                    if let Err(error) = channel.ensure_connected().await {
                        error!(%error, "reconnect failed");
                        break;
                    }
                }
                Ok(other) => info!(status = ?other, "connection"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status events lagged"),
                Err(RecvError::Closed) => break,
            },
            Ok(error) = errors.recv() => warn!(?error, "sync error"),
            Ok(session) = sessions.recv() => info!(session_id = %session.id, status = ?session.status, "session"),
            Ok(message) = messages.recv() => info!(session_id = %message.session_id, message_id = %message.message.id, "message"),
            Ok(update) = updates.recv() => info!(entity_id = %update.entity_id, kind = ?update.kind, "update"),
            Ok(event) = tracker_events.recv() => match event {
                TrackerEvent::CooldownStarted(cooldown) => info!(
                    source_id = %cooldown.source_id,
                    remaining_secs = client.tracker().remaining_seconds(),
                    reason = %cooldown.reason,
                    "revival paused"
                ),
                other => info!(event = ?other, "cooldown"),
            },
        }
    }

    channel.disconnect().await?;
    client.tracker().stop();
    tracking.abort();
    Ok(())
}
