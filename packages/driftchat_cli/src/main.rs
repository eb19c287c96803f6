//! Thin terminal front end for the driftchat core.
//!
//! Drives the exposed operations only: connect, pick a conversation,
//! send, and watch the observable state change. Not a UI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use driftchat_core::config::ClientConfig;
use driftchat_core::context::ChatContext;
use driftchat_core::model::{SendPayload, Session, UserProfile};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "driftchat")]
#[command(about = "Terminal client for the driftchat realtime core")]
struct Cli {
    /// User id to connect as (random when omitted)
    #[arg(long)]
    user_id: Option<String>,

    /// Display name for the session
    #[arg(long, default_value = "driftchat user")]
    name: String,

    /// Directory containing driftchat.toml
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Override the REST base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Override the realtime socket URL
    #[arg(long)]
    socket_url: Option<String>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "driftchat=debug,driftchat_core=debug,info"
    } else {
        "driftchat=info,driftchat_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config = ClientConfig::load(&cli.config_dir).context("loading configuration")?;
    if let Some(api_url) = cli.api_url {
        config.api.base_url = api_url;
    }
    if let Some(socket_url) = cli.socket_url {
        config.socket.url = socket_url;
    }

    let user_id = cli.user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let session = Session::new(UserProfile {
        id: user_id,
        full_name: cli.name,
        email: None,
        profile_pic: None,
    });
    info!(user = %session.user_id(), "starting driftchat session");

    let context = ChatContext::new(session, &config).context("building chat context")?;
    context.connect().await;

    if let Err(e) = context.store().load_partners().await {
        warn!(error = %e, "could not load conversation partners");
    }
    print_partners(&context);
    println!("commands: /peers /select <id> /online /status /quit, anything else sends");

    run_repl(&context).await?;

    context.shutdown().await;
    Ok(())
}

async fn run_repl(context: &ChatContext) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut store = context.store().watch();
    let mut health = context.connection().watch_health();
    // Messages already echoed to the terminal
    let mut printed = 0usize;
    let mut was_connected = context.health().connected;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    return Ok(());
                };
                if !handle_line(context, line.trim()).await {
                    return Ok(());
                }
            }
            changed = store.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = store.borrow_and_update().clone();
                if snapshot.messages.len() < printed {
                    // Conversation switched; the sequence restarted
                    printed = 0;
                }
                for message in &snapshot.messages[printed..] {
                    let text = message.text.as_deref().unwrap_or("[image]");
                    println!("[{}] {}: {}", message.created_at.format("%H:%M:%S"), message.sender_id, text);
                }
                printed = snapshot.messages.len();
                if let Some(error) = &snapshot.error {
                    println!("! {error}");
                }
            }
            changed = health.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = health.borrow_and_update().clone();
                match (current.connected, current.last_error.as_deref()) {
                    (true, _) => println!("* channel up"),
                    (false, Some(error)) => println!("* channel down: {error}"),
                    (false, None) => println!("* channel down"),
                }
                // A bounced channel needs the message listener rebound
                if current.connected && !was_connected {
                    context.resubscribe().await;
                }
                was_connected = current.connected;
            }
        }
    }
}

/// Returns false when the session should end.
async fn handle_line(context: &ChatContext, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/peers" => {
            if let Err(e) = context.store().load_partners().await {
                println!("! {e}");
            }
            print_partners(context);
        }
        "/online" => {
            let mut online: Vec<_> = context.presence().snapshot().into_iter().collect();
            online.sort();
            println!("{} online: {}", context.online_count(), online.join(", "));
        }
        "/status" => {
            let health = context.health();
            println!(
                "state: {:?}, connected: {}, last error: {}",
                context.state(),
                health.connected,
                health.last_error.as_deref().unwrap_or("none"),
            );
        }
        _ if line.starts_with("/select ") => {
            let peer = line.trim_start_matches("/select ").trim().to_string();
            context.select_conversation(Some(peer.clone())).await;
            println!("conversation: {peer}");
        }
        _ if line.starts_with('/') => {
            println!("unknown command: {line}");
        }
        text => {
            if let Err(e) = context.send(SendPayload::text(text)).await {
                println!("! {e}");
            }
        }
    }
    true
}

fn print_partners(context: &ChatContext) {
    let snapshot = context.snapshot();
    if snapshot.partners.is_empty() {
        println!("no conversation partners yet");
        return;
    }
    println!("partners:");
    for partner in &snapshot.partners {
        let badge = if context.presence().is_online(&partner.id) {
            "online"
        } else {
            "offline"
        };
        println!("  {} ({}) [{badge}]", partner.full_name, partner.id);
    }
}
