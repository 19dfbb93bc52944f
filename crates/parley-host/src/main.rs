//! # parley-host
//!
//! Minimal host binary around the parley core. Stands in for a real UI
//! shell: it opens the durable log, seeds a user directory, and drives a
//! scripted two-user exchange while printing what the live subscriptions
//! emit.
//!
//! Environment:
//! - `PARLEY_DB` — path of the SQLite message log (default: the
//!   platform data directory)
//! - `RUST_LOG` — tracing filter (default `info`)
//! - plus the `PARLEY_*` core tunables (see `parley_core::CoreConfig`)

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_core::{ChatCore, CoreConfig};
use parley_shared::directory::InMemoryDirectory;
use parley_shared::types::UserId;
use parley_store::SqliteLog;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting parley host v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the durable log
    // -----------------------------------------------------------------------
    let config = CoreConfig::from_env();
    info!(?config, "Loaded configuration");

    let log = match std::env::var("PARLEY_DB") {
        Ok(path) => SqliteLog::open_at(std::path::Path::new(&path))?,
        Err(_) => SqliteLog::new()?,
    };

    // -----------------------------------------------------------------------
    // 3. Seed the user directory and build the core
    // -----------------------------------------------------------------------
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    directory.register(alice.clone(), "Alice");
    directory.register(bob.clone(), "Bob");

    let core = ChatCore::new(log, directory, config);

    // -----------------------------------------------------------------------
    // 4. Scripted exchange over live subscriptions
    // -----------------------------------------------------------------------
    let conversation = core.open_direct(&alice, &bob)?;
    info!(%conversation, "direct conversation open");

    let mut bob_screen = core.subscribe_conversation(conversation, &bob)?;
    let mut alice_list = core.subscribe_conversation_list(&alice);
    let mut watching_bob = core.subscribe_presence(&bob);

    core.connect(&alice);
    core.connect(&bob);
    info!(state = ?watching_bob.recv().await?, "presence update");

    for body in ["hi", "there"] {
        let message = core.send(conversation, &alice, body).await?;
        info!(
            seq = message.seq,
            delivery = ?message.delivery,
            body = %message.body,
            "sent"
        );
    }

    while let Some(message) = bob_screen.try_recv() {
        info!(seq = message.seq, body = %message.body, "bob's screen");
    }
    let mut latest = None;
    while let Some(snapshot) = alice_list.try_recv() {
        latest = Some(snapshot);
    }
    if let Some(snapshot) = latest {
        for conv in &snapshot {
            let last = conv.last_message.as_ref().map(|m| m.body.as_str());
            info!(conversation = %conv.id, last = ?last, "alice's list");
        }
    }

    for message in core.history(conversation)? {
        info!(seq = message.seq, sender = %message.sender, body = %message.body, "history");
    }

    core.disconnect(&alice);
    core.disconnect(&bob);
    core.shutdown();
    info!("done");
    Ok(())
}
