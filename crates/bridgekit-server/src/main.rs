//! # bridgekit-server
//!
//! Runs a bridge with the demo connector over the in-process transport.
//!
//! On start the binary:
//! - loads configuration from the environment and the JSON state snapshot
//! - wires the bridge components and the demo connector
//! - performs a dry run: an admin user gets a management room and logs in,
//!   which creates a test room with one ghost, then a message from the
//!   admin's remote account is delivered through their double puppet
//!
//! It then waits for Ctrl-C and writes the snapshot back on the way out.

mod bridge;
mod commands;
mod config;
mod connector;
mod demo;
mod error;
mod events;
mod kit;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridgekit_matrix::{HttpFetcher, InMemoryTransport};
use bridgekit_shared::protocol::now_millis;
use bridgekit_shared::types::{ContentUri, EventId, UserId};
use bridgekit_shared::MessageContent;

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, BuildInfo};
use crate::connector::BridgeConnector;
use crate::demo::DemoConnector;
use crate::events::{LocalEvent, RemoteEvent};
use crate::kit::BridgeKit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bridgekit_server=debug")),
        )
        .init();

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = BridgeConfig::from_env(BuildInfo::current());
    info!("Starting {} {}", config.bridge_name, config.build);
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Wire components
    // -----------------------------------------------------------------------
    let transport = Arc::new(InMemoryTransport::new(&config.bot_localpart, &config.domain));
    let fetcher = Arc::new(HttpFetcher::new(config.media_timeout).context("building media client")?);
    let kit = BridgeKit::new(config, transport, fetcher);

    let connector = Arc::new(DemoConnector::new(&kit));
    let bridge = Bridge::new(kit.clone(), connector.clone()).with_room_event_handler(connector.clone());

    bridge.start().await.context("starting bridge")?;

    // -----------------------------------------------------------------------
    // 4. Dry run against the in-process transport
    // -----------------------------------------------------------------------
    dry_run(&bridge, connector.as_ref()).await?;

    info!("Bridge running. Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    bridge.stop().await.context("stopping bridge")?;
    Ok(())
}

async fn dry_run(bridge: &Bridge, connector: &DemoConnector) -> anyhow::Result<()> {
    let kit = bridge.kit();
    let admin_id = UserId::new("admin", &kit.config.domain);
    let admin = connector
        .get_user(&admin_id, true)
        .await
        .context("demo connector refused to create the admin user")?;

    let mut management = kit.rooms.new_room(kit.config.bridge_name.clone(), "Bridge management", Vec::new());
    let created = kit
        .rooms
        .create_room(&mut management, &admin, &ContentUri::default())
        .await
        .context("creating management room")?;
    connector.put_room(management).await;
    bridge
        .on_management_room_assigned(&admin_id, created.room_id.clone())
        .await
        .context("assigning management room")?;

    let login = LocalEvent::message(
        EventId(format!("$dry-run-{}", now_millis())),
        created.room_id.clone(),
        admin_id.clone(),
        MessageContent::text("login"),
    );
    bridge
        .on_local_room_event(login)
        .await
        .context("running login command")?;

    // The admin's own remote account echoes a message back.
    bridge
        .on_inbound_remote_event(RemoteEvent::Message {
            room_id: created.room_id.clone(),
            sender: admin_id,
            content: MessageContent::text("Sent from the remote network"),
            timestamp: None,
        })
        .await
        .context("delivering remote message")?;

    info!(room = %created.room_id, "Dry run complete");
    Ok(())
}
