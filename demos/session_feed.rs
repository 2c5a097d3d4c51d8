//! Follow a single investigation session on a dashboard deployment.
//!
//! Subscribes to the dashboard-wide channel and to one session channel, prints events and
//! connection changes, and disconnects after a minute or on Ctrl-C.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,dashboard_realtime=debug cargo run --example session_feed -- http://localhost:8000 42
//! ```

use std::time::Duration;

use dashboard_realtime::types::{DASHBOARD_CHANNEL, session_channel};
use dashboard_realtime::ws::config::{HealthCheckConfig, QueueConfig};
use dashboard_realtime::{Client, Config, Endpoint, EventKind};
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let base = args
        .next()
        .unwrap_or_else(|| "http://localhost:8000".to_owned());
    let session_id = args.next().unwrap_or_else(|| "1".to_owned());
    let channel = session_channel(&session_id);

    let mut config = Config::default();
    config.queue = QueueConfig::default().with_priority_channel(channel.clone());
    config.health_check = Some(HealthCheckConfig::path("/health"));

    let client = Client::new(Endpoint::dashboard(base), config)?;

    let _state = client.on_connection_change(|state| {
        info!(status = %state.status(), ?state, "connection changed");
    });
    let _errors = client.on_error(|error| warn!(%error, "realtime error"));
    let _completed = client.on_event(EventKind::SessionCompleted, |event| {
        info!(session_id = ?event.session_id, "session completed");
    });
    let _dashboard = client.subscribe(DASHBOARD_CHANNEL, |event| {
        info!(channel = DASHBOARD_CHANNEL, kind = %event.kind, "dashboard update");
    })?;

    client.connect().await?;

    let mut events = Box::pin(client.subscribe_stream(&channel)?);
    let feed = async {
        while let Some(event) = events.next().await {
            info!(
                %channel,
                kind = %event.kind,
                id = ?event.id,
                payload = %serde_json::Value::Object(event.payload.clone()),
            );
        }
    };

    tokio::select! {
        _ = timeout(Duration::from_secs(60), feed) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    let diagnostics = client.diagnostics().await?;
    info!(?diagnostics, last_event_id = ?client.last_event_id(&channel));

    client.destroy().await?;
    Ok(())
}
