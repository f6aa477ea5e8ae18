mod config;
mod logging;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::json;
use signaling_core::{PeerConnectionSummary, Revisioned, TransportEvent, Update};
use signaling_session::LoopbackSession;
use signaling_transport::spawn_transport;
use tokio::{task::JoinHandle, time::timeout};
use tracing::{error, info, warn};

use config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(message) = run(config).await {
        error!(%message, "smoke run failed");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), String> {
    let revision = Arc::new(AtomicU64::new(1));
    let participant_revision = Arc::clone(&revision);
    let session = LoopbackSession::new();

    let handle = spawn_transport(
        config.transport_config(),
        move || Revisioned::new(participant_revision.load(Ordering::SeqCst)),
        |ctx| session.attach(ctx),
    );
    let printer = print_events(handle.subscribe());

    let early = handle
        .publish(local_update(&revision, "pc-1"))
        .await
        .map_err(|err| err.to_string())?
        .ok_or("transport refused an update while connecting")?;

    session.info(json!({ "type": "update", "participant": { "revision": 1 } }));
    session.accept(json!({
        "type": "connected",
        "sid": "RM00000000000000000000000000000000",
        "participant": { "sid": "PA00000000000000000000000000000000", "revision": 1 }
    }));
    report("queued update", early.outcome().await);

    if handle.sync().await.map_err(|err| err.to_string())? {
        session.info(json!({ "type": "update", "peer_connections": [] }));
        session.info(json!({ "type": "synced", "participant": { "revision": 2 } }));
    }

    session.respond_with([503, 500]);
    let retried = handle
        .publish(local_update(&revision, "pc-2"))
        .await
        .map_err(|err| err.to_string())?
        .ok_or("transport refused an update while connected")?;
    report("retried update", retried.outcome().await);

    session.info(json!({ "type": "disconnected", "status": "completed" }));

    match timeout(Duration::from_secs(5), printer).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(format!("event printer failed: {err}")),
        Err(_) => return Err("transport never reported a disconnect".to_owned()),
    }

    info!(
        requests = session.requests().len(),
        handshakes = session.handshakes().len(),
        closed = session.is_closed(),
        "smoke run finished"
    );
    Ok(())
}

fn local_update(revision: &AtomicU64, peer_connection: &str) -> Update {
    let next = revision.fetch_add(1, Ordering::SeqCst) + 1;
    Update::default()
        .with_participant(Revisioned::new(next).with_field("tracks", json!([])))
        .with_peer_connections(vec![
            PeerConnectionSummary::new(peer_connection)
                .with_description(Revisioned::new(next).with_field("type", "offer")),
        ])
}

fn report<E: std::fmt::Display>(label: &str, outcome: Result<(), E>) {
    match outcome {
        Ok(()) => info!(label, "publish delivered"),
        Err(err) => warn!(label, error = %err, "publish failed"),
    }
}

/// Print every event as one JSON line until the terminal disconnect.
fn print_events(mut events: signaling_core::EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to encode event"),
            }
            if matches!(event, TransportEvent::Disconnected { .. }) {
                break;
            }
        }
    })
}
