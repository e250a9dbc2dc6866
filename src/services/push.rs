//! WebSocket fan-out.
//!
//! A bus subscriber that translates events into `WsEnvelope` messages for
//! whatever socket layer fronts the worker, plus the server-side heartbeat.
//! The outbound channel is bounded; when a slow socket writer falls behind,
//! messages are dropped rather than blocking the fan-out loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::services::bus::{EventBus, EventFilter};
use crate::types::{Event, EventKind, WsEnvelope};

const OUTBOUND_BUFFER: usize = 256;

/// Envelope type for an event, per the push channel contract.
fn message_type(kind: EventKind) -> &'static str {
    match kind {
        EventKind::ReoptimizationTriggered
        | EventKind::ReoptimizationCompleted
        | EventKind::ReoptimizationFailed
        | EventKind::ReoptimizationRejected => "reoptimization",
        EventKind::RouteStarted | EventKind::StopCompleted => "route_update",
        _ => "event",
    }
}

/// Translate one bus event into its push envelope.
pub fn envelope_for(event: &Event) -> WsEnvelope {
    WsEnvelope::new(
        message_type(event.kind),
        serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
    )
}

/// Answer to a client text frame. Only pings get a reply.
#[allow(dead_code)]
pub fn handle_client_message(raw: &str) -> Option<WsEnvelope> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("ping") => Some(WsEnvelope::pong()),
        _ => None,
    }
}

/// Spawn the fan-out loop. Returns the outbound message stream the socket
/// layer drains.
pub fn spawn_push_gateway(
    bus: EventBus,
    heartbeat_interval: Duration,
    token: CancellationToken,
) -> mpsc::Receiver<WsEnvelope> {
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let subscription = bus.subscribe(EventFilter::all());

    tokio::spawn(async move {
        info!("Push fan-out started (heartbeat every {:?})", heartbeat_interval);
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let envelope = tokio::select! {
                _ = token.cancelled() => break,
                _ = heartbeat.tick() => WsEnvelope::heartbeat(),
                event = subscription.recv() => envelope_for(&event),
            };
            // A stalled socket writer loses messages instead of stalling us
            if tx.try_send(envelope).is_err() {
                debug!("Push buffer full, dropping outbound message");
            }
        }
        info!("Push fan-out stopped");
    });

    rx
}
