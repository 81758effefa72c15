//! Periodic heartbeat from an agent to the DM.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_types::Message;
use sy_01_messaging::AgentMessagingApi;

/// Heartbeat message of an agent.
#[must_use]
pub fn heartbeat_message(messaging: &dyn AgentMessagingApi, ip_address: Option<&str>) -> Message {
    Message::NotifHeartbeat {
        application: messaging.application(),
        root_instance: messaging.root_instance(),
        ip_address: ip_address.map(str::to_string),
    }
}

/// Send a heartbeat now, then every `period`, until shutdown.
///
/// Send failures are logged; the next tick tries again.
pub fn spawn_heartbeat(
    messaging: Arc<dyn AgentMessagingApi>,
    period: Duration,
    ip_address: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let root = messaging.root_instance();
        info!(root = %root, period_secs = period.as_secs(), "[Agent] Heartbeat started");
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let message = heartbeat_message(messaging.as_ref(), ip_address.as_deref());
                    match messaging.send_message_to_the_dm(message).await {
                        Ok(()) => debug!(root = %root, "[Agent] Heartbeat sent"),
                        Err(e) => warn!(root = %root, error = %e, "[Agent] Heartbeat failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(root = %root, "[Agent] Heartbeat stopped");
    })
}
