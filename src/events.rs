//! Event publishing. Events go to NATS when a broker is configured,
//! otherwise they are only logged.

use crate::domain::DomainEvent;

#[derive(Clone)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    pub fn disabled() -> Self {
        Self { nats: None }
    }

    /// Publish failures are logged, never propagated; events are advisory.
    pub async fn publish(&self, event: &DomainEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event");
                return;
            }
        };
        match &self.nats {
            Some(client) => {
                if let Err(e) = client.publish(event.subject().to_string(), payload.into()).await {
                    tracing::warn!(subject = event.subject(), error = %e, "event publish failed");
                }
            }
            None => tracing::debug!(subject = event.subject(), "event (no broker configured)"),
        }
    }
}
