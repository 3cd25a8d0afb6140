//! Best-effort webhook delivery of appointment change events.
//!
//! The sink is an external collaborator: one HTTP POST per committed
//! mutation, no retries, and failures are logged and otherwise ignored.
//! Delivery outcome never feeds back into the store or the conversation.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::appointments::AppointmentChangeEvent;
use crate::errors::{AgentError, AgentResult};

/// Fire-and-forget sink for appointment change events.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl WebhookSink {
    /// Build a sink. With no endpoint configured the sink still drains
    /// events, it just drops them.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SinkDelivery`] on network failure or a non-2xx
    /// response. Callers on the mutation path must log and swallow this.
    pub async fn deliver(&self, event: &AppointmentChangeEvent) -> AgentResult<()> {
        let Some(ref endpoint) = self.endpoint else {
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| AgentError::SinkDelivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::SinkDelivery(format!(
                "webhook responded {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Spawn a task that drains the store's change-event channel into this
    /// sink for the life of the process. Failures are logged per event and
    /// never interrupt the drain.
    pub fn spawn_forwarder(
        self,
        mut events: mpsc::UnboundedReceiver<AppointmentChangeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = self.deliver(&event).await {
                    tracing::warn!(error = %e, kind = ?event.event, "webhook delivery failed");
                }
            }
            tracing::debug!("change-event channel closed, webhook forwarder exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::appointments::{AppointmentFields, AppointmentStore};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_event() -> AppointmentChangeEvent {
        let (mut store, mut rx) = AppointmentStore::new();
        store.create(AppointmentFields {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            date: "2024-09-01".to_string(),
            time: "3 PM".to_string(),
            doctor: "Dr. Smith".to_string(),
            clinic: "Downtown Clinic".to_string(),
        });
        rx.try_recv().unwrap()
    }

    #[tokio::test]
    async fn test_deliver_posts_event_and_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/appointments"))
            .and(body_partial_json(serde_json::json!({
                "event": "appointment_created",
                "payload": { "name": "Jane Doe" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(Some(format!("{}/hooks/appointments", server.uri())));
        sink.deliver(&sample_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_non_2xx_is_sink_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(Some(server.uri()));
        let err = sink.deliver(&sample_event()).await.unwrap_err();
        assert!(matches!(err, AgentError::SinkDelivery(_)));
    }

    #[tokio::test]
    async fn test_no_endpoint_drops_silently() {
        let sink = WebhookSink::new(None);
        sink.deliver(&sample_event()).await.unwrap();
    }
}
