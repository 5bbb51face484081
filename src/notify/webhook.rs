use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use super::HandlerInfo;
use crate::actors::messages::CollectorAlert;

#[instrument(skip_all, fields(handler = %handler.name))]
pub async fn send_alert(client: &Client, handler: &HandlerInfo, alert: &CollectorAlert) -> Result<()> {
    let payload = json!({
        "title": alert.kind.title(),
        "message": alert.kind.to_string(),
        "alert": alert.kind,
        "timestamp": alert.timestamp.to_rfc3339(),
    });

    let response = client
        .post(&handler.url)
        .json(&payload)
        .send()
        .await
        .context("failed to send webhook alert")?;

    if !response.status().is_success() {
        anyhow::bail!("webhook alert failed with status: {}", response.status());
    }

    debug!("sent webhook alert");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::messages::AlertKind;
    use crate::notify::HandlerKind;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_payload_carries_alert_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "title": "Aggregation window discarded",
                "alert": { "type": "window_discarded", "metric": "cpu.load", "count": 7 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let handler = HandlerInfo {
            kind: HandlerKind::Webhook,
            name: "pager".to_string(),
            url: server.uri(),
            user_id: None,
            smtp: None,
        };
        let alert = CollectorAlert::new(AlertKind::WindowDiscarded {
            metric: "cpu.load".to_string(),
            start: Utc::now(),
            count: 7,
            error: "store offline".to_string(),
        });

        send_alert(&Client::new(), &handler, &alert).await.unwrap();
    }
}
