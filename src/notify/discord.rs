use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::HandlerInfo;
use crate::actors::messages::{AlertKind, CollectorAlert};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;

pub fn build_alert_embed(alert: &CollectorAlert) -> Embed {
    let (title, color, fields) = match &alert.kind {
        AlertKind::PoolSaturated { workers, load } => (
            "🔥 Collector Pool Saturated",
            RED,
            vec![
                EmbedField::inline("👷 Workers", workers),
                EmbedField::inline("📊 Load", format!("{:.1}%", load * 100.0)),
            ],
        ),
        AlertKind::PoolRecovered { workers, load } => (
            "✅ Collector Pool Recovered",
            GREEN,
            vec![
                EmbedField::inline("👷 Workers", workers),
                EmbedField::inline("📊 Load", format!("{:.1}%", load * 100.0)),
            ],
        ),
        AlertKind::WindowDiscarded {
            metric,
            start,
            count,
            ..
        } => (
            "⚠️ Aggregation Window Discarded",
            ORANGE,
            vec![
                EmbedField::inline("📈 Metric", metric),
                EmbedField::inline("🕒 Window Start", start.to_rfc3339()),
                EmbedField::inline("🔢 Samples", count),
            ],
        ),
    };

    Embed {
        title: Some(title.to_string()),
        description: Some(alert.kind.to_string()),
        color: Some(color),
        fields,
        timestamp: Some(alert.timestamp.to_rfc3339()),
    }
}

#[instrument(skip_all, fields(handler = %handler.name))]
pub async fn send_alert(client: &Client, handler: &HandlerInfo, alert: &CollectorAlert) -> Result<()> {
    let mut builder = MessageBuilder::new().add_embed(build_alert_embed(alert));
    if let Some(user_id) = &handler.user_id {
        builder = builder.content(format!("{} <@{user_id}>", alert.kind.title()));
    }

    let response = client
        .post(&handler.url)
        .json(&builder.build())
        .send()
        .await
        .context("failed to send Discord message")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Discord message failed with status {status}: {body}");
    }

    debug!("sent Discord message");
    Ok(())
}
