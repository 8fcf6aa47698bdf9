use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::SINK_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::types::Notification;

/// Delivers a composed notification. Callers log failures; nothing retries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Discord webhook wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl From<&Notification> for WebhookPayload {
    fn from(n: &Notification) -> Self {
        let embed = Embed {
            title: n.title.clone(),
            url: n.url.clone(),
            description: n.description.clone(),
            color: n.color,
            timestamp: n.timestamp.to_rfc3339(),
            fields: n
                .sections
                .iter()
                .map(|s| EmbedField {
                    name: s.name.clone(),
                    value: s.value.clone(),
                    inline: false,
                })
                .collect(),
            thumbnail: n.thumbnail.clone().map(|url| EmbedUrl { url }),
            footer: n.footer.clone().map(|text| EmbedFooter { text }),
        };
        Self { embeds: vec![embed] }
    }
}

pub struct DiscordWebhook {
    client: reqwest::Client,
    url: String,
}

impl DiscordWebhook {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SINK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let payload = WebhookPayload::from(notification);
        let resp = self.client.post(&self.url).json(&payload).send().await?;

        let status = resp.status();
        if status.is_success() {
            debug!(status = status.as_u16(), title = %notification.title, "webhook accepted");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AppError::Delivery(format!("webhook returned HTTP {status}: {body}")))
    }
}
