//! services/worker/src/adapters/discord.rs
//!
//! Posts a short embed to a Discord webhook after each processed card.

use super::{status_error, transport_error};
use async_trait::async_trait;
use chrono::Utc;
use guide_core::{GuideEvent, NotificationService, PortResult};
use serde_json::json;
use std::time::Duration;

const COLOR_OK: u32 = 0x00ff00;
const COLOR_PARTIAL: u32 = 0xffa500;

pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
    site_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, site_url: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            webhook_url,
            site_url: site_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn build_payload(&self, event: &GuideEvent) -> serde_json::Value {
        let submitted = if event.sections_submitted.is_empty() {
            "none".to_string()
        } else {
            event.sections_submitted.join(", ")
        };
        let providers = if event.providers.is_empty() {
            "none".to_string()
        } else {
            event
                .providers
                .iter()
                .map(|(provider, count)| format!("{} x{}", provider, count))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let color = if event.sections_failed == 0 {
            COLOR_OK
        } else {
            COLOR_PARTIAL
        };

        let mut embed = json!({
            "title": format!("Guide updated: {}", event.card_name),
            "color": color,
            "fields": [
                { "name": "Tier", "value": event.tier, "inline": true },
                { "name": "Sections", "value": submitted, "inline": false },
                { "name": "Failed", "value": event.sections_failed.to_string(), "inline": true },
                { "name": "Models", "value": providers, "inline": true },
            ],
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(site) = &self.site_url {
            embed["url"] = json!(format!("{}/card/{}", site, event.card_uuid));
        }
        json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl NotificationService for DiscordNotifier {
    async fn notify(&self, event: &GuideEvent) -> PortResult<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.build_payload(event))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("discord", status, &body));
        }
        Ok(())
    }
}
