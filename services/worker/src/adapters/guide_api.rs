//! services/worker/src/adapters/guide_api.rs
//!
//! HTTP client for the guide API's work-fetch and section-submit endpoints.

use super::{status_error, transport_error};
use crate::worker_loop::{Assignment, SectionUpload, UploadReceipt, WorkSource};
use async_trait::async_trait;
use guide_core::{Card, PortError, PortResult, SelectionSource, WorkItem};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Body of a successful `GET /api/work`.
#[derive(Debug, Deserialize)]
struct WorkEnvelope {
    selection: SelectionSource,
    tier: String,
    missing_sections: Vec<String>,
    #[serde(default)]
    existing_sections: BTreeMap<String, String>,
    card: Card,
}

impl From<WorkEnvelope> for Assignment {
    fn from(envelope: WorkEnvelope) -> Self {
        Assignment {
            item: WorkItem {
                card: envelope.card,
                tier: envelope.tier,
                selection: envelope.selection,
                missing_sections: envelope.missing_sections,
            },
            existing_sections: envelope.existing_sections,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct GuideApiClient {
    client: reqwest::Client,
    base_url: String,
    lang: Option<String>,
}

impl GuideApiClient {
    pub fn new(
        base_url: &str,
        lang: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            lang,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Prefers the API's `{message}` over the raw body.
fn api_error(status: StatusCode, body: &str) -> PortError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string());
    status_error("guide api", status, &message)
}

#[async_trait]
impl WorkSource for GuideApiClient {
    async fn next_assignment(&self, tier: &str) -> PortResult<Option<Assignment>> {
        let mut query = vec![("tier", tier)];
        if let Some(lang) = &self.lang {
            query.push(("lang", lang.as_str()));
        }

        let response = self
            .client
            .get(self.url("/api/work"))
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Guide API reports no work");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let envelope: WorkEnvelope = response.json().await.map_err(transport_error)?;
        Ok(Some(envelope.into()))
    }

    async fn submit(&self, upload: &SectionUpload) -> PortResult<UploadReceipt> {
        let response = self
            .client
            .post(self.url("/api/sections"))
            .json(upload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }
        response.json().await.map_err(transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_envelope_becomes_assignment() {
        let raw = r#"{
            "status": "ok",
            "selection": "mentions",
            "tier": "half",
            "missing_sections": ["mechanics", "conclusion"],
            "existing_sections": { "tldr": "Cheap ramp." },
            "card": {
                "uuid": "c1",
                "name": "Sol Ring",
                "mana_cost": "{1}",
                "lang": "en",
                "status": "public",
                "analysis": {
                    "format": "sectioned",
                    "sections": {
                        "tldr": {
                            "title": "TL;DR Summary",
                            "content": "Cheap ramp.",
                            "model_used": "ollama:llama3.1:latest",
                            "generated_at": "2025-01-01T00:00:00Z"
                        }
                    },
                    "status": { "state": "partial", "present": 1, "total": 6 }
                }
            }
        }"#;
        let envelope: WorkEnvelope = serde_json::from_str(raw).unwrap();
        let assignment = Assignment::from(envelope);

        assert_eq!(assignment.item.card.uuid, "c1");
        assert_eq!(assignment.item.card.name(), "Sol Ring");
        assert_eq!(assignment.item.selection, SelectionSource::Mentions);
        assert_eq!(assignment.item.missing_sections, vec!["mechanics", "conclusion"]);
        assert_eq!(assignment.existing_sections["tldr"], "Cheap ramp.");
    }

    #[test]
    fn api_errors_surface_server_message() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"status":"error","message":"Section key 'general' is reserved"}"#,
        );
        match err {
            PortError::Invalid(msg) => assert!(msg.ends_with("Section key 'general' is reserved")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            api_error(StatusCode::SERVICE_UNAVAILABLE, "down"),
            PortError::Unavailable(_)
        ));
    }

    #[test]
    fn upload_serializes_as_submission_body() {
        let upload = SectionUpload {
            uuid: "c1".into(),
            section_key: "tldr".into(),
            content: "Cheap ramp.".into(),
            title: "TL;DR Summary".into(),
            model_used: "ollama:llama3.1:latest".into(),
            tier: "half".into(),
        };
        let body = serde_json::to_value(&upload).unwrap();
        assert_eq!(body["section_key"], "tldr");
        assert_eq!(body["model_used"], "ollama:llama3.1:latest");
        assert_eq!(body["tier"], "half");
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = GuideApiClient::new("http://localhost:3000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/api/work"), "http://localhost:3000/api/work");
    }
}
