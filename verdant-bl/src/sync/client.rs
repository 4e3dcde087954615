//! External regulatory API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use verdant_common::config::RegulatorConfig;

use crate::error::{LifecycleError, Result};
use crate::models::PhaseChangeJob;

const USER_AGENT: &str = concat!("verdant-bl/", env!("CARGO_PKG_VERSION"));

/// Regulator answer to a phase-change report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReceipt {
    pub success: bool,
    #[serde(default)]
    pub confirmation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Sends phase changes to the compliance-tracking system
#[async_trait]
pub trait RegulatoryClient: Send + Sync {
    async fn report_phase_change(&self, job: &PhaseChangeJob) -> Result<SyncReceipt>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhaseChangeRequest<'a> {
    batch_id: String,
    external_batch_id: &'a str,
    from_phase: &'static str,
    to_phase: &'static str,
    timestamp: String,
}

/// JSON-over-HTTP regulator client
pub struct HttpRegulatoryClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRegulatoryClient {
    /// `request_timeout` bounds each call; the worker applies its own bound too
    pub fn new(config: &RegulatorConfig, request_timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| LifecycleError::ExternalSyncFailure(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn phase_change_url(&self, external_batch_id: &str) -> String {
        format!("{}/batches/{}/phase-changes", self.base_url, external_batch_id)
    }
}

#[async_trait]
impl RegulatoryClient for HttpRegulatoryClient {
    async fn report_phase_change(&self, job: &PhaseChangeJob) -> Result<SyncReceipt> {
        let body = PhaseChangeRequest {
            batch_id: job.batch_id.to_string(),
            external_batch_id: &job.external_batch_id,
            from_phase: job.from_phase.as_str(),
            to_phase: job.to_phase.as_str(),
            timestamp: job.occurred_at.to_rfc3339(),
        };

        let mut request = self
            .http_client
            .post(self.phase_change_url(&job.external_batch_id))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LifecycleError::ExternalSyncFailure(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LifecycleError::ExternalSyncFailure(format!(
                "regulator returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        response
            .json::<SyncReceipt>()
            .await
            .map_err(|e| LifecycleError::ExternalSyncFailure(format!("invalid response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let config = RegulatorConfig {
            base_url: "https://regulator.example/api/".to_string(),
            api_key: None,
        };
        let client = HttpRegulatoryClient::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.phase_change_url("EXT-1"),
            "https://regulator.example/api/batches/EXT-1/phase-changes"
        );
    }

    #[test]
    fn test_receipt_parses_camel_case() {
        let receipt: SyncReceipt =
            serde_json::from_str(r#"{"success":true,"confirmationId":"C-42"}"#).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.confirmation_id.as_deref(), Some("C-42"));
    }
}
