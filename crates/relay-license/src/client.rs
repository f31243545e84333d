//! HTTP client for the license server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fingerprint::hardware_fingerprint;
use crate::gate::{AccountInfo, LicenseDecision, LicenseGate};
use crate::{LicenseError, LicenseResult};

/// Every license call gives up after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    hardware_id: &'a str,
    groups_count: usize,
    cards_to_send: usize,
}

#[derive(Debug, Serialize)]
struct UsageRequest<'a> {
    hardware_id: &'a str,
    groups_used: usize,
    cards_sent: usize,
}

#[derive(Debug, Serialize)]
struct ActivateRequest<'a> {
    hardware_id: &'a str,
    activation_code: &'a str,
}

/// Loose view over every response body the server produces.
#[derive(Debug, Default, Deserialize)]
struct ServerReply {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    user: Option<AccountInfo>,
}

/// Result of a premium activation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    pub success: bool,
    pub message: String,
}

/// License server client bound to this machine's hardware id.
#[derive(Clone, Debug)]
pub struct LicenseClient {
    http_client: reqwest::Client,
    server_url: String,
    hardware_id: String,
}

impl LicenseClient {
    /// Create a client for `server_url` identifying as `hardware_id`.
    pub fn new(server_url: impl Into<String>, hardware_id: impl Into<String>) -> LicenseResult<Self> {
        let server_url = server_url.into().trim().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(LicenseError::Config(format!(
                "license server URL must be http(s): {server_url}"
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            server_url,
            hardware_id: hardware_id.into(),
        })
    }

    /// Create a client identifying with this machine's fingerprint.
    pub fn for_this_machine(server_url: impl Into<String>) -> LicenseResult<Self> {
        Self::new(server_url, hardware_fingerprint())
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// `GET /health`.
    pub async fn health(&self) -> LicenseResult<()> {
        let response = self.http_client.get(self.endpoint("/health")).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reply = read_reply(response).await;
        Err(LicenseError::Unavailable(
            reply
                .error
                .unwrap_or_else(|| format!("health check returned {}", status.as_u16())),
        ))
    }

    /// `POST /api/validate`. A non-200 answer is a denial, not an error.
    pub async fn validate(
        &self,
        channel_count: usize,
        item_count: usize,
    ) -> LicenseResult<LicenseDecision> {
        let body = ValidateRequest {
            hardware_id: &self.hardware_id,
            groups_count: channel_count,
            cards_to_send: item_count,
        };

        debug!(channel_count, item_count, "validating license");

        let response = self
            .http_client
            .post(self.endpoint("/api/validate"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let reply = read_reply(response).await;

        if status.as_u16() == 200 {
            Ok(LicenseDecision {
                allowed: true,
                reason: reply.message.unwrap_or_else(|| "License valid".to_string()),
                account: reply.user,
            })
        } else {
            Ok(LicenseDecision::deny(
                reply.error.unwrap_or_else(|| "License invalid".to_string()),
            ))
        }
    }

    /// `POST /api/usage`.
    pub async fn report_usage(&self, channels_used: usize, items_sent: usize) -> LicenseResult<()> {
        let body = UsageRequest {
            hardware_id: &self.hardware_id,
            groups_used: channels_used,
            cards_sent: items_sent,
        };

        let response = self
            .http_client
            .post(self.endpoint("/api/usage"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 200 {
            debug!(channels_used, items_sent, "usage reported");
            return Ok(());
        }

        let reply = read_reply(response).await;
        Err(LicenseError::Server {
            status: status.as_u16(),
            message: reply
                .error
                .unwrap_or_else(|| "usage update rejected".to_string()),
        })
    }

    /// `POST /api/activate` with the trimmed, upper-cased code.
    pub async fn activate(&self, activation_code: &str) -> LicenseResult<ActivationOutcome> {
        let code = activation_code.trim().to_uppercase();
        if code.is_empty() {
            return Err(LicenseError::Config("activation code is empty".to_string()));
        }

        let body = ActivateRequest {
            hardware_id: &self.hardware_id,
            activation_code: &code,
        };

        let response = self
            .http_client
            .post(self.endpoint("/api/activate"))
            .json(&body)
            .send()
            .await?;
        let reply = read_reply(response).await;

        let outcome = ActivationOutcome {
            success: reply.success.unwrap_or(false),
            message: reply
                .message
                .or(reply.error)
                .unwrap_or_else(|| "Unknown error".to_string()),
        };
        info!(success = outcome.success, "activation attempted");
        Ok(outcome)
    }
}

/// Body of a response, or an empty reply when it is not the expected JSON.
async fn read_reply(response: reqwest::Response) -> ServerReply {
    match response.json::<ServerReply>().await {
        Ok(reply) => reply,
        Err(err) => {
            debug!(error = %err, "license server reply was not JSON");
            ServerReply::default()
        }
    }
}

#[async_trait]
impl LicenseGate for LicenseClient {
    async fn authorize(&self, channel_count: usize, item_count: usize) -> LicenseDecision {
        if let Err(err) = self.health().await {
            warn!(error = %err, "license server health check failed");
            return LicenseDecision::deny(format!("license server unavailable: {err}"));
        }

        match self.validate(channel_count, item_count).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "license validation failed");
                LicenseDecision::deny(format!("license validation failed: {err}"))
            }
        }
    }

    async fn report_usage(&self, channels_used: usize, items_sent: usize) -> LicenseResult<()> {
        LicenseClient::report_usage(self, channels_used, items_sent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> LicenseClient {
        LicenseClient::new(server.base_url(), "abcd1234abcd1234").expect("client")
    }

    #[test]
    fn rejects_non_http_server_url() {
        let err = LicenseClient::new("ftp://licenses", "id").unwrap_err();
        assert!(matches!(err, LicenseError::Config(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = LicenseClient::new("http://127.0.0.1:8080/", "id").unwrap();
        assert_eq!(client.endpoint("/health"), "http://127.0.0.1:8080/health");
    }

    #[tokio::test]
    async fn validate_allowed_parses_account() {
        let server = MockServer::start_async().await;
        let validate = server.mock(|when, then| {
            when.method(POST)
                .path("/api/validate")
                .body_includes("\"hardware_id\":\"abcd1234abcd1234\"")
                .body_includes("\"groups_count\":3")
                .body_includes("\"cards_to_send\":10");
            then.status(200).json_body(json!({
                "message": "Licencia válida",
                "user": {"id": 7, "plan": "premium", "total_cards_sent": 120}
            }));
        });

        let decision = client_for(&server).validate(3, 10).await.expect("validate");

        validate.assert();
        assert!(decision.allowed);
        assert_eq!(decision.reason, "Licencia válida");
        let account = decision.account.expect("account");
        assert_eq!(account.plan, "premium");
        assert_eq!(account.total_cards_sent, 120);
    }

    #[tokio::test]
    async fn validate_non_200_is_denial_with_server_reason() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/validate");
            then.status(403)
                .json_body(json!({"error": "Plan FREE limitado a 5 grupos"}));
        });

        let decision = client_for(&server).validate(9, 1).await.expect("validate");

        assert!(!decision.allowed);
        assert_eq!(decision.reason, "Plan FREE limitado a 5 grupos");
        assert!(decision.account.is_none());
    }

    #[tokio::test]
    async fn validate_non_json_denial_uses_default_reason() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/validate");
            then.status(500).body("boom");
        });

        let decision = client_for(&server).validate(1, 1).await.expect("validate");

        assert!(!decision.allowed);
        assert_eq!(decision.reason, "License invalid");
    }

    #[tokio::test]
    async fn authorize_denies_when_health_fails() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/health");
            then.status(503).json_body(json!({"error": "maintenance"}));
        });
        let validate = server.mock(|when, then| {
            when.method(POST).path("/api/validate");
            then.status(200).json_body(json!({"message": "ok"}));
        });

        let decision = client_for(&server).authorize(2, 2).await;

        assert!(!decision.allowed);
        assert!(decision.reason.contains("maintenance"));
        assert_eq!(validate.calls(), 0);
    }

    #[tokio::test]
    async fn authorize_denies_when_server_unreachable() {
        let client = LicenseClient::new("http://127.0.0.1:1", "id").unwrap();

        let decision = client.authorize(1, 1).await;

        assert!(!decision.allowed);
        assert!(decision.reason.starts_with("license server unavailable"));
    }

    #[tokio::test]
    async fn authorize_runs_health_then_validate() {
        let server = MockServer::start_async().await;
        let health = server.mock(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        });
        let validate = server.mock(|when, then| {
            when.method(POST).path("/api/validate");
            then.status(200).json_body(json!({"message": "ok"}));
        });

        let decision = client_for(&server).authorize(2, 4).await;

        assert!(decision.allowed);
        health.assert();
        validate.assert();
    }

    #[tokio::test]
    async fn report_usage_posts_counters() {
        let server = MockServer::start_async().await;
        let usage = server.mock(|when, then| {
            when.method(POST)
                .path("/api/usage")
                .body_includes("\"groups_used\":3")
                .body_includes("\"cards_sent\":2");
            then.status(200).json_body(json!({"message": "ok"}));
        });

        client_for(&server)
            .report_usage(3, 2)
            .await
            .expect("usage accepted");

        usage.assert();
    }

    #[tokio::test]
    async fn report_usage_rejection_is_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/usage");
            then.status(400).json_body(json!({"error": "unknown hardware"}));
        });

        let err = client_for(&server).report_usage(1, 1).await.unwrap_err();

        match err {
            LicenseError::Server { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "unknown hardware");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn activate_sends_normalized_code() {
        let server = MockServer::start_async().await;
        let activate = server.mock(|when, then| {
            when.method(POST)
                .path("/api/activate")
                .body_includes("\"activation_code\":\"PREM-42\"");
            then.status(200)
                .json_body(json!({"success": true, "message": "Premium activado"}));
        });

        let outcome = client_for(&server)
            .activate("  prem-42 ")
            .await
            .expect("activate");

        activate.assert();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Premium activado");
    }

    #[tokio::test]
    async fn activate_rejects_empty_code_locally() {
        let server = MockServer::start_async().await;

        let err = client_for(&server).activate("   ").await.unwrap_err();

        assert!(matches!(err, LicenseError::Config(_)));
    }
}
