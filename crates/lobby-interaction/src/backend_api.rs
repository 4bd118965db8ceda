//! Reqwest-backed visit API client.
//!
//! Thin HTTP layer over the backend's visitor endpoints. Request and
//! response bodies are camelCase JSON; every call carries an explicit
//! per-request timeout. Transport failures map to `Network`, non-success
//! statuses to `Api` with the response body as the message.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use lobby_core::identity::VisitorIdentity;
use lobby_core::visit::{ValidateResponse, VisitApi, VisitPatch, VisitStatus};
use lobby_core::{LobbyError, Result};

/// Deadline for ordinary calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Initialize may create backend records; give it longer.
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);
/// Final sends race page teardown; giving up fast beats hanging.
const FINAL_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP implementation of [`VisitApi`].
#[derive(Clone)]
pub struct VisitApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest<'a> {
    visitor_id: &'a str,
    session_id: &'a str,
    token: &'a str,
    chat_room_id: &'a str,
}

/// Status mutations put identity fields next to the flattened patch, so
/// the body reads `{visitorId, sessionId, companyId, ...changed fields}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    visitor_id: &'a str,
    session_id: &'a str,
    company_id: &'a str,
    #[serde(flatten)]
    patch: &'a VisitPatch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    visitor_id: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

impl VisitApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a status mutation and checks the `{success}` ack.
    async fn post_status(
        &self,
        identity: &VisitorIdentity,
        company_id: &str,
        patch: &VisitPatch,
        timeout: Duration,
    ) -> Result<()> {
        let request = StatusRequest {
            visitor_id: &identity.visitor_id,
            session_id: &identity.session_id,
            company_id,
            patch,
        };

        let response = self
            .client
            .post(self.url("/api/visitor/update-status"))
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("status update failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LobbyError::api(status.as_u16(), error_text));
        }

        let ack = response
            .json::<AckResponse>()
            .await
            .map_err(|e| LobbyError::network(format!("status ack unreadable: {e}")))?;
        if !ack.success {
            return Err(LobbyError::api(status.as_u16(), "backend reported failure"));
        }
        Ok(())
    }

    async fn fetch_token(&self, path: &str, request: &TokenRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(self.url(path))
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LobbyError::api(status.as_u16(), error_text));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| LobbyError::network(format!("token response unreadable: {e}")))?;
        Ok(token.token)
    }
}

#[async_trait]
impl VisitApi for VisitApiClient {
    async fn validate(&self, token: &str, domain: &str) -> Result<ValidateResponse> {
        let response = self
            .client
            .get(self.url("/api/visitor/validate"))
            .query(&[("token", token), ("domain", domain)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("validate failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LobbyError::api(status.as_u16(), error_text));
        }

        response
            .json::<ValidateResponse>()
            .await
            .map_err(|e| LobbyError::network(format!("validate response unreadable: {e}")))
    }

    async fn initialize(
        &self,
        identity: &VisitorIdentity,
        token: &str,
        chat_room_id: &str,
    ) -> Result<VisitStatus> {
        let request = InitializeRequest {
            visitor_id: &identity.visitor_id,
            session_id: &identity.session_id,
            token,
            chat_room_id,
        };

        let response = self
            .client
            .post(self.url("/api/visitor/initialize"))
            .json(&request)
            .timeout(INITIALIZE_TIMEOUT)
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("initialize failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LobbyError::api(status.as_u16(), error_text));
        }

        response
            .json::<VisitStatus>()
            .await
            .map_err(|e| LobbyError::network(format!("initialize response unreadable: {e}")))
    }

    async fn update_status(
        &self,
        identity: &VisitorIdentity,
        company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()> {
        self.post_status(identity, company_id, patch, REQUEST_TIMEOUT)
            .await
    }

    async fn send_final_status(
        &self,
        identity: &VisitorIdentity,
        company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()> {
        // Beacon-style delivery: same endpoint, short deadline, one shot.
        self.post_status(identity, company_id, patch, FINAL_SEND_TIMEOUT)
            .await
    }

    async fn current_status(&self, identity: &VisitorIdentity) -> Result<VisitStatus> {
        let response = self
            .client
            .get(self.url("/api/visitor/current-status"))
            .query(&[
                ("visitorId", identity.visitor_id.as_str()),
                ("sessionId", identity.session_id.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("current-status failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LobbyError::api(status.as_u16(), error_text));
        }

        response
            .json::<VisitStatus>()
            .await
            .map_err(|e| LobbyError::network(format!("current-status response unreadable: {e}")))
    }

    async fn chat_token(&self, identity: &VisitorIdentity, company_id: &str) -> Result<String> {
        let request = TokenRequest {
            visitor_id: &identity.visitor_id,
            session_id: &identity.session_id,
            company_id: Some(company_id),
            room_id: None,
        };
        self.fetch_token("/api/chat/token", &request).await
    }

    async fn call_token(&self, identity: &VisitorIdentity, room_id: &str) -> Result<String> {
        let request = TokenRequest {
            visitor_id: &identity.visitor_id,
            session_id: &identity.session_id,
            company_id: None,
            room_id: Some(room_id),
        };
        self.fetch_token("/api/call/token", &request).await
    }
}
