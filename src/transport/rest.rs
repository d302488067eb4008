use crate::credential::Credential;
use crate::error::{Error, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const SDP_CONTENT_TYPE: &str = "application/sdp";
const ERROR_BODY_MAX_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRequest {
    pub model: String,
    pub voice: String,
}

/// Short-lived secret as returned by the session endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    pub expires_at: Option<u64>,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An adapter for the Realtime REST endpoints used to set up a WebRTC call.
///
/// No request timeout is configured; callers that need bounded latency wrap the
/// returned futures themselves.
#[derive(Clone, Debug)]
pub struct RealtimeRestAdapter {
    client: Client,
}

impl RealtimeRestAdapter {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new() -> Result<Self> {
        Self::with_pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn with_pool_idle_timeout(pool_idle_timeout: Duration) -> Result<Self> {
        let client = Client::builder().pool_idle_timeout(pool_idle_timeout).build()?;
        Ok(Self { client })
    }

    /// Request a session secret. One request, no retries.
    ///
    /// # Errors
    /// `NegotiationFailed` on a non-success status, `MalformedResponse` when the body
    /// carries no secret, `Http` on transport errors.
    pub async fn create_session(
        &self,
        url: &str,
        credential: &Credential,
        request: &SessionRequest,
    ) -> Result<ClientSecret> {
        let res = self
            .client
            .post(url)
            .header(AUTHORIZATION, bearer(credential.expose())?)
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = error_body(res).await;
            tracing::warn!(status = status.as_u16(), "session negotiation rejected");
            return Err(Error::NegotiationFailed { status: status.as_u16(), body });
        }

        let text = res.text().await?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| Error::MalformedResponse(format!("body is not JSON: {e}")))?;
        extract_client_secret(&json)
            .ok_or_else(|| Error::MalformedResponse("missing client_secret.value".to_string()))
    }

    /// Post the local SDP offer and return the answer SDP.
    ///
    /// # Errors
    /// `SignalingFailed` on a non-success status, `Http` on transport errors.
    pub async fn post_sdp_offer(
        &self,
        url: &str,
        model: &str,
        token: &str,
        sdp_offer: &str,
    ) -> Result<String> {
        let mut url = Url::parse(url)?;
        url.query_pairs_mut().append_pair("model", model);

        let res = self
            .client
            .post(url)
            .header(AUTHORIZATION, bearer(token)?)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(sdp_offer.to_owned())
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = error_body(res).await;
            tracing::warn!(status = status.as_u16(), "SDP offer rejected");
            return Err(Error::SignalingFailed { status: status.as_u16(), body });
        }

        Ok(res.text().await?)
    }
}

#[allow(clippy::result_large_err)]
fn bearer(secret: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {secret}"))?;
    value.set_sensitive(true);
    Ok(value)
}

async fn error_body(res: Response) -> String {
    let body = res.text().await.unwrap_or_default();
    crate::safe_truncate(&body, ERROR_BODY_MAX_BYTES).into_owned()
}

/// Accepts both the sessions shape (`client_secret.value`) and the
/// client_secrets shape (top-level `value`).
fn extract_client_secret(json: &Value) -> Option<ClientSecret> {
    let holder = json.get("client_secret").filter(|v| v.is_object()).unwrap_or(json);
    let value = holder.get("value")?.as_str()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(ClientSecret {
        value: value.to_string(),
        expires_at: holder.get("expires_at").and_then(Value::as_u64),
    })
}
