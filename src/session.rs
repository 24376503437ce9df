//! A single authenticated attempt against the Xero API.

use std::time::Duration;

use reqwest::{StatusCode, header};
use serde::de::DeserializeOwned;
use tracing_error::SpanTrace;
use url::Url;

use crate::credential::Credential;
use crate::endpoints::XeroEndpoint;
use crate::error::{ApiErrorBody, Error, Result};
use crate::operation::Operation;

// Rate limiting headers used by the Xero API
/// Header containing number of remaining daily API calls
const HEADER_DAY_LIMIT_REMAINING: &str = "X-DayLimit-Remaining";
/// Header containing number of remaining per-minute API calls
const HEADER_MIN_LIMIT_REMAINING: &str = "X-MinLimit-Remaining";
/// Header containing number of remaining app-wide per-minute API calls
const HEADER_APP_MIN_LIMIT_REMAINING: &str = "X-AppMinLimit-Remaining";
/// Header identifying which rate limit was hit when a 429 is returned
const HEADER_RATE_LIMIT_PROBLEM: &str = "X-Rate-Limit-Problem";
const HEADER_TENANT_ID: &str = "Xero-tenant-id";

/// Information about the remaining API rate limits
///
/// Xero applies several rate limits to API usage:
/// - Daily limit: 5000 calls per day per tenant
/// - Minute limit: 60 calls per minute per tenant
/// - App minute limit: 10,000 calls per minute across all tenants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub day_limit_remaining: Option<u32>,
    pub minute_limit_remaining: Option<u32>,
    pub app_minute_limit_remaining: Option<u32>,
}

impl RateLimitInfo {
    fn from_response_headers(headers: &header::HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u32>().ok())
        };
        Self {
            day_limit_remaining: read(HEADER_DAY_LIMIT_REMAINING),
            minute_limit_remaining: read(HEADER_MIN_LIMIT_REMAINING),
            app_minute_limit_remaining: read(HEADER_APP_MIN_LIMIT_REMAINING),
        }
    }

    /// Returns true if any of the limits are close to being exhausted
    #[must_use]
    pub fn is_near_limit(&self) -> bool {
        self.day_limit_remaining.is_some_and(|v| v < 100)
            || self.minute_limit_remaining.is_some_and(|v| v < 10)
            || self.app_minute_limit_remaining.is_some_and(|v| v < 100)
    }
}

/// Outcome of one attempt that reached the API.
///
/// Transport failures never get here; they are `Err(Error::Network)`.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    Completed(T),
    /// 401: the presented access token is invalid or expired.
    Unauthorized { detail: String },
}

/// One credential bound to the shared HTTP client for the duration of an
/// attempt.
pub(crate) struct Session<'a> {
    http: &'a reqwest::Client,
    api_base: &'a Url,
    credential: Credential,
}

impl<'a> Session<'a> {
    pub(crate) fn new(http: &'a reqwest::Client, api_base: &'a Url, credential: Credential) -> Self {
        Self {
            http,
            api_base,
            credential,
        }
    }

    pub(crate) fn into_credential(self) -> Credential {
        self.credential
    }

    fn request(&self, operation: &Operation) -> Result<reqwest::RequestBuilder> {
        let url = operation.url(self.api_base)?;
        let mut request = self
            .http
            .request(operation.method.clone(), url)
            .bearer_auth(self.credential.access_token.secret())
            .header(header::ACCEPT, "application/json");
        // `/connections` is answered per token, not per tenant.
        if operation.endpoint != XeroEndpoint::Connections {
            request = request.header(HEADER_TENANT_ID, self.credential.tenant_id.to_string());
        }
        if let Some(since) = operation.if_modified_since_header() {
            request = request.header(header::IF_MODIFIED_SINCE, since);
        }
        if let Some(body) = &operation.body {
            request = request.json(body);
        }
        Ok(request)
    }

    #[instrument(skip(self, operation), fields(method = %operation.method, endpoint = %operation.endpoint))]
    pub(crate) async fn attempt<R: DeserializeOwned>(&self, operation: &Operation) -> Result<Attempt<R>> {
        let response = self.request(operation)?.send().await?;
        classify(response).await
    }
}

/// Sort a response into success, authorization failure, or remote error.
async fn classify<R: DeserializeOwned>(response: reqwest::Response) -> Result<Attempt<R>> {
    let status = response.status();
    let url = response.url().to_string();
    let rate_limit_info = RateLimitInfo::from_response_headers(response.headers());

    if rate_limit_info.is_near_limit() {
        warn!(
            day_remaining = ?rate_limit_info.day_limit_remaining,
            minute_remaining = ?rate_limit_info.minute_limit_remaining,
            app_minute_remaining = ?rate_limit_info.app_minute_limit_remaining,
            "approaching Xero API rate limits"
        );
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let rate_limit_problem = response
        .headers()
        .get(HEADER_RATE_LIMIT_PROBLEM)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let text = response.text().await?;
    debug!(%status, %url, bytes = text.len(), "response received");
    trace!("Response text:\n{}", text);

    if status.is_success() {
        return decode(&text).map(Attempt::Completed);
    }

    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        let detail = body
            .description()
            .or_else(|| body.code())
            .unwrap_or_else(|| "unauthorized".to_string());
        debug!(%detail, "access token rejected");
        return Ok(Attempt::Unauthorized { detail });
    }

    let code = if status == StatusCode::TOO_MANY_REQUESTS {
        rate_limit_problem.or_else(|| body.code())
    } else {
        body.code()
    };
    let message = body
        .description()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unexpected status").to_string());

    error!(%status, ?code, %message, %url, "xero returned an error");
    Err(Error::RemoteApi {
        status,
        code,
        message,
        retry_after,
        url: Some(url),
        span_trace: SpanTrace::capture(),
    })
}

/// Empty bodies (204, deletes) decode as JSON `null`.
fn decode<R: DeserializeOwned>(text: &str) -> Result<R> {
    let parsed = if text.trim().is_empty() {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_str(text)
    };
    parsed.map_err(|e| {
        error!(
            "Deserialization error: {}, near position: {} - response text around that position: {}",
            e,
            e.column(),
            text.chars().skip(e.column().saturating_sub(30)).take(100).collect::<String>()
        );
        Error::DeserializationError(e, Some(text.to_string()))
    })
}
