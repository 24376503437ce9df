use std::time::Duration;

use miette::Diagnostic;
use oauth2::basic::BasicErrorResponseType;
use oauth2::{HttpClientError, RequestTokenError};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

/// Error body returned by the Xero token endpoint.
pub type OAuth2ErrorResponse = oauth2::basic::BasicErrorResponse;

pub(crate) type TokenRequestError =
    RequestTokenError<HttpClientError<reqwest::Error>, OAuth2ErrorResponse>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error body returned by the Xero REST API.
///
/// Accounting endpoints answer with `ErrorNumber`/`Type`/`Message`, while the
/// identity layer (401/403) answers with a problem document using
/// `Title`/`Status`/`Detail`. Both shapes land in this struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiErrorBody {
    pub error_number: Option<u64>,
    #[serde(rename = "Type")]
    pub error_type: Option<String>,
    pub message: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl ApiErrorBody {
    /// The most specific machine-readable code present in the body.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        self.error_type
            .clone()
            .or_else(|| self.title.clone())
            .or_else(|| self.error_number.map(|n| n.to_string()))
    }

    #[must_use]
    pub fn description(&self) -> Option<String> {
        self.message.clone().or_else(|| self.detail.clone())
    }
}

/// Errors that can occur while managing credentials or calling the Xero API.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The refresh token (or the freshly refreshed access token) was rejected.
    /// A human has to authorize the connection again.
    #[error("authorization expired for tenant {tenant_id}: {reason}")]
    #[diagnostic(
        code(xero_connector::auth_expired),
        help("Re-authorize the Xero connection for this tenant")
    )]
    AuthExpired {
        tenant_id: Uuid,
        reason: String,
        span_trace: SpanTrace,
    },

    #[error("no credential stored for tenant {tenant_id}")]
    #[diagnostic(
        code(xero_connector::not_connected),
        help("Complete the authorization-code flow for this tenant first")
    )]
    NotConnected { tenant_id: Uuid },

    #[error("a credential already exists for tenant {tenant_id}")]
    #[diagnostic(
        code(xero_connector::conflict),
        help("Disconnect the tenant before saving a new initial credential")
    )]
    Conflict { tenant_id: Uuid },

    /// Transport-level failure (timeout, connection reset, DNS). Safe to retry.
    #[error("network error: {message}")]
    #[diagnostic(
        code(xero_connector::network),
        help("Check your network connection and Xero availability, then retry")
    )]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
        span_trace: SpanTrace,
    },

    /// A non-authorization failure reported by Xero.
    #[error("xero responded with {status}: {code:?} {message}")]
    #[diagnostic(
        code(xero_connector::remote_api),
        help("Review the upstream status and error code returned by Xero")
    )]
    RemoteApi {
        status: StatusCode,
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
        url: Option<String>,
        span_trace: SpanTrace,
    },

    #[error("credential storage failed: {message}")]
    #[diagnostic(
        code(xero_connector::storage),
        help("Check that the credential backend is reachable and writable")
    )]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("error decoding response: {0:?}")]
    #[diagnostic(
        code(xero_connector::deserialization_error),
        help("The API returned data in an unexpected format")
    )]
    DeserializationError(#[source] serde_json::Error, Option<String>),

    #[error("endpoint could not be parsed as a URL")]
    #[diagnostic(
        code(xero_connector::invalid_endpoint),
        help("Check that the API base URL and endpoint path are correctly formatted")
    )]
    InvalidEndpoint,

    #[error("invalid configuration: {0}")]
    #[diagnostic(
        code(xero_connector::config),
        help("Set the XERO_* environment variables or build the config explicitly")
    )]
    Config(String),
}

impl Error {
    pub(crate) fn auth_expired(tenant_id: Uuid, reason: impl Into<String>) -> Self {
        Self::AuthExpired {
            tenant_id,
            reason: reason.into(),
            span_trace: SpanTrace::capture(),
        }
    }

    pub(crate) fn network(
        message: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source,
            span_trace: SpanTrace::capture(),
        }
    }

    pub(crate) fn remote(
        status: StatusCode,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            status,
            code,
            message: message.into(),
            retry_after: None,
            url: None,
            span_trace: SpanTrace::capture(),
        }
    }

    pub(crate) fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Map a failed token-endpoint exchange for `tenant_id`.
    ///
    /// Only `invalid_grant` means the refresh token itself is dead.
    /// `invalid_client` and `unauthorized_client` point at the app's own
    /// credentials and leave the tenant's token usable once they are fixed.
    pub(crate) fn from_token_request(tenant_id: Uuid, err: TokenRequestError) -> Self {
        match err {
            RequestTokenError::ServerResponse(response) => match response.error() {
                BasicErrorResponseType::InvalidGrant => Self::auth_expired(
                    tenant_id,
                    response
                        .error_description()
                        .cloned()
                        .unwrap_or_else(|| response.error().to_string()),
                ),
                BasicErrorResponseType::InvalidClient
                | BasicErrorResponseType::UnauthorizedClient => Self::remote(
                    StatusCode::UNAUTHORIZED,
                    Some(response.error().to_string()),
                    response
                        .error_description()
                        .cloned()
                        .unwrap_or_else(|| "check XERO_CLIENT_ID and XERO_CLIENT_SECRET".to_string()),
                ),
                other => Self::remote(
                    StatusCode::BAD_REQUEST,
                    Some(other.to_string()),
                    response.error_description().cloned().unwrap_or_default(),
                ),
            },
            RequestTokenError::Request(inner) => {
                Self::network(format!("token endpoint unreachable: {inner}"), Some(Box::new(inner)))
            }
            RequestTokenError::Parse(inner, body) => Self::DeserializationError(
                inner.into_inner(),
                Some(String::from_utf8_lossy(&body).into_owned()),
            ),
            RequestTokenError::Other(message) => {
                Self::remote(StatusCode::BAD_GATEWAY, None, message)
            }
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::RemoteApi { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    /// Whether a human has to run the authorization flow again.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::AuthExpired { .. } | Self::NotConnected { .. })
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            Self::AuthExpired { tenant_id, .. }
            | Self::NotConnected { tenant_id }
            | Self::Conflict { tenant_id } => Some(*tenant_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::RemoteApi { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    /// The async span trace captured where the error was created, if any.
    #[must_use]
    pub fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            Self::AuthExpired { span_trace, .. }
            | Self::Network { span_trace, .. }
            | Self::RemoteApi { span_trace, .. } => Some(span_trace),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::DeserializationError(e, None)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "connection failed".to_string()
        } else {
            e.to_string()
        };
        Self::network(message, Some(Box::new(e)))
    }
}

/// Type alias for results from this crate.
///
/// This is already a Miette diagnostic result due to the implementation of
/// the Diagnostic trait for the Error type.
pub type Result<O> = std::result::Result<O, Error>;
