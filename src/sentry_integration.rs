//! Sentry integration for xero-connector errors.
//!
//! Only available with the `sentry` feature. Set up tracing with `ErrorLayer`
//! so errors carry span traces:
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//! use tracing_error::ErrorLayer;
//!
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(ErrorLayer::default())  // Required for SpanTrace capture
//!     .with(sentry::integrations::tracing::layer())
//!     .init();
//! ```

use std::collections::BTreeMap;

use sentry_core::{Breadcrumb, protocol::Value};

use crate::error::Error;

/// Convert an error into a Sentry breadcrumb, so call history for a tenant
/// shows up next to the captured event.
impl<'a> From<&'a Error> for Breadcrumb {
    fn from(error: &'a Error) -> Self {
        let mut data = BTreeMap::new();
        if let Some(tenant_id) = error.tenant_id() {
            data.insert("tenant_id".to_string(), Value::from(tenant_id.to_string()));
        }

        let (category, message) = match error {
            Error::AuthExpired { reason, .. } => {
                ("auth", format!("Xero authorization expired: {reason}"))
            }
            Error::NotConnected { .. } => ("auth", "Tenant not connected".to_string()),
            Error::Conflict { .. } => ("auth", "Tenant already connected".to_string()),
            Error::Network { message, .. } => ("http.request", format!("Network error: {message}")),
            Error::RemoteApi {
                status,
                code,
                message,
                retry_after,
                url,
                ..
            } => {
                data.insert("status_code".to_string(), Value::from(status.as_u16()));
                if let Some(code) = code {
                    data.insert("error_code".to_string(), Value::from(code.clone()));
                }
                if let Some(url) = url {
                    data.insert("url".to_string(), Value::from(url.clone()));
                }
                if let Some(retry) = retry_after {
                    data.insert("retry_after_secs".to_string(), Value::from(retry.as_secs()));
                }
                ("xero.api", format!("Xero API error: {message}"))
            }
            Error::Storage { message, .. } => ("xero.storage", format!("Credential storage: {message}")),
            Error::DeserializationError(source, _) => (
                "http.response",
                format!("Failed to deserialize response: {source}"),
            ),
            Error::InvalidEndpoint => ("xero.config", "Invalid endpoint URL".to_string()),
            Error::Config(message) => ("xero.config", format!("Invalid configuration: {message}")),
        };

        Breadcrumb {
            ty: "error".to_string(),
            category: Some(category.to_string()),
            message: Some(message),
            data,
            level: sentry_core::Level::Error,
            ..Default::default()
        }
    }
}

/// Extract additional Sentry context from an error.
///
/// # Example
///
/// ```ignore
/// use sentry::configure_scope;
/// use xero_connector::sentry_integration::error_to_sentry_context;
///
/// if let Err(e) = client.call::<serde_json::Value>(tenant_id, &operation).await {
///     configure_scope(|scope| {
///         for (key, value) in error_to_sentry_context(&e) {
///             scope.set_extra(&key, value);
///         }
///     });
/// }
/// ```
pub fn error_to_sentry_context(error: &Error) -> BTreeMap<String, Value> {
    let mut context = BTreeMap::new();

    if let Some(span_trace) = error.span_trace() {
        context.insert(
            "xero.span_trace".to_string(),
            Value::from(format!("{span_trace}")),
        );
    }
    if let Some(tenant_id) = error.tenant_id() {
        context.insert("xero.tenant_id".to_string(), Value::from(tenant_id.to_string()));
    }
    if let Some(url) = error.url() {
        context.insert("xero.url".to_string(), Value::from(url.to_string()));
    }
    if let Some(status) = error.status_code() {
        context.insert("xero.status_code".to_string(), Value::from(status.as_u16()));
    }
    context.insert(
        "xero.requires_reauthorization".to_string(),
        Value::from(error.requires_reauthorization()),
    );

    // Truncate response previews for Sentry
    if let Error::DeserializationError(_, Some(body)) = error {
        let preview: String = body.chars().take(500).collect();
        context.insert("xero.response_body".to_string(), Value::from(preview));
    }

    context
}
