//! # xero-connector
//!
//! OAuth 2 token lifecycle and an authenticated session client for the Xero
//! API.
//!
//! Credentials live in a [`TokenStore`], one per tenant, behind a pluggable
//! [`CredentialBackend`]. The store refreshes tokens before they expire and
//! serializes refreshes per tenant, because Xero rotates the refresh token on
//! every exchange. [`Client::call`] runs an [`Operation`] for a tenant and
//! recovers from a rejected access token with exactly one refresh and replay.
//!
//! ```ignore
//! use std::sync::Arc;
//! use xero_connector::{Client, ConnectorConfig, FileBackend, Operation, XeroEndpoint};
//!
//! let config = ConnectorConfig::from_env()?;
//! let backend = Arc::new(FileBackend::open("/var/lib/xero").await?);
//! let client = Client::new(&config, backend)?;
//!
//! let invoices: serde_json::Value = client
//!     .call(tenant_id, &Operation::get(XeroEndpoint::Invoices).unitdp(4))
//!     .await?;
//! ```
//!
//! ## Sentry Integration
//!
//! Errors include async span traces captured where they were created. Enable
//! the `sentry` feature for `Breadcrumb` conversion and context extraction,
//! and install `tracing_error::ErrorLayer` so span traces are recorded:
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

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
extern crate tracing;

pub mod client;
pub mod config;
pub mod connection;
pub mod credential;
pub mod endpoints;
pub mod error;
pub mod oauth;
pub mod operation;
pub mod retry;
pub mod scope;
mod session;
pub mod store;
pub mod utils;

#[cfg(feature = "sentry")]
pub mod sentry_integration;

pub use client::Client;
pub use config::ConnectorConfig;
pub use connection::Connection;
pub use credential::Credential;
pub use endpoints::XeroEndpoint;
pub use error::{Error, Result};
pub use oauth::{KeyPair, TokenExchange, TokenGrant, XeroTokenEndpoint};
pub use operation::Operation;
pub use retry::{RetryPolicy, with_backoff};
pub use scope::Scope;
pub use session::RateLimitInfo;
pub use store::{AuthorizationState, CredentialBackend, FileBackend, MemoryBackend, TokenStore};

// Re-export SpanTrace for users who want to access it
pub use tracing_error::SpanTrace;
