use std::time::Duration;

use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::oauth::{DEFAULT_ACCESS_TOKEN_LIFETIME, TokenGrant};

/// Default buffer before `expires_at` at which a credential is refreshed.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// OAuth 2 credential for a single connected Xero organisation.
///
/// Secrets are wrapped in the `oauth2` secret types so `Debug` output never
/// leaks them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub tenant_id: Uuid,
}

impl Credential {
    #[must_use]
    pub fn new(
        tenant_id: Uuid,
        access_token: AccessToken,
        refresh_token: RefreshToken,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            tenant_id,
        }
    }

    /// Build a credential from a token-endpoint grant received at `issued_at`.
    ///
    /// Xero rotates refresh tokens on every exchange, but when a grant comes
    /// back without one the previous refresh token stays valid and is kept.
    #[must_use]
    pub fn from_grant(
        tenant_id: Uuid,
        grant: TokenGrant,
        previous_refresh_token: Option<&RefreshToken>,
        issued_at: OffsetDateTime,
    ) -> Option<Self> {
        let refresh_token = grant
            .refresh_token
            .or_else(|| previous_refresh_token.cloned())?;
        let expires_at = checked_expiry(issued_at, grant.expires_in).unwrap_or_else(|| {
            warn!(expires_in = ?grant.expires_in, "token lifetime out of range, assuming the default");
            issued_at + DEFAULT_ACCESS_TOKEN_LIFETIME
        });
        Some(Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at,
            tenant_id,
        })
    }

    /// True once `now` is within `skew` of the expiry instant.
    #[must_use]
    pub fn expires_within(&self, skew: Duration, now: OffsetDateTime) -> bool {
        time::Duration::try_from(skew)
            .ok()
            .and_then(|skew| self.expires_at.checked_sub(skew))
            .is_none_or(|refresh_at| refresh_at <= now)
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Whether `other` carries the same token pair as this credential.
    #[must_use]
    pub fn same_tokens(&self, other: &Self) -> bool {
        self.access_token.secret() == other.access_token.secret()
            && self.refresh_token.secret() == other.refresh_token.secret()
    }
}

fn checked_expiry(issued_at: OffsetDateTime, lifetime: Duration) -> Option<OffsetDateTime> {
    issued_at.checked_add(time::Duration::try_from(lifetime).ok()?)
}
