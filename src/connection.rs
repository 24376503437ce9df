use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::utils::date_format::xero_datetime_format;

/// Tenant type Xero reports for accounting organisations.
pub const ORGANISATION: &str = "ORGANISATION";

/// A tenant the authorizing user connected to this app (`GET /connections`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: Uuid,
    pub auth_event_id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_type: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(with = "xero_datetime_format")]
    pub created_date_utc: OffsetDateTime,
    #[serde(with = "xero_datetime_format")]
    pub updated_date_utc: OffsetDateTime,
}

impl Connection {
    #[must_use]
    pub fn is_organisation(&self) -> bool {
        self.tenant_type == ORGANISATION
    }
}
