use std::fmt;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Path of the accounting API below the configured API root.
pub const ACCOUNTING_PATH: &str = "api.xro/2.0/";

/// A typed representation of the Xero API endpoints the connector addresses.
///
/// Endpoints are resolved against the configured API root, so the same value
/// works for production and for a local stand-in server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XeroEndpoint {
    /// Tenants the current token has access to (`/connections`).
    Connections,

    // Accounting endpoints
    Invoices,
    Invoice(Uuid),
    Items,
    Item(Uuid),
    ManualJournals,
    ManualJournal(Uuid),
    Organisation,
    Payments,
    Payment(Uuid),
    RepeatingInvoices,
    RepeatingInvoice(Uuid),

    /// Any other accounting resource, given as path components.
    Custom(Vec<String>),
}

impl XeroEndpoint {
    /// Path relative to the API root.
    #[must_use]
    pub fn path(&self) -> String {
        let resource = match self {
            Self::Connections => return "connections".to_string(),
            Self::Invoices => "Invoices".to_string(),
            Self::Invoice(id) => format!("Invoices/{id}"),
            Self::Items => "Items".to_string(),
            Self::Item(id) => format!("Items/{id}"),
            Self::ManualJournals => "ManualJournals".to_string(),
            Self::ManualJournal(id) => format!("ManualJournals/{id}"),
            Self::Organisation => "Organisation".to_string(),
            Self::Payments => "Payments".to_string(),
            Self::Payment(id) => format!("Payments/{id}"),
            Self::RepeatingInvoices => "RepeatingInvoices".to_string(),
            Self::RepeatingInvoice(id) => format!("RepeatingInvoices/{id}"),
            Self::Custom(components) => components.join("/"),
        };
        format!("{ACCOUNTING_PATH}{resource}")
    }

    /// Converts the endpoint to an absolute URL under `base`.
    pub fn to_url(&self, base: &Url) -> Result<Url> {
        if let Self::Custom(components) = self
            && (components.is_empty() || !components.iter().all(|c| is_plain_component(c)))
        {
            return Err(Error::InvalidEndpoint);
        }
        base.join(&self.path()).map_err(|_| Error::InvalidEndpoint)
    }

    /// Creates a custom endpoint from a slash separated resource path such as
    /// `"BankTransactions/{id}/History"`.
    #[must_use]
    pub fn custom(path: &str) -> Self {
        Self::Custom(
            path.trim_matches('/')
                .split('/')
                .map(str::to_string)
                .collect(),
        )
    }
}

/// A path component that the URL parser keeps as one literal segment: no
/// dot segments (plain or percent-encoded) and no query, fragment or
/// separator characters.
fn is_plain_component(component: &str) -> bool {
    let lowered = component.to_ascii_lowercase();
    !component.is_empty()
        && component != "."
        && !component.contains("..")
        && !lowered.contains("%2e")
        && !lowered.contains("%2f")
        && !lowered.contains("%5c")
        && !component.contains(['?', '#', '/', '\\'])
}

impl fmt::Display for XeroEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
