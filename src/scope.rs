use oauth2::Scope as OAuth2Scope;
use std::fmt;
use std::str::FromStr;

/// Scope Xero requires before it issues refresh tokens.
pub const OFFLINE_ACCESS: &str = "offline_access";

/// A set of Xero OAuth scopes.
///
/// `offline_access` is always part of the set: without it Xero does not hand
/// out refresh tokens and the connector could not keep a tenant connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    scopes: Vec<String>,
}

impl Scope {
    /// Create a scope set from individual scope strings.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self {
            scopes: vec![OFFLINE_ACCESS.to_string()],
        };
        for scope in scopes {
            set.push(scope.into());
        }
        set
    }

    /// Parse a comma (or whitespace) separated list, as found in `XERO_SCOPES`.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
    }

    fn push(&mut self, scope: String) {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
    }

    /// Read access to transactions, contacts and settings; what a read-only
    /// connector needs.
    #[must_use]
    pub fn accounting_read() -> Self {
        Self::new([
            "accounting.transactions.read",
            "accounting.contacts.read",
            "accounting.settings.read",
        ])
    }

    /// Full accounting access used by connectors that post journals and payments.
    #[must_use]
    pub fn accounting() -> Self {
        Self::new([
            "accounting.transactions",
            "accounting.contacts",
            "accounting.settings",
            "accounting.reports.read",
            "accounting.journals.read",
        ])
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    /// The scopes as individual `oauth2` scope values.
    #[must_use]
    pub fn to_oauth2(&self) -> Vec<OAuth2Scope> {
        self.scopes.iter().cloned().map(OAuth2Scope::new).collect()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::accounting_read()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scopes.join(" "))
    }
}

impl FromStr for Scope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
