use reqwest::Method;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;
use url::Url;

use crate::endpoints::XeroEndpoint;
use crate::error::Result;

/// One API request, described independently of any credential so the session
/// client can replay it after a refresh.
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: Method,
    pub endpoint: XeroEndpoint,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Unit decimal places (4 or 2, Xero defaults to 2).
    pub unitdp: Option<u8>,
    pub if_modified_since: Option<OffsetDateTime>,
}

impl Operation {
    #[must_use]
    pub fn new(method: Method, endpoint: XeroEndpoint) -> Self {
        Self {
            method,
            endpoint,
            query: Vec::new(),
            body: None,
            unitdp: None,
            if_modified_since: None,
        }
    }

    #[must_use]
    pub fn get(endpoint: XeroEndpoint) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// `PUT` creates resources in Xero.
    pub fn put<T: Serialize + ?Sized>(endpoint: XeroEndpoint, body: &T) -> Result<Self> {
        Self::new(Method::PUT, endpoint).with_body(body)
    }

    /// `POST` updates (or upserts) resources in Xero.
    pub fn post<T: Serialize + ?Sized>(endpoint: XeroEndpoint, body: &T) -> Result<Self> {
        Self::new(Method::POST, endpoint).with_body(body)
    }

    #[must_use]
    pub fn delete(endpoint: XeroEndpoint) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn with_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Xero `where` filter, e.g. `Status=="AUTHORISED"`.
    #[must_use]
    pub fn filter(self, expression: impl Into<String>) -> Self {
        self.query("where", expression)
    }

    /// Xero sort order, e.g. `Date DESC`.
    #[must_use]
    pub fn order(self, order: impl Into<String>) -> Self {
        self.query("order", order)
    }

    #[must_use]
    pub fn page(self, page: u32) -> Self {
        self.query("page", page.to_string())
    }

    #[must_use]
    pub fn unitdp(mut self, unitdp: u8) -> Self {
        self.unitdp = Some(unitdp);
        self
    }

    #[must_use]
    pub fn if_modified_since(mut self, since: OffsetDateTime) -> Self {
        self.if_modified_since = Some(since);
        self
    }

    /// Resolve the endpoint under `base` and append the query parameters.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = self.endpoint.to_url(base)?;
        if !self.query.is_empty() || self.unitdp.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
            if let Some(unitdp) = self.unitdp {
                pairs.append_pair("unitdp", &unitdp.to_string());
            }
        }
        Ok(url)
    }

    /// `If-Modified-Since` header value. Xero reads it as a UTC timestamp
    /// without offset.
    #[must_use]
    pub fn if_modified_since_header(&self) -> Option<String> {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        self.if_modified_since
            .and_then(|since| since.to_offset(time::UtcOffset::UTC).format(&format).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_and_unitdp_are_appended() {
        let base = Url::parse("https://api.xero.com/").unwrap();
        let url = Operation::get(XeroEndpoint::Invoices)
            .filter("Status==\"AUTHORISED\"")
            .order("Date DESC")
            .unitdp(4)
            .url(&base)
            .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("where".to_string(), "Status==\"AUTHORISED\"".to_string()),
                ("order".to_string(), "Date DESC".to_string()),
                ("unitdp".to_string(), "4".to_string()),
            ]
        );
        assert_eq!(url.path(), "/api.xro/2.0/Invoices");
    }

    #[test]
    fn plain_get_has_no_query_string() {
        let base = Url::parse("https://api.xero.com/").unwrap();
        let url = Operation::get(XeroEndpoint::Organisation).url(&base).unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn bodies_are_captured_as_json() {
        let operation = Operation::post(
            XeroEndpoint::ManualJournals,
            &json!({"ManualJournals": [{"Narration": "Accrual"}]}),
        )
        .unwrap();

        assert_eq!(operation.method, Method::POST);
        assert_eq!(operation.body.unwrap()["ManualJournals"][0]["Narration"], "Accrual");
    }

    #[test]
    fn if_modified_since_is_sent_in_utc() {
        let operation = Operation::get(XeroEndpoint::Payments)
            .if_modified_since(time::macros::datetime!(2024-01-02 03:04:05 -5));
        assert_eq!(
            operation.if_modified_since_header().as_deref(),
            Some("2024-01-02T08:04:05")
        );
    }
}
