use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Parses the timestamp shapes Xero sends.
///
/// - `.NET` JSON dates: `/Date(1573755038314+0000)/`
/// - RFC 3339 with an offset
/// - offset-less ISO timestamps, with or without fractional seconds
///   (`2025-03-03T06:17:25.8448470`), which Xero means as UTC
pub fn parse_xero_datetime(value: &str) -> Result<OffsetDateTime, String> {
    if let Some(inner) = value
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        let millis = inner
            .split(['+', '-'])
            .find(|part| !part.is_empty())
            .unwrap_or(inner);
        let millis: i64 = millis
            .parse()
            .map_err(|e| format!("invalid .NET date '{value}': {e}"))?;
        let millis = if inner.starts_with('-') { -millis } else { millis };
        return OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .map_err(|e| format!("invalid timestamp '{value}': {e}"));
    }

    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed);
    }

    let fractional = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let whole = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, &fractional)
        .or_else(|_| PrimitiveDateTime::parse(value, &whole))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| format!("failed to parse datetime '{value}': {e}"))
}

/// Serde adapter for `OffsetDateTime` fields in Xero payloads. Reads any shape
/// [`parse_xero_datetime`] accepts and writes RFC 3339.
pub mod xero_datetime_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = datetime.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        super::parse_xero_datetime(&value).map_err(serde::de::Error::custom)
    }
}
