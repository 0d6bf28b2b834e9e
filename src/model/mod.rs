//! Core domain types shared across the agent

pub mod alert;
pub mod decision;
pub mod payload;
pub mod snapshot;

pub use alert::{AlertState, DeliveryRecord, DeliveryResult};
pub use decision::{BaselineSummary, Decision, DecisionStatus, Reason, Severity};
pub use payload::{EventType, WebhookPayload};
pub use snapshot::{CollectStatus, MetricValue, Snapshot};

/// RFC3339 timestamps in UTC with a `Z` suffix and fixed microsecond
/// precision, so encoded instants compare lexicographically.
pub mod rfc3339z {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn to_string(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&to_string(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::rfc3339z;

    #[test]
    fn test_rfc3339z_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let encoded = rfc3339z::to_string(&ts);
        assert_eq!(encoded, "2024-01-15T10:00:00.000000Z");
        assert_eq!(rfc3339z::parse(&encoded), Some(ts));
    }

    #[test]
    fn test_rfc3339z_accepts_offset_form() {
        let ts = rfc3339z::parse("2024-01-15T10:00:00+02:00").unwrap();
        assert_eq!(rfc3339z::to_string(&ts), "2024-01-15T08:00:00.000000Z");
    }
}
