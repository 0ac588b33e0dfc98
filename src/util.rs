use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Timestamp layout shared by both stores and the read API.
/// Lexical order of formatted values equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const HOSTWATCH_SECRET: &str = "HOSTWATCH_SECRET";

pub fn get_secret() -> Option<String> {
    std::env::var(HOSTWATCH_SECRET)
        .ok()
        .filter(|secret| !secret.is_empty())
}

const HOSTWATCH_LOG: &str = "HOSTWATCH_LOG";

pub fn get_log_level() -> Option<String> {
    std::env::var(HOSTWATCH_LOG).ok()
}

/// Current UTC time truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses `YYYY-MM-DD HH:MM:SS` as UTC. RFC 3339 is accepted as well so
/// callers may pass timestamps with an explicit offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc).trunc_subsecs(0))
        })
}

/// serde adapter for `DateTime<Utc>` fields using [`TIMESTAMP_FORMAT`]
pub mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(timestamp))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}
