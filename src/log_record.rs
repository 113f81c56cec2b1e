//! Log record representation shipped by the relay.
//!
//! A [`LogRecord`] is a flat, ordered map of attribute names to string
//! values. Three reserved keys are always present: [`MESSAGE_KEY`],
//! [`TIME_KEY`] and [`LEVEL_KEY`]. Everything else is free-form.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::level::Level;

/// Attribute holding the log message.
pub const MESSAGE_KEY: &str = "msg";
/// Attribute holding the RFC 3339 timestamp.
pub const TIME_KEY: &str = "time";
/// Attribute holding the level name.
pub const LEVEL_KEY: &str = "level";

/// A single structured record.
///
/// Records are created through [`LogRecord::new`] or
/// [`RecordBuilder`](crate::attributes::RecordBuilder) and are never
/// modified once they reach the queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LogRecord {
    attrs: BTreeMap<String, String>,
}

impl LogRecord {
    /// Construct a record carrying only the reserved attributes.
    pub fn new(level: Level, message: &str) -> Self {
        Self::from_parts(level, message, Utc::now(), BTreeMap::new())
    }

    /// Construct a record from free-form attributes; reserved keys in
    /// `attrs` are overwritten.
    pub fn from_parts(
        level: Level,
        message: &str,
        timestamp: DateTime<Utc>,
        mut attrs: BTreeMap<String, String>,
    ) -> Self {
        attrs.insert(MESSAGE_KEY.to_owned(), message.to_owned());
        attrs.insert(TIME_KEY.to_owned(), format_timestamp(timestamp));
        attrs.insert(LEVEL_KEY.to_owned(), level.to_string());
        Self { attrs }
    }

    /// Look up an attribute by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn message(&self) -> &str {
        self.get(MESSAGE_KEY).unwrap_or_default()
    }

    /// The level recorded on this record, if it parses.
    pub fn level(&self) -> Option<Level> {
        self.get(LEVEL_KEY).and_then(|l| l.parse().ok())
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Return a copy of this record with `common` merged in. Common values
    /// take precedence over the record's own.
    pub(crate) fn merged_with(mut self, common: &BTreeMap<String, String>) -> Self {
        for (k, v) in common {
            self.attrs.insert(k.clone(), v.clone());
        }
        self
    }
}

/// Format a timestamp the way the collector expects it.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.get(LEVEL_KEY).unwrap_or_default(),
            self.message()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reserved_keys_overwrite_attributes() {
        let mut attrs = BTreeMap::new();
        attrs.insert("msg".to_owned(), "spoofed".to_owned());
        attrs.insert("user".to_owned(), "alice".to_owned());
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = LogRecord::from_parts(Level::Warn, "real", ts, attrs);

        assert_eq!(record.message(), "real");
        assert_eq!(record.get("user"), Some("alice"));
        assert_eq!(record.get(LEVEL_KEY), Some("WARN"));
        assert_eq!(record.get(TIME_KEY), Some("2024-01-02T03:04:05.000000000Z"));
        assert_eq!(record.level(), Some(Level::Warn));
    }

    #[test]
    fn serialises_as_flat_object() {
        let record = LogRecord::new(Level::Info, "hello");
        let value = serde_json::to_value(&record).expect("serialise record");
        let object = value.as_object().expect("record is an object");
        assert_eq!(object["msg"], "hello");
        assert_eq!(object["level"], "INFO");
        assert!(object.values().all(serde_json::Value::is_string));
    }

    #[test]
    fn common_attributes_take_precedence() {
        let mut common = BTreeMap::new();
        common.insert("service".to_owned(), "billing".to_owned());
        let record = LogRecord::new(Level::Info, "hi").merged_with(&common);
        assert_eq!(record.get("service"), Some("billing"));
    }
}
