use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// UTC instant that serializes as RFC 3339 with sub-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time at microsecond resolution, the finest a
    /// `timestamptz` column keeps.
    #[must_use]
    pub fn now() -> Self {
        Self::from_micros_floor(Utc::now())
    }

    fn from_micros_floor(instant: DateTime<Utc>) -> Self {
        Self(
            instant
                .duration_trunc(TimeDelta::microseconds(1))
                .unwrap_or(instant),
        )
    }

    /// Render using the wire representation.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|parsed| Self(parsed.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}
