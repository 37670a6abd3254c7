//! Core data model for environmental readings.
//!
//! A [`SensorReading`] is the unit that travels over the wire; a
//! [`StoredReading`] is the same value after the store has assigned it a row
//! id and an ingestion timestamp. [`ReadingKind`] names the columns a caller
//! may query individually through the store's read interface.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp text format used everywhere a timestamp is persisted.
///
/// Second precision, zero-padded, so lexicographic order equals
/// chronological order in SQL.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One measurement cycle of the sleep-environment sensor.
///
/// The wire shape is exactly these four numeric fields; unknown or missing
/// fields make deserialization fail instead of defaulting silently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub loudness: f64,
    pub light_level: f64,
}

/// A reading as it sits in the database: row id plus ingestion time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub reading: SensorReading,
}

/// Error returned when a caller asks the store for an unknown field name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reading kind: {0}")]
pub struct InvalidKindError(pub String);

/// The individually queryable parts of a stored reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Timestamp,
    Temperature,
    Humidity,
    Loudness,
    LightLevel,
}

impl ReadingKind {
    /// Column name in the readings table.
    pub fn column(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Loudness => "loudness",
            Self::LightLevel => "light_level",
        }
    }
}

impl FromStr for ReadingKind {
    type Err = InvalidKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(Self::Timestamp),
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "loudness" => Ok(Self::Loudness),
            "light_level" => Ok(Self::LightLevel),
            other => Err(InvalidKindError(other.to_string())),
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_exactly_the_five_known_names() {
        assert_eq!("timestamp".parse(), Ok(ReadingKind::Timestamp));
        assert_eq!("temperature".parse(), Ok(ReadingKind::Temperature));
        assert_eq!("humidity".parse(), Ok(ReadingKind::Humidity));
        assert_eq!("loudness".parse(), Ok(ReadingKind::Loudness));
        assert_eq!("light_level".parse(), Ok(ReadingKind::LightLevel));
    }

    #[test]
    fn kind_rejects_unknown_and_near_miss_names() {
        for bad in ["noise", "Temperature", "light level", "", "id"] {
            let err = bad.parse::<ReadingKind>().unwrap_err();
            assert_eq!(err, InvalidKindError(bad.to_string()));
        }
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [
            ReadingKind::Timestamp,
            ReadingKind::Temperature,
            ReadingKind::Humidity,
            ReadingKind::Loudness,
            ReadingKind::LightLevel,
        ] {
            assert_eq!(kind.to_string().parse::<ReadingKind>(), Ok(kind));
        }
    }

    #[test]
    fn reading_rejects_unknown_fields() {
        let payload = r#"{"temperature":21.0,"humidity":55.0,"loudness":30.0,"light_level":120.0,"battery":99}"#;
        assert!(serde_json::from_str::<SensorReading>(payload).is_err());
    }

    #[test]
    fn reading_rejects_missing_fields() {
        let payload = r#"{"temperature":21.0,"humidity":55.0}"#;
        assert!(serde_json::from_str::<SensorReading>(payload).is_err());
    }

    #[test]
    fn timestamp_format_is_second_precision() {
        let parsed = NaiveDateTime::parse_from_str("2024-03-01 22:15:07", TIMESTAMP_FORMAT)
            .expect("format must parse its own output");
        assert_eq!(parsed.format(TIMESTAMP_FORMAT).to_string(), "2024-03-01 22:15:07");
    }
}
