//! Core types for the activity decoder library
//!
//! This module defines the records that flow through the pipeline (raw records
//! from a format decoder, canonical records from the normalizer), the header
//! metadata each decoder reports, and the error type shared by every stage.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// The file header is absent, truncated or fails its signature/schema check
    #[error("Failed to decode file header: {0}")]
    DecodeError(String),

    /// A single record is malformed
    #[error("Malformed record: {0}")]
    RecordError(String),

    /// The record stream is empty, entirely unresolved, or out of order in strict mode
    #[error("Failed to build activity table: {0}")]
    MaterializationError(String),

    #[error("Unit '{unit}' is not registered for column '{column}'")]
    UnitError { column: String, unit: String },

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Metric '{metric}' is not defined for column '{column}'")]
    UnsupportedMetric { column: String, metric: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A decoder setting is out of range
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse category of a [`DecoderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Record,
    Materialization,
    Unit,
    Usage,
    Io,
}

impl DecoderError {
    /// Get the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecoderError::DecodeError(_) => ErrorKind::Decode,
            DecoderError::RecordError(_) => ErrorKind::Record,
            DecoderError::MaterializationError(_) => ErrorKind::Materialization,
            DecoderError::UnitError { .. } => ErrorKind::Unit,
            DecoderError::MissingColumn(_)
            | DecoderError::UnsupportedMetric { .. }
            | DecoderError::UnsupportedFormat(_)
            | DecoderError::InvalidTimezone(_)
            | DecoderError::ConfigError(_) => ErrorKind::Usage,
            DecoderError::IoError(_) => ErrorKind::Io,
        }
    }
}

/// Supported source file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Binary device dump (Flexible and Interoperable Data Transfer)
    Fit,
    /// Binary power-meter log
    Srm,
    /// Trackpoint-oriented XML (Training Center)
    Tcx,
    /// Track/segment-oriented XML
    Gpx,
    /// Sample-oriented XML
    Pwx,
}

impl Format {
    /// Every supported format, in dispatch order
    pub const ALL: [Format; 5] = [Format::Fit, Format::Srm, Format::Tcx, Format::Gpx, Format::Pwx];

    /// Look up a format by file extension (without the leading dot, any case)
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "fit" => Some(Format::Fit),
            "srm" => Some(Format::Srm),
            "tcx" => Some(Format::Tcx),
            "gpx" => Some(Format::Gpx),
            "pwx" => Some(Format::Pwx),
            _ => None,
        }
    }

    /// Look up a format from the extension of a path
    pub fn from_path(path: &std::path::Path) -> Option<Format> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Format::from_extension)
    }

    /// Whether this is a markup format (malformed points are skipped, not fatal)
    pub fn is_markup(&self) -> bool {
        matches!(self, Format::Tcx | Format::Gpx | Format::Pwx)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Fit => write!(f, "FIT"),
            Format::Srm => write!(f, "SRM"),
            Format::Tcx => write!(f, "TCX"),
            Format::Gpx => write!(f, "GPX"),
            Format::Pwx => write!(f, "PWX"),
        }
    }
}

/// Canonical field vocabulary shared by every format
///
/// The string names are a versioned contract: a new source format only adds a
/// decoder and a mapping table onto these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Lap,
    Distance,
    Altitude,
    Cadence,
    Power,
    Speed,
    Temperature,
    HeartRate,
    Latitude,
    Longitude,
}

impl Field {
    /// Version of the canonical vocabulary
    pub const VOCABULARY_VERSION: u32 = 1;

    /// All canonical fields in column order
    pub const ALL: [Field; 10] = [
        Field::Lap,
        Field::Distance,
        Field::Altitude,
        Field::Cadence,
        Field::Power,
        Field::Speed,
        Field::Temperature,
        Field::HeartRate,
        Field::Latitude,
        Field::Longitude,
    ];

    /// Canonical column name
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Lap => "lap",
            Field::Distance => "distance",
            Field::Altitude => "altitude",
            Field::Cadence => "cadence",
            Field::Power => "power",
            Field::Speed => "speed",
            Field::Temperature => "temperature",
            Field::HeartRate => "heart_rate",
            Field::Latitude => "latitude",
            Field::Longitude => "longitude",
        }
    }

    /// Look up a canonical field by column name
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a decoder's wall-clock times relate to UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBasis {
    /// Times are UTC instants
    Utc,
    /// Times are local wall-clock readings with no zone information
    Floating,
}

/// Time value carried by a raw record before resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTime {
    /// A wall-clock reading (interpreted according to the header's [`TimeBasis`])
    Absolute(NaiveDateTime),
    /// An offset from the header start time
    Offset(Duration),
}

/// A single scalar value in a raw record
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Time(RawTime),
}

impl RawValue {
    /// Numeric view of this value (text is parsed, times have no numeric view)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Time(_) => None,
        }
    }

    /// Time view of this value
    pub fn as_time(&self) -> Option<RawTime> {
        match self {
            RawValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Format-specific field identifiers mapped to scalar values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: HashMap<String, RawValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn insert_number(&mut self, key: impl Into<String>, value: f64) {
        self.insert(key, RawValue::Number(value));
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A resolved record timestamp
///
/// Naive times carry no zone (UTC wall time or device wall time, depending on
/// the source's [`TimeBasis`]); zoned times are localized to a caller-supplied zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordTime {
    Naive(NaiveDateTime),
    Zoned(DateTime<Tz>),
}

impl RecordTime {
    /// Wall-clock reading of this time
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            RecordTime::Naive(t) => *t,
            RecordTime::Zoned(t) => t.naive_local(),
        }
    }

    /// Elapsed time from `earlier` to `self`
    pub fn signed_duration_since(&self, earlier: &RecordTime) -> Duration {
        match (self, earlier) {
            (RecordTime::Zoned(a), RecordTime::Zoned(b)) => a.signed_duration_since(*b),
            _ => self.naive_local().signed_duration_since(earlier.naive_local()),
        }
    }

    pub fn is_zoned(&self) -> bool {
        matches!(self, RecordTime::Zoned(_))
    }
}

impl PartialOrd for RecordTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.signed_duration_since(other).cmp(&Duration::zero()))
    }
}

impl fmt::Display for RecordTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordTime::Naive(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S%.f")),
            RecordTime::Zoned(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// One normalized measurement row
///
/// Fields absent in the source are omitted, never filled with a default.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub time: RecordTime,
    pub values: BTreeMap<Field, f64>,
}

impl CanonicalRecord {
    pub fn new(time: RecordTime) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied()
    }
}

/// Device identifiers reported by a file header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    pub fn is_empty(&self) -> bool {
        self.manufacturer.is_none() && self.product.is_none() && self.serial_number.is_none()
    }
}

/// Header metadata produced by a format decoder
///
/// Some formats only reveal parts of their metadata while records are read
/// (a FIT `file_id` or `activity` message), so decoders keep this up to date
/// as they go and the final state is attached to the table.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    pub format: Format,
    pub basis: TimeBasis,
    /// Start wall-clock time, if the format encodes one
    pub start: Option<NaiveDateTime>,
    /// UTC offset hint, if the format encodes one
    pub utc_offset: Option<FixedOffset>,
    /// Nominal sampling interval for fixed-rate formats
    pub sampling_interval: Option<Duration>,
    pub device: DeviceInfo,
    /// Format or protocol version string
    pub version: Option<String>,
    pub comment: Option<String>,
}

impl HeaderInfo {
    pub fn new(format: Format, basis: TimeBasis) -> Self {
        Self {
            format,
            basis,
            start: None,
            utc_offset: None,
            sampling_interval: None,
            device: DeviceInfo::default(),
            version: None,
            comment: None,
        }
    }
}

/// Duration as fractional seconds
pub fn duration_secs(d: Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Fractional seconds as a duration (microsecond resolution)
pub fn secs_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_extension("FIT"), Some(Format::Fit));
        assert_eq!(Format::from_extension("gpx"), Some(Format::Gpx));
        assert_eq!(Format::from_extension("csv"), None);
        assert_eq!(
            Format::from_path(std::path::Path::new("ride.Srm")),
            Some(Format::Srm)
        );
        assert!(Format::Tcx.is_markup());
        assert!(!Format::Fit.is_markup());
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.as_str()), Some(field));
        }
        assert_eq!(Field::from_name("pwr"), None);
    }

    #[test]
    fn test_raw_value_views() {
        assert_eq!(RawValue::Number(4.5).as_f64(), Some(4.5));
        assert_eq!(RawValue::Text(" 12 ".into()).as_f64(), Some(12.0));
        assert_eq!(RawValue::Text("abc".into()).as_f64(), None);
        let t = RawValue::Time(RawTime::Absolute(at(8, 0, 0)));
        assert_eq!(t.as_f64(), None);
        assert!(t.as_time().is_some());
    }

    #[test]
    fn test_record_time_ordering_and_elapsed() {
        let a = RecordTime::Naive(at(8, 0, 0));
        let b = RecordTime::Naive(at(8, 0, 5));
        assert!(a < b);
        assert_eq!(b.signed_duration_since(&a), Duration::seconds(5));

        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let za = RecordTime::Zoned(tz.from_utc_datetime(&at(8, 0, 0)));
        let zb = RecordTime::Zoned(tz.from_utc_datetime(&at(9, 0, 0)));
        assert_eq!(zb.signed_duration_since(&za), Duration::hours(1));
        assert_eq!(za.naive_local(), at(10, 0, 0));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DecoderError::DecodeError("x".into()).kind(), ErrorKind::Decode);
        assert_eq!(
            DecoderError::UnitError {
                column: "distance".into(),
                unit: "parsec".into()
            }
            .kind(),
            ErrorKind::Unit
        );
        let msg = DecoderError::MaterializationError("empty".into()).to_string();
        assert!(msg.contains("empty"));
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(duration_secs(Duration::milliseconds(1500)), 1.5);
        assert_eq!(secs_duration(0.25), Duration::milliseconds(250));
    }
}
