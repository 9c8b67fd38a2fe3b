//! Record normalizer
//!
//! Maps each format's raw field names onto the canonical vocabulary and
//! resolves record times. The mapping tables are static read-only data, one
//! per format; raw fields that no table entry names are dropped.

use crate::formats::RecordSource;
use crate::types::{
    CanonicalRecord, Field, Format, HeaderInfo, RawRecord, RawTime, RecordTime, Result, TimeBasis,
};
use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// Value conversion applied while mapping a raw field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Identity,
    /// km/h to m/s
    KphToMps,
    /// FIT semicircles to degrees
    SemicirclesToDegrees,
}

impl Conversion {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Conversion::Identity => value,
            Conversion::KphToMps => value / 3.6,
            Conversion::SemicirclesToDegrees => value * (180.0 / 2_147_483_648.0),
        }
    }
}

/// One entry of a format's field mapping table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldMapping {
    pub raw: &'static str,
    pub field: Field,
    pub conversion: Conversion,
}

const fn map(raw: &'static str, field: Field) -> FieldMapping {
    FieldMapping {
        raw,
        field,
        conversion: Conversion::Identity,
    }
}

const fn convert(raw: &'static str, field: Field, conversion: Conversion) -> FieldMapping {
    FieldMapping {
        raw,
        field,
        conversion,
    }
}

/// Field mapping table for one format
///
/// Entries apply in order, so when two raw fields map onto the same canonical
/// field the later entry wins.
#[derive(Debug, Clone, Copy)]
pub struct FormatMapping {
    pub format: Format,
    /// Raw key holding the record time
    pub time_key: &'static str,
    pub fields: &'static [FieldMapping],
}

impl FormatMapping {
    pub fn for_format(format: Format) -> &'static FormatMapping {
        match format {
            Format::Fit => &FIT_MAPPING,
            Format::Srm => &SRM_MAPPING,
            Format::Tcx => &TCX_MAPPING,
            Format::Gpx => &GPX_MAPPING,
            Format::Pwx => &PWX_MAPPING,
        }
    }
}

static FIT_MAPPING: FormatMapping = FormatMapping {
    format: Format::Fit,
    time_key: "timestamp",
    fields: &[
        map("lap", Field::Lap),
        map("distance", Field::Distance),
        map("altitude", Field::Altitude),
        map("enhanced_altitude", Field::Altitude),
        map("cadence", Field::Cadence),
        map("power", Field::Power),
        map("speed", Field::Speed),
        map("enhanced_speed", Field::Speed),
        map("temperature", Field::Temperature),
        map("heart_rate", Field::HeartRate),
        convert("position_lat", Field::Latitude, Conversion::SemicirclesToDegrees),
        convert("position_long", Field::Longitude, Conversion::SemicirclesToDegrees),
    ],
};

static SRM_MAPPING: FormatMapping = FormatMapping {
    format: Format::Srm,
    time_key: "time",
    fields: &[
        map("lap", Field::Lap),
        map("metres", Field::Distance),
        map("alt", Field::Altitude),
        map("cad", Field::Cadence),
        map("watts", Field::Power),
        convert("kph", Field::Speed, Conversion::KphToMps),
        map("temp", Field::Temperature),
        map("hr", Field::HeartRate),
        map("lat", Field::Latitude),
        map("lon", Field::Longitude),
    ],
};

static TCX_MAPPING: FormatMapping = FormatMapping {
    format: Format::Tcx,
    time_key: "Time",
    fields: &[
        map("Lap", Field::Lap),
        map("DistanceMeters", Field::Distance),
        map("AltitudeMeters", Field::Altitude),
        map("Cadence", Field::Cadence),
        map("RunCadence", Field::Cadence),
        map("Watts", Field::Power),
        map("Speed", Field::Speed),
        map("HeartRateBpm", Field::HeartRate),
        map("LatitudeDegrees", Field::Latitude),
        map("LongitudeDegrees", Field::Longitude),
    ],
};

static GPX_MAPPING: FormatMapping = FormatMapping {
    format: Format::Gpx,
    time_key: "time",
    fields: &[
        map("segment", Field::Lap),
        map("distance", Field::Distance),
        map("ele", Field::Altitude),
        map("cad", Field::Cadence),
        map("power", Field::Power),
        map("speed", Field::Speed),
        map("atemp", Field::Temperature),
        map("hr", Field::HeartRate),
        map("lat", Field::Latitude),
        map("lon", Field::Longitude),
    ],
};

static PWX_MAPPING: FormatMapping = FormatMapping {
    format: Format::Pwx,
    time_key: "timeoffset",
    fields: &[
        map("dist", Field::Distance),
        map("alt", Field::Altitude),
        map("cad", Field::Cadence),
        map("pwr", Field::Power),
        map("spd", Field::Speed),
        map("temp", Field::Temperature),
        map("hr", Field::HeartRate),
        map("lat", Field::Latitude),
        map("lon", Field::Longitude),
    ],
};

/// Resolve a raw record time to a wall-clock reading
///
/// Offsets need the header start; absolute times stand alone.
pub fn resolve_naive(raw: RawTime, start: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match raw {
        RawTime::Absolute(time) => Some(time),
        RawTime::Offset(offset) => start?.checked_add_signed(offset),
    }
}

/// Apply the localization policy to a resolved wall-clock reading
///
/// Without a zone the time stays naive. UTC-basis times are converted into
/// the zone; floating times are read as local times in the zone, taking the
/// earlier instant when ambiguous and failing when the local time does not
/// exist.
pub fn localize(time: NaiveDateTime, basis: TimeBasis, tz: Option<Tz>) -> Option<RecordTime> {
    let tz = match tz {
        Some(tz) => tz,
        None => return Some(RecordTime::Naive(time)),
    };
    match basis {
        TimeBasis::Utc => Some(RecordTime::Zoned(tz.from_utc_datetime(&time))),
        TimeBasis::Floating => tz.from_local_datetime(&time).earliest().map(RecordTime::Zoned),
    }
}

/// Normalize one raw record; `None` when the record has no resolvable time
pub fn normalize_record(
    raw: &RawRecord,
    header: &HeaderInfo,
    mapping: &FormatMapping,
    tz: Option<Tz>,
) -> Option<CanonicalRecord> {
    let raw_time = raw.get(mapping.time_key)?.as_time()?;
    let naive = resolve_naive(raw_time, header.start)?;
    let time = match localize(naive, header.basis, tz) {
        Some(time) => time,
        None => {
            log::warn!("Local time {} does not exist in the requested zone", naive);
            return None;
        }
    };

    let mut record = CanonicalRecord::new(time);
    for entry in mapping.fields {
        let value = raw
            .get(entry.raw)
            .and_then(|v| v.as_f64())
            .map(|v| entry.conversion.apply(v));
        if let Some(value) = value.filter(|v| v.is_finite()) {
            record.values.insert(entry.field, value);
        }
    }
    Some(record)
}

/// Iterator turning a raw record source into canonical records
pub struct Normalizer<S> {
    source: S,
    mapping: &'static FormatMapping,
    tz: Option<Tz>,
    unresolved: usize,
}

impl<S: RecordSource> Normalizer<S> {
    pub fn new(source: S, tz: Option<Tz>) -> Self {
        let mapping = FormatMapping::for_format(source.header().format);
        Self {
            source,
            mapping,
            tz,
            unresolved: 0,
        }
    }

    /// Header metadata of the underlying source
    pub fn header(&self) -> &HeaderInfo {
        self.source.header()
    }

    /// Records dropped for lacking a resolvable time
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    /// Malformed records skipped by the decoder
    pub fn skipped(&self) -> usize {
        self.source.skipped()
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: RecordSource> Iterator for Normalizer<S> {
    type Item = Result<CanonicalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.source.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e)),
            };
            match normalize_record(&raw, self.source.header(), self.mapping, self.tz) {
                Some(record) => return Some(Ok(record)),
                None => {
                    self.unresolved += 1;
                    log::trace!("Dropping record without a resolvable time");
                }
            }
        }
    }
}
