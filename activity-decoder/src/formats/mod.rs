//! Activity file format decoders (FIT, SRM, TCX, GPX, PWX)
//!
//! This module contains one decoder per supported format. Each decoder reads
//! its header eagerly (so a bad signature fails before any record is produced)
//! and then implements a lazy, single-pass iterator over raw records.

use crate::types::{DecoderError, Format, HeaderInfo, RawRecord, Result};
use chrono::{DateTime, NaiveDateTime};
use std::io::{self, BufReader, Read};

pub mod fit;
mod fit_profile;
pub mod gpx;
pub mod pwx;
pub mod srm;
pub mod tcx;

// Re-export decoder types
pub use fit::FitDecoder;
pub use gpx::GpxDecoder;
pub use pwx::PwxDecoder;
pub use srm::SrmDecoder;
pub use tcx::TcxDecoder;

/// Common trait for all format decoders
///
/// Binary decoders stop after the first malformed record (its error is the
/// last item they yield). Markup decoders skip malformed points and count them.
pub trait RecordSource: Iterator<Item = Result<RawRecord>> {
    /// Header metadata seen so far
    fn header(&self) -> &HeaderInfo;

    /// Number of malformed records skipped so far
    fn skipped(&self) -> usize {
        0
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn header(&self) -> &HeaderInfo {
        (**self).header()
    }

    fn skipped(&self) -> usize {
        (**self).skipped()
    }
}

/// Open a decoder for `format` over `reader`
pub fn open_source<'a, R: Read + 'a>(
    format: Format,
    reader: R,
) -> Result<Box<dyn RecordSource + 'a>> {
    log::debug!("Opening {} decoder", format);
    match format {
        Format::Fit => Ok(Box::new(FitDecoder::new(reader)?)),
        Format::Srm => Ok(Box::new(SrmDecoder::new(reader)?)),
        Format::Tcx => Ok(Box::new(TcxDecoder::new(BufReader::new(reader))?)),
        Format::Gpx => Ok(Box::new(GpxDecoder::new(BufReader::new(reader))?)),
        Format::Pwx => Ok(Box::new(PwxDecoder::new(BufReader::new(reader))?)),
    }
}

/// Map an I/O failure while reading a header
pub(crate) fn header_error(format: Format, what: &str, err: io::Error) -> DecoderError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DecoderError::DecodeError(format!("{} header truncated while reading {}", format, what))
    } else {
        DecoderError::IoError(err)
    }
}

/// Map an I/O failure while reading a record
pub(crate) fn record_error(format: Format, index: usize, err: io::Error) -> DecoderError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DecoderError::RecordError(format!("{} record {} truncated", format, index))
    } else {
        DecoderError::IoError(err)
    }
}

/// Parse an ISO-8601 timestamp into a UTC wall-clock time
///
/// Accepts times with or without fractional seconds. An explicit offset (or
/// `Z`) is honoured; a time with no zone designator is taken as UTC.
pub(crate) fn parse_utc_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    parse_floating_timestamp(text)
}

/// Parse an ISO-8601 timestamp that carries no zone designator
pub(crate) fn parse_floating_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_parse_utc_with_and_without_fraction() {
        let plain = parse_utc_timestamp("2015-03-24T15:19:06Z").unwrap();
        let frac = parse_utc_timestamp("2015-03-24T15:19:06.250Z").unwrap();
        let expected = NaiveDate::from_ymd_opt(2015, 3, 24)
            .unwrap()
            .and_hms_opt(15, 19, 6)
            .unwrap();
        assert_eq!(plain, expected);
        assert_eq!(frac.with_nanosecond(0).unwrap(), expected);
        assert_eq!(frac.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_parse_utc_honours_offset() {
        let t = parse_utc_timestamp("2015-03-24T17:19:06+02:00").unwrap();
        assert_eq!(t, parse_utc_timestamp("2015-03-24T15:19:06Z").unwrap());
    }

    #[test]
    fn test_parse_without_zone() {
        let t = parse_utc_timestamp("2015-03-24T15:19:06").unwrap();
        assert_eq!(t, parse_floating_timestamp("2015-03-24T15:19:06.000").unwrap());
        assert!(parse_utc_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_header_error_mapping() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            header_error(Format::Fit, "signature", eof),
            DecoderError::DecodeError(_)
        ));
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            record_error(Format::Srm, 3, eof),
            DecoderError::RecordError(_)
        ));
    }
}
