//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! The Decoder struct is the entry point for turning activity files into
//! tables, or into raw and canonical record streams for callers who want rows
//! without building a table.

use crate::config::DecoderConfig;
use crate::formats::{self, RecordSource};
use crate::normalizer::Normalizer;
use crate::table::{ActivityTable, Materializer};
use crate::types::{DecoderError, Format, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Canonical record stream over a boxed raw record source
pub type CanonicalStream<'a> = Normalizer<Box<dyn RecordSource + 'a>>;

/// The main decoder struct - entry point for all decoding operations
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Create a decoder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with the given configuration
    ///
    /// The configuration is validated up front, so an unknown timezone fails
    /// here rather than at the first file.
    pub fn with_config(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a file, selecting the format from its extension
    ///
    /// # Example
    /// ```no_run
    /// use activity_decoder::{Decoder, DecoderConfig};
    /// use std::path::Path;
    ///
    /// let decoder = Decoder::with_config(DecoderConfig::new().with_timezone("Europe/London")).unwrap();
    /// let table = decoder.decode_file(Path::new("ride.fit")).unwrap();
    /// let distance = table.column("distance").unwrap();
    /// println!("{:.1} miles", distance.miles().unwrap().last().copied().flatten().unwrap_or(0.0));
    /// ```
    pub fn decode_file(&self, path: &Path) -> Result<ActivityTable> {
        log::info!("Decoding activity file: {:?}", path);

        let format = Format::from_path(path).ok_or_else(|| {
            DecoderError::UnsupportedFormat(format!(
                "cannot tell the format of {:?} from its extension",
                path
            ))
        })?;
        log::debug!("Detected {} file format", format);

        let file = File::open(path)?;
        self.decode_reader(format, BufReader::new(file))
    }

    /// Decode a byte stream of a known format into a table
    pub fn decode_reader<R: Read>(&self, format: Format, reader: R) -> Result<ActivityTable> {
        let mut stream = self.canonical_records(format, reader)?;

        let mut materializer = Materializer::new(self.config.strict_time);
        for record in stream.by_ref() {
            materializer.push(record?)?;
        }

        let dropped = stream.skipped() + stream.unresolved();
        if dropped > 0 {
            log::warn!(
                "{} decode dropped {} records ({} malformed, {} without a resolvable time)",
                format,
                dropped,
                stream.skipped(),
                stream.unresolved()
            );
        }

        let header = stream.header().clone();
        let mut table = materializer.finish(header, &self.config)?;
        table.set_dropped_records(dropped);
        Ok(table)
    }

    /// Raw record stream of a known format
    ///
    /// The header is read (and validated) before this returns; records are
    /// decoded lazily as the iterator is advanced.
    pub fn records<'a, R: Read + 'a>(
        &self,
        format: Format,
        reader: R,
    ) -> Result<Box<dyn RecordSource + 'a>> {
        formats::open_source(format, reader)
    }

    /// Canonical record stream of a known format
    pub fn canonical_records<'a, R: Read + 'a>(
        &self,
        format: Format,
        reader: R,
    ) -> Result<CanonicalStream<'a>> {
        let tz = self.config.tz()?;
        let source = self.records(format, reader)?;
        Ok(Normalizer::new(source, tz))
    }
}

/// Decode a byte stream, optionally localizing times into `timezone`
pub fn decode<R: Read>(format: Format, reader: R, timezone: Option<&str>) -> Result<ActivityTable> {
    let mut config = DecoderConfig::new();
    if let Some(tz) = timezone {
        config = config.with_timezone(tz);
    }
    Decoder::with_config(config)?.decode_reader(format, reader)
}
