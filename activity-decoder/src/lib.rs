//! Activity Decoder Library
//!
//! A stateless, reusable library for decoding exercise recordings (FIT, SRM,
//! TCX, GPX, PWX) into one time-indexed table of physical measurements with
//! unit-aware columns and derived training metrics.
//!
//! # Architecture
//!
//! Data flows through five stages, each usable on its own:
//! - [`cursor`]: sequential byte and XML readers
//! - [`formats`]: one decoder per format, each a lazy iterator of raw records
//!   plus header metadata
//! - [`normalizer`]: per-format field mapping onto the canonical vocabulary and
//!   timestamp resolution
//! - [`table`]: materialization into an [`ActivityTable`]
//! - [`columns`] and [`metrics`]: unit conversions, ascent/descent, normalized
//!   power, work, W' balance, pace and gap-aware recording time
//! - [`profile`]: mean-maximal power profiles and their melding
//!
//! Each file is decoded by its own pipeline with no shared state, so callers
//! may decode many files in parallel.
//!
//! # Example Usage
//!
//! ```no_run
//! use activity_decoder::{Decoder, DecoderConfig};
//! use std::path::Path;
//!
//! let config = DecoderConfig::new()
//!     .with_timezone("Europe/Paris")
//!     .with_strict_time(false);
//! let decoder = Decoder::with_config(config).unwrap();
//!
//! let table = decoder.decode_file(Path::new("ride.tcx")).unwrap();
//! println!("{} rows over {}s", table.len(), table.elapsed().num_seconds());
//!
//! if let Ok(altitude) = table.column("altitude") {
//!     println!("climbed {:.0} m", altitude.ascent().unwrap());
//! }
//! if let Ok(power) = table.column("power") {
//!     println!("NP {:?} W", power.normalized_power().unwrap());
//! }
//! ```

// Public modules
pub mod columns;
pub mod config;
pub mod cursor;
pub mod decoder;
pub mod formats;
pub mod metrics;
pub mod normalizer;
pub mod profile;
pub mod table;
pub mod types;

// Re-export main types for convenience
pub use columns::{Column, ColumnKind};
pub use config::DecoderConfig;
pub use decoder::{decode, CanonicalStream, Decoder};
pub use formats::RecordSource;
pub use metrics::{Ewa, SmoothExt};
pub use normalizer::Normalizer;
pub use profile::{PowerProfile, ProfileEntry};
pub use table::{ActivitySummary, ActivityTable, ColumnSummary, Frame, Materializer};
pub use types::{
    CanonicalRecord, DecoderError, DeviceInfo, ErrorKind, Field, Format, HeaderInfo, RawRecord,
    RawTime, RawValue, RecordTime, Result, TimeBasis,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_library_basics() {
        // Smoke test: ensure we can create a decoder
        let decoder = Decoder::new();
        assert!(decoder.config().timezone.is_none());
        assert_eq!(Field::VOCABULARY_VERSION, 1);
    }
}
