//! Decoder configuration types
//!
//! This module defines the knobs the decoding pipeline exposes: timestamp
//! localization, the strict time-order check, and the parameters of the
//! derived metrics computed on the resulting table.

use crate::types::{DecoderError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// IANA timezone name used to localize timestamps (None = leave naive)
    #[serde(default)]
    pub timezone: Option<String>,

    /// Fail fast when a record's time decreases (default: flag and continue)
    #[serde(default)]
    pub strict_time: bool,

    /// Gap threshold for recording time, as a multiple of the modal sampling interval
    #[serde(default = "default_gap_factor")]
    pub gap_factor: f64,

    /// Normalized power smoothing window in seconds
    #[serde(default = "default_np_window")]
    pub np_window_secs: f64,
}

fn default_gap_factor() -> f64 {
    2.0
}

fn default_np_window() -> f64 {
    30.0
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            strict_time: false,
            gap_factor: default_gap_factor(),
            np_window_secs: default_np_window(),
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: localize timestamps into the named zone
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// Builder method: enable or disable the strict time-order check
    pub fn with_strict_time(mut self, enabled: bool) -> Self {
        self.strict_time = enabled;
        self
    }

    /// Builder method: set the recording-time gap factor
    pub fn with_gap_factor(mut self, factor: f64) -> Self {
        self.gap_factor = factor;
        self
    }

    /// Builder method: set the normalized power window
    pub fn with_np_window(mut self, secs: f64) -> Self {
        self.np_window_secs = secs;
        self
    }

    /// Parse the configured timezone, if any
    pub fn tz(&self) -> Result<Option<Tz>> {
        match &self.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map(Some)
                .map_err(|_| DecoderError::InvalidTimezone(name.clone())),
            None => Ok(None),
        }
    }

    /// Check the configuration before any file is opened
    pub fn validate(&self) -> Result<()> {
        self.tz()?;
        if !(self.gap_factor.is_finite() && self.gap_factor > 0.0) {
            return Err(DecoderError::ConfigError(format!(
                "gap factor must be positive, got {}",
                self.gap_factor
            )));
        }
        if !(self.np_window_secs.is_finite() && self.np_window_secs > 0.0) {
            return Err(DecoderError::ConfigError(format!(
                "normalized power window must be positive, got {}",
                self.np_window_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_timezone("Europe/London")
            .with_strict_time(true)
            .with_gap_factor(3.0)
            .with_np_window(20.0);

        assert_eq!(config.timezone.as_deref(), Some("Europe/London"));
        assert!(config.strict_time);
        assert_eq!(config.gap_factor, 3.0);
        assert_eq!(config.np_window_secs, 20.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.tz().unwrap(), Some(chrono_tz::Europe::London));
    }

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::new();
        assert_eq!(config.timezone, None);
        assert!(!config.strict_time);
        assert_eq!(config.gap_factor, 2.0);
        assert_eq!(config.np_window_secs, 30.0);
        assert_eq!(config.tz().unwrap(), None);
    }

    #[test]
    fn test_invalid_timezone() {
        let config = DecoderConfig::new().with_timezone("Mars/Olympus_Mons");
        assert!(matches!(
            config.validate(),
            Err(DecoderError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_invalid_factors() {
        let gap = DecoderConfig::new().with_gap_factor(0.0).validate().unwrap_err();
        assert!(matches!(gap, DecoderError::ConfigError(_)));
        assert_eq!(gap.kind(), crate::types::ErrorKind::Usage);
        let window = DecoderConfig::new().with_np_window(f64::NAN).validate().unwrap_err();
        assert!(matches!(window, DecoderError::ConfigError(_)));
        assert!(DecoderConfig::new().with_np_window(-1.0).validate().is_err());
    }
}
