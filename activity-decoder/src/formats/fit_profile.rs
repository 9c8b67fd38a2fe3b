//! Subset of the FIT global profile used by the activity decoder
//!
//! Only the messages that feed an activity table are described here. Every
//! other global message is still parsed (its definition gives the byte layout)
//! but its content is discarded.

pub const FILE_ID: u16 = 0;
pub const LAP: u16 = 19;
pub const RECORD: u16 = 20;
pub const ACTIVITY: u16 = 34;

/// Field number shared by every message that carries a timestamp
pub const TIMESTAMP_FIELD: u8 = 253;

/// file_id fields
pub const FILE_ID_MANUFACTURER: u8 = 1;
pub const FILE_ID_PRODUCT: u8 = 2;
pub const FILE_ID_SERIAL: u8 = 3;
pub const FILE_ID_TIME_CREATED: u8 = 4;

/// activity fields
pub const ACTIVITY_LOCAL_TIMESTAMP: u8 = 5;

/// Seconds between the Unix epoch and the FIT epoch (1989-12-31T00:00:00Z)
pub const FIT_EPOCH_OFFSET: i64 = 631_065_600;

/// Scaling applied to a raw record field: `value = raw / scale - offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldProfile {
    pub name: &'static str,
    pub scale: f64,
    pub offset: f64,
}

impl FieldProfile {
    const fn new(name: &'static str, scale: f64, offset: f64) -> Self {
        Self { name, scale, offset }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw / self.scale - self.offset
    }
}

/// Profile entry for a field of the `record` message
pub fn record_field(number: u8) -> Option<FieldProfile> {
    let profile = match number {
        0 => FieldProfile::new("position_lat", 1.0, 0.0),      // semicircles
        1 => FieldProfile::new("position_long", 1.0, 0.0),     // semicircles
        2 => FieldProfile::new("altitude", 5.0, 500.0),        // m
        3 => FieldProfile::new("heart_rate", 1.0, 0.0),        // bpm
        4 => FieldProfile::new("cadence", 1.0, 0.0),           // rpm
        5 => FieldProfile::new("distance", 100.0, 0.0),        // m
        6 => FieldProfile::new("speed", 1000.0, 0.0),          // m/s
        7 => FieldProfile::new("power", 1.0, 0.0),             // W
        13 => FieldProfile::new("temperature", 1.0, 0.0),      // degC
        29 => FieldProfile::new("accumulated_power", 1.0, 0.0),
        53 => FieldProfile::new("fractional_cadence", 128.0, 0.0),
        73 => FieldProfile::new("enhanced_speed", 1000.0, 0.0),
        78 => FieldProfile::new("enhanced_altitude", 5.0, 500.0),
        _ => return None,
    };
    Some(profile)
}

/// Name of a global message, for diagnostics
pub fn message_name(global: u16) -> Option<&'static str> {
    match global {
        FILE_ID => Some("file_id"),
        18 => Some("session"),
        LAP => Some("lap"),
        RECORD => Some("record"),
        21 => Some("event"),
        23 => Some("device_info"),
        ACTIVITY => Some("activity"),
        49 => Some("file_creator"),
        _ => None,
    }
}

/// Name of a manufacturer id from the `file_id` message
pub fn manufacturer_name(id: u32) -> Option<&'static str> {
    match id {
        1 => Some("garmin"),
        6 => Some("srm"),
        7 => Some("quarq"),
        15 => Some("dynastream"),
        23 => Some("suunto"),
        32 => Some("wahoo_fitness"),
        69 => Some("stages_cycling"),
        89 => Some("tacx"),
        255 => Some("development"),
        260 => Some("zwift"),
        294 => Some("coros"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_altitude_scaling() {
        let alt = record_field(2).unwrap();
        // 2600 / 5 - 500 = 20 m
        assert_eq!(alt.apply(2600.0), 20.0);
        assert_eq!(record_field(78).unwrap().apply(2600.0), 20.0);
    }

    #[test]
    fn test_unknown_entries() {
        assert!(record_field(200).is_none());
        assert_eq!(message_name(RECORD), Some("record"));
        assert_eq!(message_name(9999), None);
        assert_eq!(manufacturer_name(1), Some("garmin"));
        assert_eq!(manufacturer_name(4242), None);
    }
}
