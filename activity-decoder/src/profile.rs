//! Mean-maximal power profiles
//!
//! A profile maps a duration in seconds to the best average power held for
//! that long. Profiles of several activities meld into a record profile that
//! remembers which activity set each entry.

use crate::table::ActivityTable;
use crate::types::{DecoderError, Field, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Durations used when the caller has no preference
pub const DEFAULT_DURATIONS: &[u32] = &[1, 5, 10, 30, 60, 300, 600, 1200, 3600];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileEntry {
    /// Best mean power in watts, `None` when the activity is shorter
    pub power: Option<f64>,
    /// Activity that set the entry; `None` for the profile's own activity
    pub came_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerProfile {
    pub id: String,
    pub entries: BTreeMap<u32, ProfileEntry>,
}

impl PowerProfile {
    /// Profile of one activity over `durations`
    ///
    /// The id defaults to the activity's first timestamp.
    pub fn from_table(table: &ActivityTable, durations: &[u32], id: Option<String>) -> Result<Self> {
        let power = table
            .field(Field::Power)
            .ok_or_else(|| DecoderError::MissingColumn(Field::Power.as_str().to_string()))?;
        let id = id
            .or_else(|| table.timestamps().first().map(ToString::to_string))
            .unwrap_or_default();

        let mut entries = BTreeMap::new();
        for &secs in durations {
            let entry = ProfileEntry {
                power: power.mean_max(secs)?,
                came_from: None,
            };
            entries.insert(secs, entry);
        }
        log::debug!("Power profile '{}' over {} durations", id, entries.len());
        Ok(Self { id, entries })
    }

    pub fn get(&self, secs: u32) -> Option<f64> {
        self.entries.get(&secs).and_then(|e| e.power)
    }

    /// Best of both profiles per duration
    ///
    /// Durations present in either profile are kept. Ties go to `self`.
    /// Every entry with a power names the activity it came from.
    pub fn meld(&self, other: &PowerProfile) -> PowerProfile {
        let sourced = |entry: &ProfileEntry, id: &str| ProfileEntry {
            power: entry.power,
            came_from: entry
                .power
                .map(|_| entry.came_from.clone().unwrap_or_else(|| id.to_string())),
        };
        let own = |entry: &ProfileEntry| sourced(entry, self.id.as_str());
        let theirs = |entry: &ProfileEntry| sourced(entry, other.id.as_str());

        let mut entries: BTreeMap<u32, ProfileEntry> =
            self.entries.iter().map(|(secs, e)| (*secs, own(e))).collect();
        for (secs, entry) in &other.entries {
            let wins = match (entries.get(secs).and_then(|e| e.power), entry.power) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(mine), Some(them)) => them > mine,
            };
            if wins || !entries.contains_key(secs) {
                entries.insert(*secs, theirs(entry));
            }
        }

        PowerProfile {
            id: self.id.clone(),
            entries,
        }
    }
}
