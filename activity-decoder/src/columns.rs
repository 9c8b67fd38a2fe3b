//! Unit-aware column model
//!
//! A column's physical quantity is fixed by its canonical field name when the
//! table is built. The quantity decides the base unit, the registered
//! conversion units, and which derived metrics the column offers. A renamed
//! column no longer matches a canonical name and degrades to a plain numeric
//! sequence.

use crate::metrics;
use crate::types::{duration_secs, DecoderError, Field, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Physical quantity bound to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// No unit semantics (lap counters, heart rate, cadence, renamed columns)
    PlainNumeric,
    Distance,
    Speed,
    Altitude,
    Power,
    Temperature,
    /// Time per distance, the inverse of speed (derived, not decoded)
    Pace,
}

const METERS_PER_MILE: f64 = 1609.344;
const FEET_PER_METER: f64 = 3.280_839_895;

// (unit, factor) where value_in_unit = value_in_base * factor; base unit first
static DISTANCE_UNITS: &[(&str, f64)] = &[
    ("m", 1.0),
    ("km", 0.001),
    ("miles", 1.0 / METERS_PER_MILE),
    ("ft", FEET_PER_METER),
];
static ALTITUDE_UNITS: &[(&str, f64)] = &[("m", 1.0), ("ft", FEET_PER_METER), ("km", 0.001)];
static SPEED_UNITS: &[(&str, f64)] = &[
    ("m/s", 1.0),
    ("km/h", 3.6),
    ("mph", 3600.0 / METERS_PER_MILE),
];
static POWER_UNITS: &[(&str, f64)] = &[("W", 1.0), ("kW", 0.001)];
static TEMPERATURE_UNITS: &[(&str, f64)] = &[("degC", 1.0)];
static PACE_UNITS: &[(&str, f64)] = &[
    ("s/m", 1.0),
    ("min/km", 1000.0 / 60.0),
    ("min/mile", METERS_PER_MILE / 60.0),
];

impl ColumnKind {
    /// Quantity bound to a canonical field
    pub fn for_field(field: Field) -> Self {
        match field {
            Field::Distance => ColumnKind::Distance,
            Field::Speed => ColumnKind::Speed,
            Field::Altitude => ColumnKind::Altitude,
            Field::Power => ColumnKind::Power,
            Field::Temperature => ColumnKind::Temperature,
            Field::Lap
            | Field::Cadence
            | Field::HeartRate
            | Field::Latitude
            | Field::Longitude => ColumnKind::PlainNumeric,
        }
    }

    /// Quantity bound to a column name; non-canonical names are plain
    pub fn for_name(name: &str) -> Self {
        Field::from_name(name).map_or(ColumnKind::PlainNumeric, ColumnKind::for_field)
    }

    /// Registered units and their factors from the base unit
    pub fn units(&self) -> &'static [(&'static str, f64)] {
        match self {
            ColumnKind::PlainNumeric => &[],
            ColumnKind::Distance => DISTANCE_UNITS,
            ColumnKind::Speed => SPEED_UNITS,
            ColumnKind::Altitude => ALTITUDE_UNITS,
            ColumnKind::Power => POWER_UNITS,
            ColumnKind::Temperature => TEMPERATURE_UNITS,
            ColumnKind::Pace => PACE_UNITS,
        }
    }

    pub fn base_unit(&self) -> Option<&'static str> {
        self.units().first().map(|(unit, _)| *unit)
    }

    /// Multiplier from the base unit to `unit`
    pub fn factor(&self, unit: &str) -> Option<f64> {
        self.units()
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
    }

    /// Express a base-unit value in `unit`
    pub fn from_base(&self, value: f64, unit: &str) -> Option<f64> {
        self.factor(unit).map(|f| value * f)
    }

    /// Express a value given in `unit` in the base unit
    pub fn to_base(&self, value: f64, unit: &str) -> Option<f64> {
        self.factor(unit).map(|f| value / f)
    }
}

/// Read-only view of one table column
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    name: &'a str,
    kind: ColumnKind,
    values: &'a [Option<f64>],
    offsets: &'a [Duration],
    np_span: f64,
}

impl<'a> Column<'a> {
    pub(crate) fn new(
        name: &'a str,
        kind: ColumnKind,
        values: &'a [Option<f64>],
        offsets: &'a [Duration],
        np_span: f64,
    ) -> Self {
        Self {
            name,
            kind,
            values,
            offsets,
            np_span,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Base unit, or `None` for plain columns
    pub fn unit(&self) -> Option<&'static str> {
        self.kind.base_unit()
    }

    /// Values in the base unit; `None` marks a row with no value
    pub fn values(&self) -> &'a [Option<f64>] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterator over the present values
    pub fn present(&self) -> impl Iterator<Item = f64> + 'a {
        self.values.iter().flatten().copied()
    }

    pub fn first(&self) -> Option<f64> {
        self.present().next()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.iter().rev().flatten().copied().next()
    }

    pub fn max(&self) -> Option<f64> {
        self.present().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.present().reduce(f64::min)
    }

    /// Mean of the present values
    pub fn mean(&self) -> Option<f64> {
        let (count, sum) = self.present().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
        (count > 0).then(|| sum / count as f64)
    }

    /// Values converted to `unit`
    ///
    /// Fails with [`DecoderError::UnitError`] when the unit is not registered
    /// for this column's quantity (always, for a plain column).
    pub fn to_unit(&self, unit: &str) -> Result<Vec<Option<f64>>> {
        let factor = self.kind.factor(unit).ok_or_else(|| DecoderError::UnitError {
            column: self.name.to_string(),
            unit: unit.to_string(),
        })?;
        Ok(self.values.iter().map(|v| v.map(|v| v * factor)).collect())
    }

    pub fn km(&self) -> Result<Vec<Option<f64>>> {
        self.to_unit("km")
    }

    pub fn miles(&self) -> Result<Vec<Option<f64>>> {
        self.to_unit("miles")
    }

    fn require(&self, kind: ColumnKind, metric: &str) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(DecoderError::UnsupportedMetric {
                column: self.name.to_string(),
                metric: metric.to_string(),
            })
        }
    }

    /// Total climb in meters (altitude columns only)
    pub fn ascent(&self) -> Result<f64> {
        self.require(ColumnKind::Altitude, "ascent")?;
        Ok(metrics::ascent(self.values))
    }

    /// Total descent in meters (altitude columns only)
    pub fn descent(&self) -> Result<f64> {
        self.require(ColumnKind::Altitude, "descent")?;
        Ok(metrics::descent(self.values))
    }

    /// Normalized power over the table's smoothing window (power columns only)
    pub fn normalized_power(&self) -> Result<Option<f64>> {
        self.normalized_power_with_span(self.np_span)
    }

    /// Normalized power with an explicit smoothing span in samples
    pub fn normalized_power_with_span(&self, span: f64) -> Result<Option<f64>> {
        self.require(ColumnKind::Power, "normalized_power")?;
        Ok(metrics::normalized_power(self.values, span))
    }

    /// Energy per row in joules: power times the preceding interval (power columns only)
    pub fn work(&self) -> Result<Vec<Option<f64>>> {
        self.require(ColumnKind::Power, "work")?;
        let mut out = Vec::with_capacity(self.values.len());
        for (i, value) in self.values.iter().enumerate() {
            let joules = match (i.checked_sub(1), value) {
                (Some(prev), Some(watts)) => {
                    let dt = duration_secs(self.offsets[i] - self.offsets[prev]);
                    Some(watts * dt)
                }
                _ => None,
            };
            out.push(joules);
        }
        Ok(out)
    }

    /// Total energy in joules (power columns only)
    pub fn total_work(&self) -> Result<f64> {
        Ok(self.work()?.into_iter().flatten().sum())
    }

    /// W' expended in kJ per row above critical power `cp` (power columns only)
    ///
    /// With `w_prime_kj` the remaining balance `w_prime_kj - expended` is
    /// returned instead.
    pub fn wbalance(&self, cp: f64, w_prime_kj: Option<f64>) -> Result<Vec<f64>> {
        self.require(ColumnKind::Power, "wbalance")?;
        let expended = metrics::wbalance(self.values, self.offsets, cp);
        Ok(match w_prime_kj {
            Some(w_prime) => expended.into_iter().map(|kj| w_prime - kj).collect(),
            None => expended,
        })
    }

    /// Best mean power over `seconds` on a 1 s grid (power columns only)
    pub fn mean_max(&self, seconds: u32) -> Result<Option<f64>> {
        self.require(ColumnKind::Power, "mean_max")?;
        Ok(metrics::mean_max(&self.resampled(Duration::seconds(1)), seconds as usize))
    }

    /// Seconds per meter for each row (speed columns only)
    ///
    /// Rows at a standstill have no pace.
    pub fn to_pace(&self) -> Result<Vec<Option<f64>>> {
        self.require(ColumnKind::Speed, "pace")?;
        Ok(self
            .values
            .iter()
            .map(|v| v.filter(|speed| *speed > 0.0).map(|speed| 1.0 / speed))
            .collect())
    }

    /// Bin means on a regular grid of width `step`, counted from the first row
    pub fn resampled(&self, step: Duration) -> Vec<Option<f64>> {
        metrics::resample(self.values, self.offsets, step)
    }

    /// Trailing mean over `seconds` on a 1 s grid
    ///
    /// The result is indexed by whole seconds from the first row, not by row.
    pub fn rollmean(&self, seconds: u32) -> Vec<Option<f64>> {
        metrics::rolling_mean(&self.resampled(Duration::seconds(1)), seconds as usize)
    }
}
