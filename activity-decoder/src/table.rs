//! Table materializer and the activity table
//!
//! [`Materializer`] consumes the canonical record stream and builds the time
//! index and one column per canonical field seen. [`ActivityTable`] owns a
//! generic [`Frame`] plus a side map binding column names to their
//! [`ColumnKind`]; derived metrics are reached through [`Column`] views.

use crate::columns::{Column, ColumnKind};
use crate::config::DecoderConfig;
use crate::metrics;
use crate::types::{
    duration_secs, secs_duration, CanonicalRecord, DecoderError, DeviceInfo, Field, Format,
    HeaderInfo, RecordTime, Result,
};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Generic ordered table: a time index and named optional-value columns
#[derive(Debug, Clone, Default)]
pub struct Frame {
    index: Vec<RecordTime>,
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl Frame {
    pub fn new(index: Vec<RecordTime>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[RecordTime] {
        &self.index
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.entry(name).map(|(_, values)| values)
    }

    /// Stored name and values of a column
    pub fn entry(&self, name: &str) -> Option<(&str, &[Option<f64>])> {
        self.position(name).map(|i| {
            let (name, values) = &self.columns[i];
            (name.as_str(), values.as_slice())
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Append a column; its length must match the index
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(DecoderError::MaterializationError(format!(
                "column '{}' has {} rows, table has {}",
                name,
                values.len(),
                self.index.len()
            )));
        }
        if self.position(&name).is_some() {
            return Err(DecoderError::MaterializationError(format!(
                "column '{}' already exists",
                name
            )));
        }
        self.columns.push((name, values));
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if self.position(to).is_some() {
            return Err(DecoderError::MaterializationError(format!(
                "column '{}' already exists",
                to
            )));
        }
        let i = self
            .position(from)
            .ok_or_else(|| DecoderError::MissingColumn(from.to_string()))?;
        self.columns[i].0 = to.to_string();
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Vec<Option<f64>>> {
        let i = self
            .position(name)
            .ok_or_else(|| DecoderError::MissingColumn(name.to_string()))?;
        Ok(self.columns.remove(i).1)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }
}

/// Name of the column added by [`ActivityTable::add_pace_column`]
pub const PACE_COLUMN: &str = "pace";

/// Incremental builder of an [`ActivityTable`]
#[derive(Debug, Default)]
pub struct Materializer {
    strict: bool,
    index: Vec<RecordTime>,
    columns: BTreeMap<Field, Vec<Option<f64>>>,
    non_monotonic: Vec<usize>,
}

impl Materializer {
    /// In strict mode a decreasing record time fails the build
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Append one record as the next row
    pub fn push(&mut self, record: CanonicalRecord) -> Result<()> {
        let row = self.index.len();

        if let Some(last) = self.index.last() {
            if record.time < *last {
                if self.strict {
                    return Err(DecoderError::MaterializationError(format!(
                        "record {} goes back in time ({} after {})",
                        row, record.time, last
                    )));
                }
                log::warn!(
                    "Record {} goes back in time ({} after {}), keeping it in file order",
                    row,
                    record.time,
                    last
                );
                self.non_monotonic.push(row);
            }
        }

        for (field, value) in record.values {
            self.columns
                .entry(field)
                .or_insert_with(|| vec![None; row])
                .push(Some(value));
        }
        for column in self.columns.values_mut() {
            if column.len() == row {
                column.push(None);
            }
        }
        self.index.push(record.time);
        Ok(())
    }

    /// Build the table; fails when no row was pushed
    pub fn finish(self, header: HeaderInfo, config: &DecoderConfig) -> Result<ActivityTable> {
        let first = *self.index.first().ok_or_else(|| {
            DecoderError::MaterializationError(format!(
                "{} source produced no records with a resolvable time",
                header.format
            ))
        })?;

        let offsets: Vec<Duration> = self
            .index
            .iter()
            .map(|t| t.signed_duration_since(&first))
            .collect();

        let mut frame = Frame::new(self.index);
        let mut bindings = HashMap::new();
        for (field, values) in self.columns {
            bindings.insert(field.as_str().to_string(), ColumnKind::for_field(field));
            frame.insert_column(field.as_str(), values)?;
        }

        let modal_interval = metrics::modal_interval(&offsets);
        log::info!(
            "Built {} table: {} rows, {} columns",
            header.format,
            frame.len(),
            bindings.len()
        );

        Ok(ActivityTable {
            frame,
            offsets,
            bindings,
            header,
            gap_factor: config.gap_factor,
            np_window_secs: config.np_window_secs,
            modal_interval,
            non_monotonic: self.non_monotonic,
            dropped: 0,
        })
    }
}

/// Build a table from a canonical record stream
pub fn materialize<I>(records: I, header: HeaderInfo, config: &DecoderConfig) -> Result<ActivityTable>
where
    I: IntoIterator<Item = Result<CanonicalRecord>>,
{
    let mut materializer = Materializer::new(config.strict_time);
    for record in records {
        materializer.push(record?)?;
    }
    materializer.finish(header, config)
}

/// Time-indexed table of one decoded activity
#[derive(Debug, Clone)]
pub struct ActivityTable {
    frame: Frame,
    offsets: Vec<Duration>,
    bindings: HashMap<String, ColumnKind>,
    header: HeaderInfo,
    gap_factor: f64,
    np_window_secs: f64,
    modal_interval: Option<Duration>,
    non_monotonic: Vec<usize>,
    dropped: usize,
}

impl ActivityTable {
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Header metadata as it stood when decoding finished
    pub fn header(&self) -> &HeaderInfo {
        &self.header
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn timestamps(&self) -> &[RecordTime] {
        self.frame.index()
    }

    /// Time of each row since the first row
    pub fn time_offsets(&self) -> &[Duration] {
        &self.offsets
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame.column_names().collect()
    }

    /// View of a column; unit semantics come from the binding made at build time
    pub fn column(&self, name: &str) -> Result<Column<'_>> {
        let (name, values) = self
            .frame
            .entry(name)
            .ok_or_else(|| DecoderError::MissingColumn(name.to_string()))?;
        let kind = self
            .bindings
            .get(name)
            .copied()
            .unwrap_or(ColumnKind::PlainNumeric);
        Ok(Column::new(name, kind, values, &self.offsets, self.np_span()))
    }

    /// View of a canonical field's column, if the source had it
    pub fn field(&self, field: Field) -> Option<Column<'_>> {
        self.column(field.as_str()).ok()
    }

    /// Lap or segment number per row, when the source delimits laps
    pub fn laps(&self) -> Option<Vec<Option<u32>>> {
        self.field(Field::Lap)
            .map(|col| col.values().iter().map(|v| v.map(|n| n as u32)).collect())
    }

    /// Rename a column; the new name carries no unit binding
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        self.frame.rename_column(from, to)?;
        self.bindings.remove(from);
        self.bindings.insert(to.to_string(), ColumnKind::PlainNumeric);
        log::debug!("Renamed column '{}' to '{}', unit binding dropped", from, to);
        Ok(())
    }

    /// Values of a column the caller needs, or `MissingColumn`
    fn require(&self, field: Field) -> Result<&[Option<f64>]> {
        self.frame
            .column(field.as_str())
            .ok_or_else(|| DecoderError::MissingColumn(field.as_str().to_string()))
    }

    /// Vertical ascent rate in m/s between adjacent rows
    pub fn vam(&self) -> Result<Vec<Option<f64>>> {
        Ok(metrics::vam(self.require(Field::Altitude)?, &self.offsets))
    }

    /// Gradient (rise over run, as a fraction) between adjacent rows
    pub fn gradient(&self) -> Result<Vec<Option<f64>>> {
        Ok(metrics::gradient(
            self.require(Field::Altitude)?,
            self.require(Field::Distance)?,
        ))
    }

    /// Great-circle distance in meters from the previous fix
    pub fn step_distances(&self) -> Result<Vec<Option<f64>>> {
        self.between_fixes(metrics::haversine)
    }

    /// Initial bearing in degrees from the previous fix
    pub fn bearings(&self) -> Result<Vec<Option<f64>>> {
        self.between_fixes(metrics::bearing)
    }

    fn between_fixes(&self, f: fn(f64, f64, f64, f64) -> f64) -> Result<Vec<Option<f64>>> {
        let lat = self.require(Field::Latitude)?;
        let lon = self.require(Field::Longitude)?;
        let mut out = Vec::with_capacity(lat.len());
        out.extend(lat.first().map(|_| None));
        for i in 1..lat.len() {
            let value = match (lat[i - 1], lon[i - 1], lat[i], lon[i]) {
                (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => Some(f(lat1, lon1, lat2, lon2)),
                _ => None,
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Add a `pace` column (seconds per meter) derived from speed
    pub fn add_pace_column(&mut self) -> Result<()> {
        let pace = self.column(Field::Speed.as_str())?.to_pace()?;
        self.frame.insert_column(PACE_COLUMN, pace)?;
        self.bindings.insert(PACE_COLUMN.to_string(), ColumnKind::Pace);
        Ok(())
    }

    /// Remove a column and return its values
    pub fn remove_column(&mut self, name: &str) -> Result<Vec<Option<f64>>> {
        let values = self.frame.remove_column(name)?;
        self.bindings.remove(name);
        Ok(values)
    }

    /// Time from the earliest to the latest row
    ///
    /// Rows flagged as non-monotonic do not shorten the span.
    pub fn elapsed(&self) -> Duration {
        let earliest = self.offsets.iter().min();
        let latest = self.offsets.iter().max();
        match (earliest, latest) {
            (Some(earliest), Some(latest)) => *latest - *earliest,
            _ => Duration::zero(),
        }
    }

    /// Most common interval between rows
    pub fn modal_interval(&self) -> Option<Duration> {
        self.modal_interval
    }

    /// Gap threshold used by [`recording_time`](Self::recording_time)
    pub fn gap_threshold(&self) -> Option<Duration> {
        self.modal_interval
            .map(|interval| secs_duration(duration_secs(interval) * self.gap_factor))
    }

    /// Elapsed time excluding gaps of at least `gap_factor` modal intervals
    pub fn recording_time(&self) -> Duration {
        match self.gap_threshold() {
            Some(threshold) => self.recording_time_with(threshold),
            None => self.elapsed(),
        }
    }

    /// Elapsed time excluding gaps of at least `threshold`
    pub fn recording_time_with(&self, threshold: Duration) -> Duration {
        metrics::gap_aware_elapsed(&self.offsets, threshold)
    }

    /// Smoothing span in samples for normalized power
    pub fn np_span(&self) -> f64 {
        metrics::span_for_window(self.np_window_secs, self.modal_interval)
    }

    /// Rows whose time was earlier than the row before
    pub fn non_monotonic_rows(&self) -> &[usize] {
        &self.non_monotonic
    }

    /// Records the decoder skipped or could not place in time
    pub fn dropped_records(&self) -> usize {
        self.dropped
    }

    pub(crate) fn set_dropped_records(&mut self, dropped: usize) {
        self.dropped = dropped;
    }

    /// Headline figures for reporting
    pub fn summary(&self) -> ActivitySummary {
        let metric = |field: Field, f: fn(&Column<'_>) -> Option<f64>| {
            self.field(field).and_then(|col| f(&col))
        };

        let columns = self
            .frame
            .column_names()
            .filter_map(|name| self.column(name).ok())
            .map(|col| ColumnSummary {
                name: col.name().to_string(),
                kind: col.kind(),
                unit: col.unit().map(str::to_string),
                present: col.present().count(),
            })
            .collect();

        let laps = self.laps().map(|laps| {
            laps.into_iter()
                .flatten()
                .collect::<BTreeSet<u32>>()
                .len()
        });

        ActivitySummary {
            format: self.header.format,
            device: self.header.device.clone(),
            rows: self.len(),
            start: self.timestamps().first().map(|t| t.to_string()),
            end: self.timestamps().last().map(|t| t.to_string()),
            local_start: self.timestamps().first().map(RecordTime::naive_local),
            elapsed_secs: duration_secs(self.elapsed()),
            recording_secs: duration_secs(self.recording_time()),
            laps,
            distance_m: metric(Field::Distance, |c| c.max()),
            ascent_m: metric(Field::Altitude, |c| c.ascent().ok()),
            descent_m: metric(Field::Altitude, |c| c.descent().ok()),
            avg_power_w: metric(Field::Power, |c| c.mean()),
            normalized_power_w: metric(Field::Power, |c| c.normalized_power().ok().flatten()),
            avg_speed_mps: metric(Field::Speed, |c| c.mean()),
            max_speed_mps: metric(Field::Speed, |c| c.max()),
            avg_heart_rate: metric(Field::HeartRate, |c| c.mean()),
            columns,
            non_monotonic_rows: self.non_monotonic.len(),
            dropped_records: self.dropped,
        }
    }
}

/// One column as listed in an [`ActivitySummary`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub kind: ColumnKind,
    pub unit: Option<String>,
    /// Rows with a value
    pub present: usize,
}

/// Headline figures of an activity
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub format: Format,
    pub device: DeviceInfo,
    pub rows: usize,
    pub start: Option<String>,
    pub end: Option<String>,
    /// Wall-clock reading of the first row, without any zone offset
    pub local_start: Option<NaiveDateTime>,
    pub elapsed_secs: f64,
    pub recording_secs: f64,
    pub laps: Option<usize>,
    pub distance_m: Option<f64>,
    pub ascent_m: Option<f64>,
    pub descent_m: Option<f64>,
    pub avg_power_w: Option<f64>,
    pub normalized_power_w: Option<f64>,
    pub avg_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub columns: Vec<ColumnSummary>,
    pub non_monotonic_rows: usize,
    pub dropped_records: usize,
}
