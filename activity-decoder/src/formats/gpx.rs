//! GPX decoder
//!
//! Track/segment-oriented: `trkpt` elements carry `lat`/`lon` attributes and
//! child elements (`ele`, `time`, and extension values such as `hr`, `cad`,
//! `atemp`, `power`). Each `trkseg` opens a new segment, reported through the
//! `segment` key. GPX stores no distance, so the decoder accumulates
//! great-circle distance between consecutive points of the same segment.

use super::{parse_utc_timestamp, RecordSource};
use crate::cursor::{MarkupCursor, MarkupItem, XmlNode};
use crate::metrics::haversine;
use crate::types::{
    DecoderError, Format, HeaderInfo, RawRecord, RawTime, RawValue, Result, TimeBasis,
};
use std::io::BufRead;

const ROOT: &str = "gpx";
const MARKERS: &[&str] = &["trkseg"];
const NODES: &[&str] = &["trkpt", "metadata"];

/// Point elements that must parse as numbers
const NUMERIC: &[&str] = &["ele", "hr", "cad", "atemp", "wtemp", "power", "speed"];

/// Streaming decoder over a GPX document
pub struct GpxDecoder<R> {
    cursor: MarkupCursor<R>,
    header: HeaderInfo,
    segment: u32,
    previous: Option<(f64, f64)>,
    distance: f64,
    points: usize,
    skipped: usize,
    finished: bool,
}

/// Values parsed from one `trkpt` before distance is attached
struct TrackPoint {
    record: RawRecord,
    position: Option<(f64, f64)>,
}

impl<R: BufRead> GpxDecoder<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut cursor = MarkupCursor::new(reader);
        let root = cursor.root()?;
        if root != ROOT {
            return Err(DecoderError::DecodeError(format!(
                "expected <{}> root element, found <{}>",
                ROOT, root
            )));
        }
        log::info!("GPX document opened");

        Ok(Self {
            cursor,
            header: HeaderInfo::new(Format::Gpx, TimeBasis::Utc),
            segment: 0,
            previous: None,
            distance: 0.0,
            points: 0,
            skipped: 0,
            finished: false,
        })
    }

    /// Attach the running segment and distance to a parsed point
    fn finish_point(&mut self, point: TrackPoint) -> RawRecord {
        let mut record = point.record;
        if let Some((lat, lon)) = point.position {
            if let Some((prev_lat, prev_lon)) = self.previous {
                self.distance += haversine(prev_lat, prev_lon, lat, lon);
            }
            self.previous = Some((lat, lon));
            record.insert_number("distance", self.distance);
        }
        record.insert_number("segment", self.segment as f64);
        record
    }
}

fn parse_number(key: &str, text: &str) -> std::result::Result<f64, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("{} is not numeric: {:?}", key, text))
}

/// Parse one track point; an error names the malformed value
fn track_point(node: &XmlNode) -> std::result::Result<TrackPoint, String> {
    let mut record = RawRecord::new();

    let lat = node.attr("lat").map(|v| parse_number("lat", v)).transpose()?;
    let lon = node.attr("lon").map(|v| parse_number("lon", v)).transpose()?;
    if let Some(lat) = lat {
        record.insert_number("lat", lat);
    }
    if let Some(lon) = lon {
        record.insert_number("lon", lon);
    }

    for leaf in &node.leaves {
        let key = leaf.name.as_str();
        if key == "time" {
            let time = parse_utc_timestamp(&leaf.text)
                .ok_or_else(|| format!("unparseable time {:?}", leaf.text))?;
            record.insert(key, RawValue::Time(RawTime::Absolute(time)));
        } else if NUMERIC.contains(&key) {
            record.insert_number(key, parse_number(key, &leaf.text)?);
        } else {
            record.insert(key, RawValue::Text(leaf.text.clone()));
        }
    }

    Ok(TrackPoint {
        record,
        position: lat.zip(lon),
    })
}

impl<R: BufRead> Iterator for GpxDecoder<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let node = match self.cursor.next_item(MARKERS, NODES) {
                Ok(Some(MarkupItem::Marker(_))) => {
                    self.segment += 1;
                    self.previous = None;
                    log::trace!("GPX segment {} opened", self.segment);
                    continue;
                }
                Ok(Some(MarkupItem::Node(node))) => node,
                Ok(None) => {
                    log::debug!(
                        "GPX document complete: {} points in {} segments, {} skipped",
                        self.points,
                        self.segment,
                        self.skipped
                    );
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            if node.name == "metadata" {
                if self.header.start.is_none() {
                    self.header.start = node.leaf("time").and_then(parse_utc_timestamp);
                }
                continue;
            }

            self.points += 1;
            match track_point(&node) {
                Ok(point) => return Some(Ok(self.finish_point(point))),
                Err(reason) => {
                    self.skipped += 1;
                    log::warn!("Skipping GPX point {}: {}", self.points, reason);
                }
            }
        }
        None
    }
}

impl<R: BufRead> RecordSource for GpxDecoder<R> {
    fn header(&self) -> &HeaderInfo {
        &self.header
    }

    fn skipped(&self) -> usize {
        self.skipped
    }
}
