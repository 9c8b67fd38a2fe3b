//! TCX (Training Center XML) decoder
//!
//! Trackpoint-oriented: each `Trackpoint` becomes one raw record keyed by the
//! local names of its text elements. Heart rate is nested as
//! `HeartRateBpm/Value`, so a `Value` leaf is keyed by its parent instead.
//! Every `Lap` element opens a new lap.

use super::{parse_utc_timestamp, RecordSource};
use crate::cursor::{MarkupCursor, MarkupItem, XmlNode};
use crate::types::{
    DecoderError, Format, HeaderInfo, RawRecord, RawTime, RawValue, Result, TimeBasis,
};
use std::io::BufRead;

const ROOT: &str = "TrainingCenterDatabase";
const MARKERS: &[&str] = &["Lap"];
const NODES: &[&str] = &["Trackpoint", "Id", "Creator"];

/// Trackpoint elements that must parse as numbers
const NUMERIC: &[&str] = &[
    "AltitudeMeters",
    "DistanceMeters",
    "HeartRateBpm",
    "Cadence",
    "RunCadence",
    "Speed",
    "Watts",
    "LatitudeDegrees",
    "LongitudeDegrees",
];

/// Streaming decoder over a TCX document
pub struct TcxDecoder<R> {
    cursor: MarkupCursor<R>,
    header: HeaderInfo,
    lap: u32,
    points: usize,
    skipped: usize,
    finished: bool,
}

impl<R: BufRead> TcxDecoder<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut cursor = MarkupCursor::new(reader);
        let root = cursor.root()?;
        if root != ROOT {
            return Err(DecoderError::DecodeError(format!(
                "expected <{}> root element, found <{}>",
                ROOT, root
            )));
        }
        log::info!("TCX document opened");

        Ok(Self {
            cursor,
            header: HeaderInfo::new(Format::Tcx, TimeBasis::Utc),
            lap: 0,
            points: 0,
            skipped: 0,
            finished: false,
        })
    }

    fn apply_creator(&mut self, node: &XmlNode) {
        let device = &mut self.header.device;
        for leaf in &node.leaves {
            match leaf.name.as_str() {
                "Name" if device.product.is_none() => device.product = Some(leaf.text.clone()),
                "UnitId" => device.serial_number = Some(leaf.text.clone()),
                _ => {}
            }
        }
    }
}

/// Build a raw record from one trackpoint
fn trackpoint_record(node: &XmlNode, lap: u32) -> std::result::Result<RawRecord, String> {
    let mut record = RawRecord::new();
    for leaf in &node.leaves {
        let key = if leaf.name == "Value" {
            leaf.parent.as_str()
        } else {
            leaf.name.as_str()
        };

        if key == "Time" {
            let time = parse_utc_timestamp(&leaf.text)
                .ok_or_else(|| format!("unparseable time {:?}", leaf.text))?;
            record.insert(key, RawValue::Time(RawTime::Absolute(time)));
        } else if NUMERIC.contains(&key) {
            let value: f64 = leaf
                .text
                .parse()
                .map_err(|_| format!("{} is not numeric: {:?}", key, leaf.text))?;
            record.insert_number(key, value);
        } else {
            record.insert(key, RawValue::Text(leaf.text.clone()));
        }
    }
    record.insert_number("Lap", lap as f64);
    Ok(record)
}

impl<R: BufRead> Iterator for TcxDecoder<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let node = match self.cursor.next_item(MARKERS, NODES) {
                Ok(Some(MarkupItem::Marker(_))) => {
                    self.lap += 1;
                    log::trace!("TCX lap {} opened", self.lap);
                    continue;
                }
                Ok(Some(MarkupItem::Node(node))) => node,
                Ok(None) => {
                    log::debug!(
                        "TCX document complete: {} trackpoints, {} skipped",
                        self.points,
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

            match node.name.as_str() {
                "Trackpoint" => {
                    self.points += 1;
                    match trackpoint_record(&node, self.lap) {
                        Ok(record) => return Some(Ok(record)),
                        Err(reason) => {
                            self.skipped += 1;
                            log::warn!("Skipping TCX trackpoint {}: {}", self.points, reason);
                        }
                    }
                }
                "Id" => {
                    if self.header.start.is_none() {
                        self.header.start = node.leaf("Id").and_then(parse_utc_timestamp);
                    }
                }
                _ => self.apply_creator(&node),
            }
        }
        None
    }
}

impl<R: BufRead> RecordSource for TcxDecoder<R> {
    fn header(&self) -> &HeaderInfo {
        &self.header
    }

    fn skipped(&self) -> usize {
        self.skipped
    }
}
