//! PWX decoder
//!
//! Sample-oriented: the workout's `time` element holds the start as a local
//! wall-clock time with no zone, and every `sample` carries a `timeoffset` in
//! seconds from that start plus numeric channels (`hr`, `spd`, `pwr`, `cad`,
//! `dist`, `alt`, `temp`, ...). Record times are emitted as offsets and
//! resolved against the header start by the normalizer.

//!
//! The workout metadata (`time`, `device`) precedes the samples, so it is read
//! while opening the document and a bad start time fails before any record.

use super::{parse_floating_timestamp, RecordSource};
use crate::cursor::{MarkupCursor, MarkupItem, XmlNode};
use crate::types::{
    secs_duration, DecoderError, Format, HeaderInfo, RawRecord, RawTime, RawValue, Result,
    TimeBasis,
};
use std::io::BufRead;

const ROOT: &str = "pwx";
const NODES: &[&str] = &["time", "sample", "device"];

/// Streaming decoder over a PWX document
pub struct PwxDecoder<R> {
    cursor: MarkupCursor<R>,
    header: HeaderInfo,
    pending: Option<XmlNode>,
    samples: usize,
    skipped: usize,
    finished: bool,
}

impl<R: BufRead> PwxDecoder<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut cursor = MarkupCursor::new(reader);
        let root = cursor.root()?;
        if root != ROOT {
            return Err(DecoderError::DecodeError(format!(
                "expected <{}> root element, found <{}>",
                ROOT, root
            )));
        }
        log::info!("PWX document opened");

        let mut decoder = Self {
            cursor,
            header: HeaderInfo::new(Format::Pwx, TimeBasis::Floating),
            pending: None,
            samples: 0,
            skipped: 0,
            finished: false,
        };
        decoder.read_metadata()?;
        Ok(decoder)
    }

    /// Consume metadata nodes up to the first sample, which is held back
    fn read_metadata(&mut self) -> Result<()> {
        while let Some(item) = self.cursor.next_item(&[], NODES)? {
            let MarkupItem::Node(node) = item else {
                continue;
            };
            match node.name.as_str() {
                "sample" => {
                    self.pending = Some(node);
                    return Ok(());
                }
                "time" => self.apply_start(&node)?,
                _ => self.apply_device(&node),
            }
        }
        self.finished = true;
        Ok(())
    }

    fn apply_start(&mut self, node: &XmlNode) -> Result<()> {
        if self.header.start.is_some() {
            return Ok(());
        }
        let text = node.leaf("time").unwrap_or_default();
        let start = parse_floating_timestamp(text).ok_or_else(|| {
            DecoderError::DecodeError(format!("unparseable PWX start time {:?}", text))
        })?;
        log::debug!("PWX workout starts at {}", start);
        self.header.start = Some(start);
        Ok(())
    }

    fn apply_device(&mut self, node: &XmlNode) {
        let device = &mut self.header.device;
        device.manufacturer = node.leaf("make").map(str::to_string);
        device.product = node.leaf("model").map(str::to_string);
        device.serial_number = node.attr("id").map(str::to_string);
    }
}

/// Parse one sample; every child must be numeric
fn sample_record(node: &XmlNode) -> std::result::Result<RawRecord, String> {
    let mut record = RawRecord::new();
    for leaf in &node.leaves {
        let value: f64 = leaf
            .text
            .trim()
            .parse()
            .map_err(|_| format!("{} is not numeric: {:?}", leaf.name, leaf.text))?;
        if leaf.name == "timeoffset" {
            record.insert(
                "timeoffset",
                RawValue::Time(RawTime::Offset(secs_duration(value))),
            );
        } else {
            record.insert_number(leaf.name.as_str(), value);
        }
    }
    Ok(record)
}

impl<R: BufRead> Iterator for PwxDecoder<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(node) = self.pending.take() {
            self.samples += 1;
            match sample_record(&node) {
                Ok(record) => return Some(Ok(record)),
                Err(reason) => {
                    self.skipped += 1;
                    log::warn!("Skipping PWX sample {}: {}", self.samples, reason);
                }
            }
        }
        while !self.finished {
            let node = match self.cursor.next_item(&[], NODES) {
                Ok(Some(MarkupItem::Node(node))) => node,
                Ok(Some(MarkupItem::Marker(_))) => continue,
                Ok(None) => {
                    log::debug!(
                        "PWX document complete: {} samples, {} skipped",
                        self.samples,
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
                "sample" => {
                    self.samples += 1;
                    match sample_record(&node) {
                        Ok(record) => return Some(Ok(record)),
                        Err(reason) => {
                            self.skipped += 1;
                            log::warn!("Skipping PWX sample {}: {}", self.samples, reason);
                        }
                    }
                }
                "time" => {
                    if let Err(e) = self.apply_start(&node) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                _ => self.apply_device(&node),
            }
        }
        None
    }
}

impl<R: BufRead> RecordSource for PwxDecoder<R> {
    fn header(&self) -> &HeaderInfo {
        &self.header
    }

    fn skipped(&self) -> usize {
        self.skipped
    }
}
