//! FIT (Flexible and Interoperable Data Transfer) decoder
//!
//! A FIT file is a 12 or 14 byte header followed by a stream of definition and
//! data messages. Definition messages describe the layout of the data messages
//! that reuse their local message type, so every message can be stepped over
//! even when its global message number is unknown. Only `record` messages
//! become raw records; `file_id`, `activity` and `lap` messages feed the header
//! and the lap counter.
//!
//! Timestamps are seconds since the FIT epoch in UTC. A compressed-timestamp
//! header carries a 5-bit rolling offset against the last full timestamp.

use super::fit_profile::{self, FIT_EPOCH_OFFSET, TIMESTAMP_FIELD};
use super::{header_error, record_error, RecordSource};
use crate::cursor::{ByteCursor, Endian};
use crate::types::{
    DecoderError, Format, HeaderInfo, RawRecord, RawTime, RawValue, Result, TimeBasis,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::collections::HashSet;
use std::io::{self, Read};

const LOCAL_TYPES: usize = 16;

/// One field entry of a definition message
#[derive(Debug, Clone, Copy)]
struct FieldDefinition {
    number: u8,    // Field definition number in the global profile
    size: u8,      // Total size in bytes (arrays are a multiple of the base width)
    base_type: u8, // Base type id, endian-ability flag in bit 7
}

/// Layout of the data messages bound to one local message type
#[derive(Debug, Clone)]
struct MessageDefinition {
    global: u16,
    endian: Endian,
    fields: Vec<FieldDefinition>,
    developer_size: u64, // Bytes of developer data appended to each message
}

/// Decoded value of a single field
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Number(f64),
    Text(String),
    Invalid,
}

/// Streaming decoder over a FIT file
pub struct FitDecoder<R> {
    cursor: ByteCursor<R>,
    header: HeaderInfo,
    data_end: u64,
    definitions: Vec<Option<MessageDefinition>>,
    last_timestamp: Option<u32>,
    lap: u32,
    messages: usize,
    ignored: HashSet<u16>,
    finished: bool,
}

impl<R: Read> FitDecoder<R> {
    /// Read and validate the file header
    pub fn new(reader: R) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader);
        let fail = |what: &'static str| move |e: io::Error| header_error(Format::Fit, what, e);

        let header_size = cursor.read_u8().map_err(fail("header size"))?;
        if header_size < 12 {
            return Err(DecoderError::DecodeError(format!(
                "FIT header size {} is smaller than 12 bytes",
                header_size
            )));
        }
        let protocol = cursor.read_u8().map_err(fail("protocol version"))?;
        let profile = cursor.read_u16(Endian::Little).map_err(fail("profile version"))?;
        let data_size = cursor.read_u32(Endian::Little).map_err(fail("data size"))?;
        let signature = cursor.read_array::<4>().map_err(fail("signature"))?;
        if &signature != b".FIT" {
            return Err(DecoderError::DecodeError(format!(
                "invalid FIT signature {:?}",
                String::from_utf8_lossy(&signature)
            )));
        }
        // Header CRC of 14-byte headers and any vendor extension
        cursor
            .skip(header_size as u64 - 12)
            .map_err(fail("header extension"))?;

        let mut header = HeaderInfo::new(Format::Fit, TimeBasis::Utc);
        header.version = Some(format!(
            "protocol {}.{}, profile {}.{:02}",
            protocol >> 4,
            protocol & 0x0F,
            profile / 100,
            profile % 100
        ));

        log::info!(
            "FIT file: {}, {} bytes of message data",
            header.version.as_deref().unwrap_or_default(),
            data_size
        );

        Ok(Self {
            cursor,
            header,
            data_end: header_size as u64 + data_size as u64,
            definitions: vec![None; LOCAL_TYPES],
            last_timestamp: None,
            lap: 1,
            messages: 0,
            ignored: HashSet::new(),
            finished: false,
        })
    }

    fn read_message(&mut self) -> Result<Option<RawRecord>> {
        let index = self.messages;
        self.messages += 1;
        let fail = |e: io::Error| record_error(Format::Fit, index, e);

        let header = self.cursor.read_u8().map_err(fail)?;

        if header & 0x80 != 0 {
            // Compressed timestamp header: local type in bits 5-6, offset in bits 0-4
            let local = (header >> 5) & 0x03;
            return self.read_data(local, Some(header & 0x1F), index);
        }

        let local = header & 0x0F;
        if header & 0x40 != 0 {
            self.read_definition(local, header & 0x20 != 0).map_err(fail)?;
            Ok(None)
        } else {
            self.read_data(local, None, index)
        }
    }

    fn read_definition(&mut self, local: u8, has_developer_fields: bool) -> io::Result<()> {
        let _reserved = self.cursor.read_u8()?;
        let endian = match self.cursor.read_u8()? {
            0 => Endian::Little,
            _ => Endian::Big,
        };
        let global = self.cursor.read_u16(endian)?;
        let count = self.cursor.read_u8()?;

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let [number, size, base_type] = self.cursor.read_array::<3>()?;
            fields.push(FieldDefinition {
                number,
                size,
                base_type,
            });
        }

        let mut developer_size = 0u64;
        if has_developer_fields {
            let count = self.cursor.read_u8()?;
            for _ in 0..count {
                let [_number, size, _developer_index] = self.cursor.read_array::<3>()?;
                developer_size += size as u64;
            }
        }

        log::debug!(
            "FIT definition: local {} -> global {} ({}), {} fields",
            local,
            global,
            fit_profile::message_name(global).unwrap_or("unknown"),
            fields.len()
        );

        self.definitions[local as usize] = Some(MessageDefinition {
            global,
            endian,
            fields,
            developer_size,
        });
        Ok(())
    }

    fn read_data(
        &mut self,
        local: u8,
        time_offset: Option<u8>,
        index: usize,
    ) -> Result<Option<RawRecord>> {
        let fail = |e: io::Error| record_error(Format::Fit, index, e);

        let definition = self.definitions[local as usize].as_ref().ok_or_else(|| {
            DecoderError::RecordError(format!(
                "FIT message {} uses undefined local message type {}",
                index, local
            ))
        })?;

        let mut values = Vec::with_capacity(definition.fields.len());
        for field in &definition.fields {
            let value = read_field(&mut self.cursor, field, definition.endian).map_err(fail)?;
            values.push((field.number, value));
        }
        self.cursor.skip(definition.developer_size).map_err(fail)?;
        let global = definition.global;

        let mut timestamp = match (time_offset, self.last_timestamp) {
            (Some(offset), Some(last)) => {
                let delta = (offset as u32).wrapping_sub(last & 0x1F) & 0x1F;
                let resolved = last.checked_add(delta).ok_or_else(|| {
                    DecoderError::RecordError(format!(
                        "FIT message {}: compressed time offset {} overflows timestamp {}",
                        index, offset, last
                    ))
                })?;
                Some(resolved)
            }
            _ => None,
        };
        for (number, value) in &values {
            if let (TIMESTAMP_FIELD, FieldValue::Number(ts)) = (*number, value) {
                timestamp = Some(*ts as u32);
            }
        }
        if timestamp.is_some() {
            self.last_timestamp = timestamp;
        }

        match global {
            fit_profile::RECORD => Ok(Some(self.build_record(&values, timestamp))),
            fit_profile::LAP => {
                self.lap += 1;
                log::trace!("FIT lap message, lap counter now {}", self.lap);
                Ok(None)
            }
            fit_profile::FILE_ID => {
                self.apply_file_id(&values);
                Ok(None)
            }
            fit_profile::ACTIVITY => {
                self.apply_activity(&values, timestamp);
                Ok(None)
            }
            other => {
                if self.ignored.insert(other) {
                    log::debug!(
                        "Skipping FIT message type {} ({})",
                        other,
                        fit_profile::message_name(other).unwrap_or("unknown")
                    );
                }
                Ok(None)
            }
        }
    }

    fn build_record(&self, values: &[(u8, FieldValue)], timestamp: Option<u32>) -> RawRecord {
        let mut record = RawRecord::new();
        if let Some(time) = timestamp.and_then(fit_time) {
            record.insert("timestamp", RawValue::Time(RawTime::Absolute(time)));
        }
        record.insert_number("lap", self.lap as f64);

        for (number, value) in values {
            if *number == TIMESTAMP_FIELD {
                continue;
            }
            if let (Some(profile), FieldValue::Number(raw)) =
                (fit_profile::record_field(*number), value)
            {
                record.insert_number(profile.name, profile.apply(*raw));
            }
        }
        record
    }

    fn apply_file_id(&mut self, values: &[(u8, FieldValue)]) {
        for (number, value) in values {
            match (*number, value) {
                (fit_profile::FILE_ID_MANUFACTURER, FieldValue::Number(id)) => {
                    let id = *id as u32;
                    self.header.device.manufacturer = Some(
                        fit_profile::manufacturer_name(id)
                            .map(str::to_string)
                            .unwrap_or_else(|| id.to_string()),
                    );
                }
                (fit_profile::FILE_ID_PRODUCT, FieldValue::Number(id)) => {
                    self.header.device.product = Some((*id as u32).to_string());
                }
                (fit_profile::FILE_ID_PRODUCT, FieldValue::Text(name)) => {
                    self.header.device.product = Some(name.clone());
                }
                (fit_profile::FILE_ID_SERIAL, FieldValue::Number(serial)) => {
                    self.header.device.serial_number = Some((*serial as u64).to_string());
                }
                (fit_profile::FILE_ID_TIME_CREATED, FieldValue::Number(ts)) => {
                    if self.header.start.is_none() {
                        self.header.start = fit_time(*ts as u32);
                    }
                }
                _ => {}
            }
        }
    }

    fn apply_activity(&mut self, values: &[(u8, FieldValue)], timestamp: Option<u32>) {
        let local = values.iter().find_map(|(number, value)| match (*number, value) {
            (fit_profile::ACTIVITY_LOCAL_TIMESTAMP, FieldValue::Number(v)) => Some(*v as i64),
            _ => None,
        });
        if let (Some(local), Some(utc)) = (local, timestamp) {
            let offset = local - utc as i64;
            match i32::try_from(offset).ok().and_then(FixedOffset::east_opt) {
                Some(offset) => {
                    log::debug!("FIT activity reports UTC offset {}", offset);
                    self.header.utc_offset = Some(offset);
                }
                None => log::warn!("Ignoring implausible FIT UTC offset of {}s", offset),
            }
        }
    }
}

/// Convert a FIT timestamp to UTC wall time
fn fit_time(ts: u32) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(FIT_EPOCH_OFFSET + ts as i64, 0).map(|dt| dt.naive_utc())
}

/// Width in bytes of one element of a base type
fn base_type_width(base: u8) -> Option<u64> {
    match base {
        0x00 | 0x01 | 0x02 | 0x07 | 0x0A | 0x0D => Some(1),
        0x03 | 0x04 | 0x0B => Some(2),
        0x05 | 0x06 | 0x08 | 0x0C => Some(4),
        0x09 | 0x0E | 0x0F | 0x10 => Some(8),
        _ => None,
    }
}

/// Read one field, keeping only the first element of an array
///
/// Values equal to the base type's invalid sentinel decode as [`FieldValue::Invalid`].
fn read_field<R: Read>(
    cursor: &mut ByteCursor<R>,
    field: &FieldDefinition,
    endian: Endian,
) -> io::Result<FieldValue> {
    let size = field.size as u64;
    let base = field.base_type & 0x1F;

    if base == 0x07 {
        let bytes = cursor.read_bytes(field.size as usize)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
        return Ok(if text.is_empty() {
            FieldValue::Invalid
        } else {
            FieldValue::Text(text)
        });
    }

    let width = match base_type_width(base) {
        Some(width) if width <= size && size % width == 0 => width,
        _ => {
            cursor.skip(size)?;
            return Ok(FieldValue::Invalid);
        }
    };

    let value = match base {
        0x00 | 0x02 | 0x0D => {
            let v = cursor.read_u8()?;
            (v != u8::MAX).then_some(v as f64)
        }
        0x01 => {
            let v = cursor.read_i8()?;
            (v != i8::MAX).then_some(v as f64)
        }
        0x03 => {
            let v = cursor.read_i16(endian)?;
            (v != i16::MAX).then_some(v as f64)
        }
        0x04 => {
            let v = cursor.read_u16(endian)?;
            (v != u16::MAX).then_some(v as f64)
        }
        0x05 => {
            let v = cursor.read_i32(endian)?;
            (v != i32::MAX).then_some(v as f64)
        }
        0x06 => {
            let v = cursor.read_u32(endian)?;
            (v != u32::MAX).then_some(v as f64)
        }
        0x08 => {
            let v = cursor.read_f32(endian)?;
            (v.to_bits() != u32::MAX && v.is_finite()).then_some(v as f64)
        }
        0x09 => {
            let v = cursor.read_f64(endian)?;
            (v.to_bits() != u64::MAX && v.is_finite()).then_some(v)
        }
        0x0A => {
            let v = cursor.read_u8()?;
            (v != 0).then_some(v as f64)
        }
        0x0B => {
            let v = cursor.read_u16(endian)?;
            (v != 0).then_some(v as f64)
        }
        0x0C => {
            let v = cursor.read_u32(endian)?;
            (v != 0).then_some(v as f64)
        }
        0x0E => {
            let v = cursor.read_i64(endian)?;
            (v != i64::MAX).then_some(v as f64)
        }
        0x0F => {
            let v = cursor.read_u64(endian)?;
            (v != u64::MAX).then_some(v as f64)
        }
        _ => {
            let v = cursor.read_u64(endian)?;
            (v != 0).then_some(v as f64)
        }
    };

    if size > width {
        cursor.skip(size - width)?;
    }
    Ok(value.map_or(FieldValue::Invalid, FieldValue::Number))
}

impl<R: Read> Iterator for FitDecoder<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.cursor.position() >= self.data_end {
                log::debug!("FIT data complete after {} messages", self.messages);
                self.finished = true;
                break;
            }
            match self.read_message() {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Stopping FIT decode: {}", e);
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl<R: Read> RecordSource for FitDecoder<R> {
    fn header(&self) -> &HeaderInfo {
        &self.header
    }
}
