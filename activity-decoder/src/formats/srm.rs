//! SRM power-meter log decoder (file versions 5 through 9)
//!
//! Layout: a 4-byte magic (`SRM` + version digit), a fixed header, marker and
//! block tables, calibration data, then fixed-size data chunks. Chunks carry
//! no time of their own: each block holds a start time (hundredths of a second
//! since local midnight) and its chunks follow at the recording interval.
//! Times are local wall-clock readings, so the time basis is floating.

use super::{header_error, record_error, RecordSource};
use crate::cursor::{ByteCursor, Endian};
use crate::types::{
    secs_duration, DecoderError, Format, HeaderInfo, RawRecord, RawTime, RawValue, Result,
    TimeBasis,
};
use chrono::{Duration, NaiveDate};
use std::io::{self, Read};

const HEADER_COMMENT_LEN: usize = 70;

/// One recording block: a run of chunks sampled at the recording interval
#[derive(Debug, Clone, Copy)]
struct Block {
    start: Duration, // Since the start of the first block
    chunk_count: u64,
}

/// Interval marker; markers delimit laps
#[derive(Debug, Clone, Copy, PartialEq)]
struct Marker {
    start: u64, // One-indexed chunk number
    end: u64,
}

impl Marker {
    /// Repair markers written zero-indexed or with start and end swapped
    fn normalized(start: u64, end: u64) -> Self {
        let start = start.max(1);
        let end = end.max(1);
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Zero-indexed chunk numbers where this marker opens or closes a lap
    fn boundaries(&self) -> [u64; 2] {
        [self.start - 1, self.end - 1]
    }
}

/// Streaming decoder over an SRM file
pub struct SrmDecoder<R> {
    cursor: ByteCursor<R>,
    header: HeaderInfo,
    version: u8,
    interval: Duration,
    interval_secs: f64,
    blocks: Vec<Block>,
    block_index: usize,
    remaining_in_block: u64,
    offset: Duration,
    lap_boundaries: Vec<u64>,
    next_boundary: usize,
    lap: u32,
    index: u64,
    total: u64,
    distance: f64,
    finished: bool,
}

impl<R: Read> SrmDecoder<R> {
    /// Read the header, marker and block tables
    pub fn new(reader: R) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader);
        let fail = |what: &'static str| move |e: io::Error| header_error(Format::Srm, what, e);

        let magic = cursor.read_array::<4>().map_err(fail("magic"))?;
        if &magic[..3] != b"SRM" {
            return Err(DecoderError::DecodeError(format!(
                "invalid SRM magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let version = match magic[3] {
            b'5'..=b'9' => magic[3] - b'0',
            other => {
                return Err(DecoderError::DecodeError(format!(
                    "unsupported SRM version {:?}",
                    other as char
                )))
            }
        };

        // Fixed header: '<2H2B2HxB70s'
        let days_since_1880 = cursor.read_u16(Endian::Little).map_err(fail("date"))?;
        let wheel_circumference = cursor.read_u16(Endian::Little).map_err(fail("wheel"))?;
        let interval_numerator = cursor.read_u8().map_err(fail("recording interval"))?;
        let interval_denominator = cursor.read_u8().map_err(fail("recording interval"))?;
        let block_count = cursor.read_u16(Endian::Little).map_err(fail("block count"))?;
        let marker_count = cursor.read_u16(Endian::Little).map_err(fail("marker count"))?;
        cursor.skip(1).map_err(fail("padding"))?;
        let comment_len = cursor.read_u8().map_err(fail("comment"))? as usize;
        let comment = cursor
            .read_array::<HEADER_COMMENT_LEN>()
            .map_err(fail("comment"))?;

        if interval_numerator == 0 || interval_denominator == 0 {
            return Err(DecoderError::DecodeError(format!(
                "invalid SRM recording interval {}/{}",
                interval_numerator, interval_denominator
            )));
        }
        let interval_secs = interval_numerator as f64 / interval_denominator as f64;

        let mut markers = Vec::with_capacity(marker_count as usize + 1);
        let marker_comment_len: u64 = if version < 6 { 3 } else { 255 };
        for _ in 0..=marker_count {
            cursor.skip(marker_comment_len).map_err(fail("marker"))?;
            let _active = cursor.read_u8().map_err(fail("marker"))?;
            let (start, end) = if version < 9 {
                let start = cursor.read_u16(Endian::Little).map_err(fail("marker"))?;
                let end = cursor.read_u16(Endian::Little).map_err(fail("marker"))?;
                (start as u64, end as u64)
            } else {
                let start = cursor.read_u32(Endian::Little).map_err(fail("marker"))?;
                let end = cursor.read_u32(Endian::Little).map_err(fail("marker"))?;
                (start as u64, end as u64)
            };
            // Average watts, heart rate, cadence, speed and PWC150
            cursor.skip(10).map_err(fail("marker"))?;
            markers.push(Marker::normalized(start, end));
        }

        let mut raw_blocks = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let hsec = cursor.read_u32(Endian::Little).map_err(fail("block"))?;
            let chunk_count = if version < 9 {
                cursor.read_u16(Endian::Little).map_err(fail("block"))? as u64
            } else {
                cursor.read_u32(Endian::Little).map_err(fail("block"))? as u64
            };
            raw_blocks.push((Duration::milliseconds(hsec as i64 * 10), chunk_count));
        }

        let zero = cursor.read_u16(Endian::Little).map_err(fail("calibration"))?;
        let slope = cursor.read_u16(Endian::Little).map_err(fail("calibration"))?;
        // The stored data count overflows at 64k chunks; block counts are used instead
        if version < 9 {
            cursor.read_u16(Endian::Little).map_err(fail("data count"))?;
        } else {
            cursor.read_u32(Endian::Little).map_err(fail("data count"))?;
        }
        cursor.skip(1).map_err(fail("data count"))?;

        let origin = raw_blocks
            .first()
            .map(|(start, _)| *start)
            .unwrap_or_else(Duration::zero);
        let blocks: Vec<Block> = raw_blocks
            .into_iter()
            .map(|(start, chunk_count)| Block {
                start: start - origin,
                chunk_count,
            })
            .collect();
        let total = blocks.iter().map(|b| b.chunk_count).sum();

        let mut lap_boundaries: Vec<u64> = markers.iter().flat_map(Marker::boundaries).collect();
        lap_boundaries.sort_unstable();
        lap_boundaries.dedup();

        let date = NaiveDate::from_ymd_opt(1880, 1, 1)
            .and_then(|d| d.checked_add_signed(Duration::days(days_since_1880 as i64)))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| DecoderError::DecodeError("SRM date out of range".to_string()))?;

        let interval = secs_duration(interval_secs);
        let mut header = HeaderInfo::new(Format::Srm, TimeBasis::Floating);
        header.start = date.checked_add_signed(origin);
        header.sampling_interval = Some(interval);
        header.version = Some(format!("SRM{}", version));
        let comment_len = comment_len.min(HEADER_COMMENT_LEN);
        let comment = String::from_utf8_lossy(&comment[..comment_len])
            .trim_end_matches('\0')
            .trim()
            .to_string();
        if !comment.is_empty() {
            header.comment = Some(comment);
        }

        log::info!(
            "SRM{} file: {} blocks, {} markers, {} chunks at {}s",
            version,
            blocks.len(),
            markers.len(),
            total,
            interval_secs
        );
        log::debug!(
            "SRM calibration zero={} slope={}, wheel circumference {}mm",
            zero,
            slope,
            wheel_circumference
        );

        Ok(Self {
            cursor,
            header,
            version,
            interval,
            interval_secs,
            blocks,
            block_index: 0,
            remaining_in_block: 0,
            offset: Duration::zero(),
            lap_boundaries,
            next_boundary: 0,
            lap: 0,
            index: 0,
            total,
            distance: 0.0,
            finished: false,
        })
    }

    /// Offset of the next chunk from the header start
    fn next_offset(&mut self) -> Duration {
        if self.remaining_in_block > 0 {
            self.remaining_in_block -= 1;
            self.offset = self.offset + self.interval;
            return self.offset;
        }
        while let Some(block) = self.blocks.get(self.block_index) {
            self.block_index += 1;
            if block.chunk_count > 0 {
                self.remaining_in_block = block.chunk_count - 1;
                self.offset = block.start;
                break;
            }
        }
        self.offset
    }

    fn read_chunk(&mut self) -> io::Result<RawRecord> {
        let mut record = RawRecord::new();

        let kph = if self.version < 7 {
            let [b0, b1, b2] = self.cursor.read_array::<3>()?;
            let watts = (b1 & 0x0F) as u16 | ((b2 as u16) << 4);
            let kph = ((((b1 & 0xF0) as u16) << 3) | (b0 & 0x7F) as u16) as f64 * 3.0 / 26.0;
            let cadence = self.cursor.read_u8()?;
            let heart_rate = self.cursor.read_u8()?;
            record.insert_number("watts", watts as f64);
            record.insert_number("cad", cadence as f64);
            record.insert_number("hr", heart_rate as f64);
            kph
        } else {
            let watts = self.cursor.read_u16(Endian::Little)?;
            let cadence = self.cursor.read_u8()?;
            let heart_rate = self.cursor.read_u8()?;
            let speed = self.cursor.read_i32(Endian::Little)?;
            let altitude = self.cursor.read_i32(Endian::Little)?;
            let temperature = self.cursor.read_i16(Endian::Little)?;
            record.insert_number("watts", watts as f64);
            record.insert_number("cad", cadence as f64);
            record.insert_number("hr", heart_rate as f64);
            record.insert_number("alt", altitude as f64);
            record.insert_number("temp", temperature as f64 * 0.1);

            if self.version == 9 {
                let lat = self.cursor.read_i32(Endian::Little)?;
                let lon = self.cursor.read_i32(Endian::Little)?;
                record.insert_number("lat", lat as f64 * 180.0 / i32::MAX as f64);
                record.insert_number("lon", lon as f64 * 180.0 / i32::MAX as f64);
            }

            if speed < 0 {
                0.0
            } else {
                speed as f64 * 3.6 / 1000.0
            }
        };

        self.distance += self.interval_secs * kph / 3.6;
        record.insert_number("kph", kph);
        record.insert_number("metres", self.distance);
        Ok(record)
    }
}

impl<R: Read> Iterator for SrmDecoder<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.index >= self.total {
            return None;
        }

        let index = self.index;
        let mut record = match self.read_chunk() {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                let err = record_error(Format::Srm, index as usize, e);
                log::error!("Stopping SRM decode: {}", err);
                return Some(Err(err));
            }
        };
        self.index += 1;

        if self.lap_boundaries.get(self.next_boundary) == Some(&index) {
            self.lap += 1;
            self.next_boundary += 1;
        }

        let offset = self.next_offset();
        record.insert("time", RawValue::Time(RawTime::Offset(offset)));
        record.insert_number("lap", self.lap as f64);
        Some(Ok(record))
    }
}

impl<R: Read> RecordSource for SrmDecoder<R> {
    fn header(&self) -> &HeaderInfo {
        &self.header
    }
}
