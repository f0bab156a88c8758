use bytes::{Buf, BytesMut};
use log::debug;

use crate::error::DecodeError;
use crate::telemetry::TelemetrySample;

/// Lines per telemetry frame.
pub const FRAME_LINES: usize = 7;

/// Longest unterminated line we are willing to hold on to.
pub const MAX_LINE_LEN: usize = 4096;

/// Position of every surfaced field inside a frame. Line 2 is reserved and
/// never read.
const VOLTAGE: (usize, &str) = (0, "voltage");
const CURRENT: (usize, &str) = (1, "current");
const TEMPERATURE: (usize, &str) = (3, "temperature");
const GRID_POWER: (usize, &str) = (4, "grid_power");
const SOLAR_POWER: (usize, &str) = (5, "solar_power");
const BATTERY_LEVEL: (usize, &str) = (6, "battery_level");

fn parse_field(
    lines: &[&[u8]; FRAME_LINES],
    field: (usize, &'static str),
) -> Result<f64, DecodeError> {
    let (index, name) = field;
    let raw = lines[index];
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .ok_or_else(|| DecodeError::NotNumeric {
            index,
            name,
            value: String::from_utf8_lossy(raw).trim().to_string(),
        })
}

/// Interprets seven lines positionally as one sample.
pub fn decode_frame(lines: &[&[u8]; FRAME_LINES]) -> Result<TelemetrySample, DecodeError> {
    Ok(TelemetrySample {
        voltage: parse_field(lines, VOLTAGE)?,
        current: parse_field(lines, CURRENT)?,
        temperature: parse_field(lines, TEMPERATURE)?,
        grid_power: parse_field(lines, GRID_POWER)?,
        solar_power: parse_field(lines, SOLAR_POWER)?,
        battery_level: parse_field(lines, BATTERY_LEVEL)?,
    })
}

/// Upper bound for everything buffered while a frame is incomplete.
pub const MAX_BUFFERED: usize = FRAME_LINES * MAX_LINE_LEN;

/// Accumulates raw telemetry bytes and cuts them into frames.
///
/// The buffer always holds fewer than seven complete lines followed by at
/// most one unterminated line. Every newline-terminated line counts, empty or
/// not, so field positions never shift. How the bytes were split across reads
/// makes no difference to what comes out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Offsets just past each newline found so far in `buffer`.
    line_ends: Vec<usize>,
    /// Everything before this offset has already been searched for newlines.
    scanned: usize,
    decoded: u64,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            line_ends: Vec::with_capacity(FRAME_LINES),
            scanned: 0,
            decoded: 0,
            dropped: 0,
        }
    }

    /// Appends `bytes` and returns every sample that can now be decoded, in
    /// arrival order. Malformed frames are consumed and counted, not returned.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<TelemetrySample> {
        self.buffer.extend_from_slice(bytes);

        let mut samples = Vec::new();
        while let Some(result) = self.next_frame() {
            match result {
                Ok(sample) => {
                    self.decoded += 1;
                    samples.push(sample);
                }
                Err(e) => {
                    self.dropped += 1;
                    debug!("dropping telemetry frame: {e}");
                }
            }
        }

        let complete = self.line_ends.last().copied().unwrap_or(0);
        let partial = self.buffer.len() - complete;
        if partial > MAX_LINE_LEN || self.buffer.len() > MAX_BUFFERED {
            self.dropped += 1;
            debug!("dropping telemetry buffer: {}", DecodeError::Overflow(MAX_LINE_LEN));
            self.reset();
        }

        samples
    }

    /// Finds newlines past the last scan. Once seven lines are complete they
    /// are decoded and removed from the buffer.
    fn next_frame(&mut self) -> Option<Result<TelemetrySample, DecodeError>> {
        while self.line_ends.len() < FRAME_LINES {
            match self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.scanned += offset + 1;
                    self.line_ends.push(self.scanned);
                }
                None => {
                    self.scanned = self.buffer.len();
                    return None;
                }
            }
        }

        let empty: &[u8] = &[];
        let mut lines = [empty; FRAME_LINES];
        let mut start = 0;
        for (line, &end) in lines.iter_mut().zip(&self.line_ends) {
            *line = &self.buffer[start..end - 1];
            start = end;
        }
        let result = decode_frame(&lines);

        self.buffer.advance(start);
        self.line_ends.clear();
        self.scanned = 0;
        Some(result)
    }

    /// Forgets everything buffered, e.g. the torn tail of a dead session.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.line_ends.clear();
        self.scanned = 0;
    }

    /// Bytes received but not yet part of a decoded frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
