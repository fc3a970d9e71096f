/* Copyright (C) 2017 by Jacob Alexander
 *
 * This file is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Decodes the layered IPTS report envelope (raw bytes -> hid-frames ->
//! reports) into a flat sequence of [`Sample`] values.
//!
//! The parser holds no handler state: each call to [`Parser::parse`] returns
//! the samples found in that one report, in encounter order. This keeps
//! `parser.parse(concat(a, b))` observably equal to
//! `parser.parse(a); parser.parse(b)` as long as `a`/`b` split on a report
//! boundary, which is what the transport always hands us (one `read()` is
//! one HID report).

use crate::descriptor::{Metadata, Transform2D};
use crate::error::Result;
use crate::reader::{ByteReader, FromLeBytes};
use crate::types::ButtonSample;

use super::dft::DftWindow;
use super::wire::{
    HeatmapDim, HidFrameHeader, MetadataSize, MetadataTransform, RawHeader, RawSubFrameHeader,
    ReportHeader, StylusDataV1, StylusDataV2, StylusReportHeader, TouchpadSample,
};

const HID_FRAME_HID: u8 = 0x00;
const HID_FRAME_HEATMAP: u8 = 0x01;
const HID_FRAME_METADATA: u8 = 0x02;
const HID_FRAME_RAW: u8 = 0xEE;
const HID_FRAME_REPORTS: u8 = 0xFF;

const RAW_SUBFRAME_STYLUS: u16 = 0x06;
const RAW_SUBFRAME_HEATMAP: u16 = 0x08;

const REPORT_DIMENSIONS: u8 = 0x03;
const REPORT_HEATMAP: u8 = 0x25;
const REPORT_STYLUS_V1: u8 = 0x10;
const REPORT_STYLUS_V2: u8 = 0x60;
const REPORT_DFT: u8 = 0x5C;
const REPORT_PEN_LIFT: u8 = 0x63;

/// A legacy (non-DFT) stylus packet, normalized from either wire version.
///
/// `timestamp` is `0` for `v1` samples, which don't carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyStylusSample {
    pub serial: u32,
    pub proximity: bool,
    pub contact: bool,
    pub button: bool,
    pub rubber: bool,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
    pub timestamp: u16,
}

/// One decoded unit of data from a touch-data report.
///
/// Touchpad button samples aren't nested inside this envelope on the wire --
/// they're the entire contents of a separate, flat report type -- so they're
/// decoded by [`Parser::parse_button_report`] rather than appearing as a
/// variant here; see `Application::process_button_report`.
#[derive(Debug, Clone)]
pub enum Sample {
    Heatmap(crate::types::Heatmap),
    Stylus(LegacyStylusSample),
    Dft(DftWindow),
    Metadata(Metadata),
}

fn mode_bits(mode: u32) -> (bool, bool, bool, bool) {
    (
        mode & 0b0001 != 0,
        mode & 0b0010 != 0,
        mode & 0b0100 != 0,
        mode & 0b1000 != 0,
    )
}

#[derive(Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Parser
    }

    /// Parses one touch-data report: a 1-byte report id, a 2-byte scan-time
    /// timestamp, then a sequence of hid-frames.
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<Sample>> {
        let mut reader = ByteReader::new(bytes);
        reader.skip(1)?; // report id
        reader.skip(2)?; // scan time

        let mut samples = Vec::new();
        self.parse_hid_frames(&mut reader, &mut samples)?;
        Ok(samples)
    }

    /// Parses a touchpad button report: a flat, header-less sequence of
    /// 16-byte button samples.
    pub fn parse_button_report(&self, bytes: &[u8]) -> Result<Vec<ButtonSample>> {
        let mut reader = ByteReader::new(bytes);
        reader.skip(1)?; // report id
        let mut out = Vec::new();
        while reader.remaining() >= TouchpadSample::SIZE {
            let s = reader.read::<TouchpadSample>()?;
            out.push(ButtonSample {
                pressure: s.pressure as f32,
                button: s.button,
            });
        }
        Ok(out)
    }

    fn parse_hid_frames(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        while reader.remaining() >= HidFrameHeader::SIZE {
            let header = reader.read::<HidFrameHeader>()?;
            let mut payload = reader.sub(header.size as usize)?;

            match header.kind {
                HID_FRAME_HID => self.parse_hid_frames(&mut payload, samples)?,
                HID_FRAME_HEATMAP => self.parse_heatmap(&mut payload, samples)?,
                HID_FRAME_METADATA => self.parse_metadata(&mut payload, samples)?,
                HID_FRAME_RAW => self.parse_raw(&mut payload, samples)?,
                HID_FRAME_REPORTS => self.parse_reports(&mut payload, samples)?,
                _ => {} // unknown: already consumed exactly its declared size
            }
        }
        Ok(())
    }

    fn parse_heatmap(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        let dim = reader.read::<HeatmapDim>()?;
        let rows = dim.height as usize;
        let cols = dim.width as usize;
        let mut data_reader = reader.sub(rows * cols)?;
        let data = data_reader.peek_remaining().to_vec();

        samples.push(Sample::Heatmap(crate::types::Heatmap {
            rows,
            cols,
            y_min: dim.y_min,
            y_max: dim.y_max,
            x_min: dim.x_min,
            x_max: dim.x_max,
            z_min: dim.z_min,
            z_max: dim.z_max,
            data,
        }));
        Ok(())
    }

    fn parse_metadata(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        let size = reader.read::<MetadataSize>()?;
        let transform = reader.read::<MetadataTransform>()?;
        reader.skip(reader.remaining())?; // the unknown float block

        samples.push(Sample::Metadata(Metadata {
            columns: size.columns as u8,
            rows: size.rows as u8,
            width_mm: size.width,
            height_mm: size.height,
            transform: Transform2D {
                xx: transform.xx,
                yy: transform.yy,
            },
        }));
        Ok(())
    }

    fn parse_raw(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        let header = reader.read::<RawHeader>()?;

        for _ in 0..header.frames {
            let sub_header = reader.read::<RawSubFrameHeader>()?;
            let mut payload = reader.sub(sub_header.size as usize)?;

            match sub_header.kind {
                RAW_SUBFRAME_STYLUS => self.parse_stylus_report(&mut payload, samples)?,
                RAW_SUBFRAME_HEATMAP => self.parse_heatmap(&mut payload, samples)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_stylus_report(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        let header = reader.read::<StylusReportHeader>()?;
        if header.elements == 0 {
            return Ok(());
        }

        let per_element = reader.remaining() / header.elements as usize;

        for _ in 0..header.elements {
            let sample = match per_element {
                n if n == StylusDataV1::SIZE => {
                    let d = reader.read::<StylusDataV1>()?;
                    let (proximity, contact, button, rubber) = mode_bits(d.mode as u32);
                    LegacyStylusSample {
                        serial: header.serial,
                        proximity,
                        contact,
                        button,
                        rubber,
                        x: d.x,
                        y: d.y,
                        pressure: d.pressure,
                        timestamp: 0,
                    }
                }
                n if n == StylusDataV2::SIZE => {
                    let d = reader.read::<StylusDataV2>()?;
                    let (proximity, contact, button, rubber) = mode_bits(d.mode as u32);
                    LegacyStylusSample {
                        serial: header.serial,
                        proximity,
                        contact,
                        button,
                        rubber,
                        x: d.x,
                        y: d.y,
                        pressure: d.pressure,
                        timestamp: d.timestamp,
                    }
                }
                _ => return Err(crate::error::truncated("stylus element")),
            };
            samples.push(Sample::Stylus(sample));
        }
        Ok(())
    }

    fn parse_reports(&self, reader: &mut ByteReader, samples: &mut Vec<Sample>) -> Result<()> {
        let mut pending_dim: Option<HeatmapDim> = None;

        while reader.remaining() >= ReportHeader::SIZE {
            let header = reader.read::<ReportHeader>()?;
            let mut payload = reader.sub(header.size as usize)?;

            match header.kind {
                REPORT_DIMENSIONS => {
                    pending_dim = Some(payload.read::<HeatmapDim>()?);
                }
                REPORT_HEATMAP => {
                    if let Some(dim) = pending_dim.take() {
                        let rows = dim.height as usize;
                        let cols = dim.width as usize;
                        let mut data_reader = payload.sub(rows * cols)?;
                        let data = data_reader.peek_remaining().to_vec();
                        samples.push(Sample::Heatmap(crate::types::Heatmap {
                            rows,
                            cols,
                            y_min: dim.y_min,
                            y_max: dim.y_max,
                            x_min: dim.x_min,
                            x_max: dim.x_max,
                            z_min: dim.z_min,
                            z_max: dim.z_max,
                            data,
                        }));
                    }
                }
                REPORT_STYLUS_V1 | REPORT_STYLUS_V2 => {
                    self.parse_stylus_report(&mut payload, samples)?;
                }
                REPORT_DFT => {
                    if let Some(window) = DftWindow::parse(&mut payload)? {
                        samples.push(Sample::Dft(window));
                    }
                }
                REPORT_PEN_LIFT => {
                    samples.push(Sample::Stylus(LegacyStylusSample {
                        serial: 0,
                        proximity: false,
                        contact: false,
                        button: false,
                        rubber: false,
                        x: 0,
                        y: 0,
                        pressure: 0,
                        timestamp: 0,
                    }));
                }
                _ => {} // unknown report type, including the bare timestamp record
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hid_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.push(0);
        buf.push(kind);
        buf.push(0);
        buf.extend_from_slice(payload);
        buf
    }

    fn touch_report(hid_frames: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8]; // report id
        buf.extend_from_slice(&0u16.to_le_bytes()); // scan time
        buf.extend_from_slice(hid_frames);
        buf
    }

    #[test]
    fn decodes_single_heatmap_frame() {
        let dim = [2u8, 2, 0, 0, 0, 0, 0, 255]; // height=2 width=2 ... z_max=255
        let data = [10u8, 20, 30, 40];
        let mut payload = Vec::new();
        payload.extend_from_slice(&dim);
        payload.extend_from_slice(&data);

        let report = touch_report(&hid_frame(0x01, &payload));
        let parser = Parser::new();
        let samples = parser.parse(&report).unwrap();
        assert_eq!(samples.len(), 1);
        match &samples[0] {
            Sample::Heatmap(hm) => {
                assert_eq!(hm.rows, 2);
                assert_eq!(hm.cols, 2);
                assert_eq!(hm.data, data);
            }
            _ => panic!("expected heatmap sample"),
        }
    }

    #[test]
    fn nested_hid_frame_recurses() {
        let inner = hid_frame(0x01, &[1, 1, 0, 0, 0, 0, 0, 255, 7]);
        let report = touch_report(&hid_frame(0x00, &inner));
        let parser = Parser::new();
        let samples = parser.parse(&report).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn unknown_hid_frame_is_skipped() {
        let report = touch_report(&hid_frame(0x7E, &[1, 2, 3, 4]));
        let parser = Parser::new();
        let samples = parser.parse(&report).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn truncated_declared_size_is_malformed() {
        let mut frame = hid_frame(0x01, &[0; 8]);
        // Lie about the size so the sub-reader runs past the buffer.
        frame[0] = 0xFF;
        let report = touch_report(&frame);
        let parser = Parser::new();
        assert!(parser.parse(&report).is_err());
    }

    #[test]
    fn stream_is_splittable_at_report_boundary() {
        let dim = [1u8, 1, 0, 0, 0, 0, 0, 255];
        let report_a = touch_report(&hid_frame(0x01, &[&dim[..], &[42]].concat()));
        let report_b = touch_report(&hid_frame(0x01, &[&dim[..], &[7]].concat()));

        let parser = Parser::new();
        let whole_a = parser.parse(&report_a).unwrap();
        let whole_b = parser.parse(&report_b).unwrap();

        // Parsing each report independently (as the transport always
        // delivers them) yields the same per-report sample sequence as
        // parsing them back to back.
        let mut combined = Vec::new();
        combined.extend(parser.parse(&report_a).unwrap());
        combined.extend(parser.parse(&report_b).unwrap());

        assert_eq!(whole_a.len() + whole_b.len(), combined.len());
    }
}
