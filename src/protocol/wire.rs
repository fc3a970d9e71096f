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

//! Packed little-endian wire structs for the nested IPTS report envelope.
//!
//! Field layouts mirror the vendor's `ipts_*` structs byte for byte; reserved
//! padding is read and discarded, never interpreted.

use crate::reader::{ByteReader, FromLeBytes};

pub const DFT_NUM_COMPONENTS: usize = 9;
pub const DFT_PRESSURE_ROWS: usize = 6;

pub struct HidFrameHeader {
    pub size: u32,
    pub kind: u8,
}

impl FromLeBytes for HidFrameHeader {
    const SIZE: usize = 7;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let size = r.read::<u32>().unwrap();
        r.skip(1).unwrap();
        let kind = r.read::<u8>().unwrap();
        r.skip(1).unwrap();
        HidFrameHeader { size, kind }
    }
}

pub struct RawHeader {
    pub frames: u32,
}

impl FromLeBytes for RawHeader {
    const SIZE: usize = 12;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        r.skip(4).unwrap();
        let frames = r.read::<u32>().unwrap();
        r.skip(4).unwrap();
        RawHeader { frames }
    }
}

pub struct RawSubFrameHeader {
    pub kind: u16,
    pub size: u32,
}

impl FromLeBytes for RawSubFrameHeader {
    const SIZE: usize = 16;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        r.skip(2).unwrap();
        let kind = r.read::<u16>().unwrap();
        let size = r.read::<u32>().unwrap();
        r.skip(8).unwrap();
        RawSubFrameHeader { kind, size }
    }
}

pub struct ReportHeader {
    pub kind: u8,
    pub size: u16,
}

impl FromLeBytes for ReportHeader {
    const SIZE: usize = 4;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let kind = r.read::<u8>().unwrap();
        r.skip(1).unwrap();
        let size = r.read::<u16>().unwrap();
        ReportHeader { kind, size }
    }
}

pub struct HeatmapDim {
    pub height: u8,
    pub width: u8,
    pub y_min: u8,
    pub y_max: u8,
    pub x_min: u8,
    pub x_max: u8,
    pub z_min: u8,
    pub z_max: u8,
}

impl FromLeBytes for HeatmapDim {
    const SIZE: usize = 8;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        HeatmapDim {
            height: r.read::<u8>().unwrap(),
            width: r.read::<u8>().unwrap(),
            y_min: r.read::<u8>().unwrap(),
            y_max: r.read::<u8>().unwrap(),
            x_min: r.read::<u8>().unwrap(),
            x_max: r.read::<u8>().unwrap(),
            z_min: r.read::<u8>().unwrap(),
            z_max: r.read::<u8>().unwrap(),
        }
    }
}

pub struct StylusReportHeader {
    pub elements: u8,
    pub serial: u32,
}

impl FromLeBytes for StylusReportHeader {
    const SIZE: usize = 8;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let elements = r.read::<u8>().unwrap();
        r.skip(3).unwrap();
        let serial = r.read::<u32>().unwrap();
        StylusReportHeader { elements, serial }
    }
}

pub struct StylusDataV1 {
    pub mode: u8,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
}

impl FromLeBytes for StylusDataV1 {
    const SIZE: usize = 12;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        r.skip(4).unwrap();
        let mode = r.read::<u8>().unwrap();
        let x = r.read::<u16>().unwrap();
        let y = r.read::<u16>().unwrap();
        let pressure = r.read::<u16>().unwrap();
        r.skip(1).unwrap();
        StylusDataV1 { mode, x, y, pressure }
    }
}

pub struct StylusDataV2 {
    pub timestamp: u16,
    pub mode: u16,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
    pub altitude: u16,
    pub azimuth: u16,
}

impl FromLeBytes for StylusDataV2 {
    const SIZE: usize = 16;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let timestamp = r.read::<u16>().unwrap();
        let mode = r.read::<u16>().unwrap();
        let x = r.read::<u16>().unwrap();
        let y = r.read::<u16>().unwrap();
        let pressure = r.read::<u16>().unwrap();
        let altitude = r.read::<u16>().unwrap();
        let azimuth = r.read::<u16>().unwrap();
        r.skip(2).unwrap();
        StylusDataV2 {
            timestamp,
            mode,
            x,
            y,
            pressure,
            altitude,
            azimuth,
        }
    }
}

pub struct DftWindowHeader {
    pub num_rows: u8,
    pub seq_num: u8,
    pub data_type: u8,
}

impl FromLeBytes for DftWindowHeader {
    const SIZE: usize = 12;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        r.skip(4).unwrap();
        let num_rows = r.read::<u8>().unwrap();
        let seq_num = r.read::<u8>().unwrap();
        r.skip(3).unwrap();
        let data_type = r.read::<u8>().unwrap();
        r.skip(2).unwrap();
        DftWindowHeader {
            num_rows,
            seq_num,
            data_type,
        }
    }
}

/// One antenna measurement row: `frequency`/`magnitude` are derived
/// quantities, `real`/`imag` are the raw DFT components, `first`/`last`/`mid`
/// identify the antenna index range this row covers.
pub struct DftWindowRow {
    pub magnitude: u32,
    pub real: [i16; DFT_NUM_COMPONENTS],
    pub imag: [i16; DFT_NUM_COMPONENTS],
    pub first: i8,
}

impl FromLeBytes for DftWindowRow {
    const SIZE: usize = 4 + 4 + 2 * DFT_NUM_COMPONENTS + 2 * DFT_NUM_COMPONENTS + 4;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        r.skip(4).unwrap();
        let magnitude = r.read::<u32>().unwrap();
        let mut real = [0i16; DFT_NUM_COMPONENTS];
        for slot in real.iter_mut() {
            *slot = r.read::<i16>().unwrap();
        }
        let mut imag = [0i16; DFT_NUM_COMPONENTS];
        for slot in imag.iter_mut() {
            *slot = r.read::<i16>().unwrap();
        }
        let first = r.read::<i8>().unwrap();
        r.skip(3).unwrap();
        DftWindowRow {
            magnitude,
            real,
            imag,
            first,
        }
    }
}

pub struct MetadataSize {
    pub rows: u32,
    pub columns: u32,
    pub width: u32,
    pub height: u32,
}

impl FromLeBytes for MetadataSize {
    const SIZE: usize = 16;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        MetadataSize {
            rows: r.read::<u32>().unwrap(),
            columns: r.read::<u32>().unwrap(),
            width: r.read::<u32>().unwrap(),
            height: r.read::<u32>().unwrap(),
        }
    }
}

pub struct MetadataTransform {
    pub xx: f32,
    pub yy: f32,
}

impl FromLeBytes for MetadataTransform {
    const SIZE: usize = 24;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let xx = r.read::<f32>().unwrap();
        r.skip(12).unwrap(); // yx, tx, xy
        let yy = r.read::<f32>().unwrap();
        r.skip(4).unwrap(); // ty
        MetadataTransform { xx, yy }
    }
}

/// Touchpad button element (no frame header; reports are a flat, packed
/// sequence of these).
pub struct TouchpadSample {
    pub pressure: u16,
    pub button: bool,
}

impl FromLeBytes for TouchpadSample {
    const SIZE: usize = 16;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut r = ByteReader::new(bytes);
        let pressure = r.read::<u16>().unwrap();
        r.skip(12).unwrap();
        let button = r.read::<u8>().unwrap() != 0;
        r.skip(1).unwrap();
        TouchpadSample { pressure, button }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hid_frame_header_size_matches_wire() {
        let bytes = [4u8, 0, 0, 0, 0, 0x01, 0];
        let h = HidFrameHeader::from_le_bytes(&bytes);
        assert_eq!(h.size, 4);
        assert_eq!(h.kind, 0x01);
    }

    #[test]
    fn dft_row_reads_components() {
        let mut bytes = vec![0u8; DftWindowRow::SIZE];
        bytes[4..8].copy_from_slice(&100u32.to_le_bytes());
        bytes[8..10].copy_from_slice(&7i16.to_le_bytes());
        let row = DftWindowRow::from_le_bytes(&bytes);
        assert_eq!(row.magnitude, 100);
        assert_eq!(row.real[0], 7);
    }
}
