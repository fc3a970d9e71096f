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

//! DFT window records: sparse antenna measurements used by the stylus
//! position/pressure/button estimator.

use crate::error::Result;
use crate::reader::{ByteReader, FromLeBytes};

use super::wire::{DftWindowHeader, DftWindowRow};

pub const NUM_COMPONENTS: usize = super::wire::DFT_NUM_COMPONENTS;
pub const PRESSURE_ROWS: usize = super::wire::DFT_PRESSURE_ROWS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Position,
    Button,
    Pressure,
    PositionMpp2,
    BinaryMpp2,
}

impl WindowType {
    fn from_data_type(data_type: u8) -> Option<Self> {
        match data_type {
            6 => Some(WindowType::Position),
            9 => Some(WindowType::Button),
            11 => Some(WindowType::Pressure),
            12 => Some(WindowType::PositionMpp2),
            13 => Some(WindowType::BinaryMpp2),
            _ => None,
        }
    }
}

/// A single antenna measurement row, widened to `i32`/`u64` so downstream
/// arithmetic (sums across rows and axes) can't silently wrap.
#[derive(Debug, Clone)]
pub struct Row {
    pub first: i32,
    pub magnitude: u64,
    pub real: [i32; NUM_COMPONENTS],
    pub imag: [i32; NUM_COMPONENTS],
}

impl Row {
    fn from_wire(row: DftWindowRow) -> Self {
        let mut real = [0i32; NUM_COMPONENTS];
        let mut imag = [0i32; NUM_COMPONENTS];
        for i in 0..NUM_COMPONENTS {
            real[i] = row.real[i] as i32;
            imag[i] = row.imag[i] as i32;
        }
        Row {
            first: row.first as i32,
            magnitude: row.magnitude as u64,
            real,
            imag,
        }
    }
}

/// A decoded DFT window: antenna rows split evenly between the x and y axes.
///
/// The wire header carries no screen dimensions, so `width`/`height` are
/// always `0` here; the estimator falls back to device metadata for those,
/// matching the vendor implementation's same fallback.
#[derive(Debug, Clone)]
pub struct DftWindow {
    pub window_type: WindowType,
    pub group: Option<u32>,
    pub width: u8,
    pub height: u8,
    pub x: Vec<Row>,
    pub y: Vec<Row>,
}

impl DftWindow {
    /// Parses a full DFT window payload (header followed by `num_rows` rows,
    /// split evenly between x and y axes) from `reader`.
    ///
    /// Returns `Ok(None)` for a recognized-but-unsupported or unknown window
    /// type, letting the caller skip it without mutating estimator state.
    pub fn parse(reader: &mut ByteReader) -> Result<Option<DftWindow>> {
        let header = reader.read::<DftWindowHeader>()?;

        let window_type = match WindowType::from_data_type(header.data_type) {
            Some(t) => t,
            None => {
                reader.skip(reader.remaining())?;
                return Ok(None);
            }
        };

        let total_rows = header.num_rows as usize;
        let half = total_rows / 2;

        let mut x = Vec::with_capacity(half);
        let mut y = Vec::with_capacity(half);

        for _ in 0..half {
            x.push(Row::from_wire(reader.read::<DftWindowRow>()?));
        }
        for _ in 0..half {
            y.push(Row::from_wire(reader.read::<DftWindowRow>()?));
        }

        Ok(Some(DftWindow {
            window_type,
            group: Some(header.seq_num as u32),
            width: 0,
            height: 0,
            x,
            y,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_bytes(magnitude: u32, first: i8) -> Vec<u8> {
        let mut b = vec![0u8; DftWindowRow::SIZE];
        b[4..8].copy_from_slice(&magnitude.to_le_bytes());
        let first_offset = 4 + 4 + 2 * NUM_COMPONENTS + 2 * NUM_COMPONENTS;
        b[first_offset] = first as u8;
        b
    }

    #[test]
    fn unknown_type_is_skipped_not_errored() {
        let mut bytes = vec![0u8; DftWindowHeader::SIZE];
        bytes[8] = 2; // num_rows
        bytes[10] = 0xFE; // unrecognized data_type
        bytes.extend(row_bytes(10, 0));
        bytes.extend(row_bytes(20, 0));
        let mut r = ByteReader::new(&bytes);
        let result = DftWindow::parse(&mut r).unwrap();
        assert!(result.is_none());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn parses_position_window_rows() {
        let mut bytes = vec![0u8; DftWindowHeader::SIZE];
        bytes[8] = 2; // num_rows
        bytes[10] = 6; // Position
        bytes.extend(row_bytes(100, 1));
        bytes.extend(row_bytes(200, 2));
        let mut r = ByteReader::new(&bytes);
        let window = DftWindow::parse(&mut r).unwrap().unwrap();
        assert_eq!(window.window_type, WindowType::Position);
        assert_eq!(window.x.len(), 1);
        assert_eq!(window.y.len(), 1);
        assert_eq!(window.x[0].magnitude, 100);
        assert_eq!(window.y[0].magnitude, 200);
    }
}
