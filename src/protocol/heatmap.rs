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

//! Converts raw capacitance bytes into normalized `[0,1]` contact
//! likelihoods.
//!
//! The device reports *high* raw values for the absence of a contact, so the
//! sense is inverted: a byte at `zmax` normalizes to `0.0`, a byte at `zmin`
//! normalizes to `1.0`.

use crate::types::Heatmap;

/// Normalizes `heatmap.data` in place into `out`, one float per cell.
///
/// `out` is resized to `rows * cols` if necessary, so callers can reuse the
/// same buffer across frames.
pub fn normalize(heatmap: &Heatmap, out: &mut Vec<f64>) {
    let len = heatmap.rows * heatmap.cols;
    out.resize(len, 0.0);

    let zmin = heatmap.z_min as f64;
    let zmax = heatmap.z_max as f64;
    let range = zmax - zmin;

    for (dst, &raw) in out.iter_mut().zip(heatmap.data.iter()) {
        let v = if range.abs() < f64::EPSILON {
            0.0
        } else {
            1.0 - (raw as f64 - zmin) / range
        };
        *dst = v.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heatmap(data: Vec<u8>, rows: usize, cols: usize) -> Heatmap {
        Heatmap {
            rows,
            cols,
            y_min: 0,
            y_max: 0,
            x_min: 0,
            x_max: 0,
            z_min: 0,
            z_max: 255,
            data,
        }
    }

    #[test]
    fn inverts_and_normalizes() {
        let hm = heatmap(vec![0, 255, 128], 1, 3);
        let mut out = Vec::new();
        normalize(&hm, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-9);
        assert!((out[1] - 0.0).abs() < 1e-9);
        assert!((out[2] - (1.0 - 128.0 / 255.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_range_is_zero() {
        let mut hm = heatmap(vec![10, 10], 1, 2);
        hm.z_min = 10;
        hm.z_max = 10;
        let mut out = Vec::new();
        normalize(&hm, &mut out);
        assert_eq!(out, vec![0.0, 0.0]);
    }
}
