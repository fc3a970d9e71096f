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

//! Stateful DFT antenna-measurement estimator: turns a stream of
//! [`DftWindow`]s into a combined [`StylusSample`].
//!
//! Windows arrive in no fixed order and carry only a `group` tag linking a
//! `Position` window to the `Button` window that follows it. State is kept
//! between calls to [`DftStylus::process`] precisely because of this -- a
//! `Button` window on its own carries no position information.

use crate::config::Config;
use crate::protocol::dft::{DftWindow, Row, WindowType, NUM_COMPONENTS};
use crate::types::StylusSample;

const CENTER: usize = NUM_COMPONENTS / 2;

/// Sub-antenna interpolation of a single row's dominant component, returning
/// an antenna-space coordinate, or `NaN` if the row's amplitude doesn't clear
/// `min_amp`.
fn interpolate_position(row: &Row, min_amp: f64, exp: f64) -> f64 {
    let mut k = CENTER;
    let mut mind = -0.5;
    let mut maxd = 0.5;

    if row.real[k - 1] == 0 && row.imag[k - 1] == 0 {
        k += 1;
        mind = -1.0;
    } else if row.real[k + 1] == 0 && row.imag[k + 1] == 0 {
        k -= 1;
        maxd = 1.0;
    }

    let amp = (row.real[k] as f64).hypot(row.imag[k] as f64);
    if amp < min_amp {
        return f64::NAN;
    }

    let sin = row.real[k] as f64 / amp;
    let cos = row.imag[k] as f64 / amp;

    let x0 = sin * row.real[k - 1] as f64 + cos * row.imag[k - 1] as f64;
    let x1 = amp;
    let x2 = sin * row.real[k + 1] as f64 + cos * row.imag[k + 1] as f64;

    // `powf` on a negative base with a non-integer exponent yields NaN,
    // the same as the vendor implementation's unchecked `std::pow` -- an
    // ambiguous phase projection is meant to fall through to a lifted
    // stylus rather than be coerced into a number.
    let x0 = x0.powf(exp);
    let x1 = x1.powf(exp);
    let x2 = x2.powf(exp);

    if x0 + x2 <= 2.0 * x1 {
        return f64::NAN;
    }

    let d = (x0 - x2) / (2.0 * (x0 - 2.0 * x1 + x2));
    row.first as f64 + k as f64 + d.clamp(mind, maxd)
}

/// Jacobsen's quadratic frequency estimator over the 3 rows centred on the
/// combined-magnitude peak. Returns a fraction of `rows - 1`, or `NaN` if the
/// window is too small or too weak to trust.
fn interpolate_frequency(x_rows: &[Row], y_rows: &[Row], rows: usize, min_mag: f64) -> f64 {
    if rows < 3 {
        return f64::NAN;
    }

    let mut max_i = 0;
    let mut max_m = 0u64;
    for i in 0..rows {
        let m = x_rows[i].magnitude + y_rows[i].magnitude;
        if m > max_m {
            max_m = m;
            max_i = i;
        }
    }

    if (max_m as f64) < 2.0 * min_mag {
        return f64::NAN;
    }

    let mut mind = -0.5;
    let mut maxd = 0.5;
    let mut max_i = max_i;
    if max_i == 0 {
        max_i = 1;
        mind = -1.0;
    } else if max_i == rows - 1 {
        max_i = rows - 2;
        maxd = 1.0;
    }

    let mut real = [0f64; 3];
    let mut imag = [0f64; 3];
    for (slot, ri) in [max_i - 1, max_i, max_i + 1].into_iter().enumerate() {
        for comp in 0..NUM_COMPONENTS {
            real[slot] += (x_rows[ri].real[comp] + y_rows[ri].real[comp]) as f64;
            imag[slot] += (x_rows[ri].imag[comp] + y_rows[ri].imag[comp]) as f64;
        }
    }

    let ra = real[0] - real[2];
    let rb = 2.0 * real[1] - real[0] - real[2];
    let ia = imag[0] - imag[2];
    let ib = 2.0 * imag[1] - imag[0] - imag[2];

    let denom = rb * rb + ib * ib;
    if denom == 0.0 {
        return f64::NAN;
    }

    let d = ((ra * rb + ia * ib) / denom).clamp(mind, maxd);
    (max_i as f64 + d) / (rows as f64 - 1.0)
}

/// Tracks the state a `Button`/`Pressure`/MPP2 window needs from the
/// `Position` window that preceded it in the same antenna sweep.
pub struct DftStylus {
    sample: StylusSample,
    last_group: Option<u32>,
    m_real: f64,
    m_imag: f64,
    mppv2_in_contact: Option<bool>,
    mppv2_button_or_eraser: Option<bool>,
    mppv2_binary_group: Option<u32>,
}

impl Default for DftStylus {
    fn default() -> Self {
        DftStylus::new()
    }
}

impl DftStylus {
    pub fn new() -> Self {
        DftStylus {
            sample: StylusSample::default(),
            last_group: None,
            m_real: 0.0,
            m_imag: 0.0,
            mppv2_in_contact: None,
            mppv2_button_or_eraser: None,
            mppv2_binary_group: None,
        }
    }

    /// Feeds one decoded window into the estimator and returns the combined
    /// stylus state after it's applied.
    ///
    /// `columns`/`rows` are the antenna grid dimensions from device
    /// metadata -- the DFT wire format carries no screen size of its own.
    pub fn process(&mut self, window: &DftWindow, config: &Config, columns: u8, rows: u8) -> StylusSample {
        match window.window_type {
            WindowType::Position => self.handle_position(window, config, columns, rows),
            WindowType::Button => self.handle_button(window, config),
            WindowType::Pressure => self.handle_pressure(window, config),
            WindowType::PositionMpp2 => self.handle_position_mpp2(window, config),
            WindowType::BinaryMpp2 => self.handle_binary_mpp2(window, config),
        }
        self.sample
    }

    fn lift(&mut self) {
        self.sample.proximity = false;
        self.sample.contact = false;
        self.sample.button = false;
        self.sample.rubber = false;
        self.sample.pressure = 0.0;
        self.mppv2_in_contact = None;
        self.mppv2_button_or_eraser = None;
    }

    fn handle_position(&mut self, window: &DftWindow, config: &Config, columns: u8, rows: u8) {
        if window.x.is_empty() || window.y.is_empty() {
            self.lift();
            return;
        }

        let min_mag = config.dft_position_min_mag as u64;
        if window.x[0].magnitude <= min_mag || window.y[0].magnitude <= min_mag {
            self.lift();
            return;
        }

        self.last_group = window.group;
        self.m_real = (window.x[0].real[CENTER] + window.y[0].real[CENTER]) as f64;
        self.m_imag = (window.x[0].imag[CENTER] + window.y[0].imag[CENTER]) as f64;

        let min_amp = config.dft_position_min_amp as f64;
        let raw_x = interpolate_position(&window.x[0], min_amp, config.dft_position_exp);
        let raw_y = interpolate_position(&window.y[0], min_amp, config.dft_position_exp);

        if raw_x.is_nan() || raw_y.is_nan() {
            self.lift();
            return;
        }

        self.sample.proximity = true;

        let mut x = raw_x / (columns as f64 - 1.0).max(1.0);
        let mut y = raw_y / (rows as f64 - 1.0).max(1.0);
        if config.invert_x {
            x = 1.0 - x;
        }
        if config.invert_y {
            y = 1.0 - y;
        }
        self.sample.x = x.clamp(0.0, 1.0);
        self.sample.y = y.clamp(0.0, 1.0);

        if window.x.len() > 1
            && window.y.len() > 1
            && window.x[1].magnitude > config.dft_tilt_min_mag as u64
            && window.y[1].magnitude > config.dft_tilt_min_mag as u64
        {
            let raw_x1 = interpolate_position(&window.x[1], min_amp, config.dft_position_exp);
            let raw_y1 = interpolate_position(&window.y[1], min_amp, config.dft_position_exp);

            if !raw_x1.is_nan() && !raw_y1.is_nan() {
                let mut x1 = raw_x1 / (columns as f64 - 1.0).max(1.0);
                let mut y1 = raw_y1 / (rows as f64 - 1.0).max(1.0);
                if config.invert_x {
                    x1 = 1.0 - x1;
                }
                if config.invert_y {
                    y1 = 1.0 - y1;
                }

                let xt = (x1 - x) * (config.width / config.dft_tilt_distance);
                let yt = (y1 - y) * (config.height / config.dft_tilt_distance);

                let two_pi = 2.0 * std::f64::consts::PI;
                self.sample.azimuth = ((-yt).atan2(xt) + two_pi).rem_euclid(two_pi);
                self.sample.altitude = xt.hypot(yt).min(1.0).asin();
            }
        }
    }

    fn handle_button(&mut self, window: &DftWindow, config: &Config) {
        if self.last_group.is_none() || window.group != self.last_group {
            return;
        }
        if window.x.is_empty() || window.y.is_empty() {
            return;
        }

        let min_mag = config.dft_button_min_mag as u64;
        let mag_check = window.x[0].magnitude > min_mag && window.y[0].magnitude > min_mag;
        // An MPP2 verdict, when available, gates whether we trust this window
        // at all; the button/eraser distinction itself always comes from the
        // phase below.
        if !self.mppv2_button_or_eraser.unwrap_or(mag_check) {
            return;
        }

        let real_btn = (window.x[0].real[CENTER] + window.y[0].real[CENTER]) as f64;
        let imag_btn = (window.x[0].imag[CENTER] + window.y[0].imag[CENTER]) as f64;
        let val = self.m_real * real_btn + self.m_imag * imag_btn;

        self.sample.button = val < 0.0;
        self.sample.rubber = val > 0.0;
    }

    fn handle_pressure(&mut self, window: &DftWindow, config: &Config) {
        const PRESSURE_ROWS: usize = 6;
        if window.x.len() < PRESSURE_ROWS || window.y.len() < PRESSURE_ROWS {
            return;
        }

        let freq = interpolate_frequency(&window.x, &window.y, PRESSURE_ROWS, config.dft_freq_min_mag as f64);
        let pressure = 1.0 - freq;
        let pressure_contact = !freq.is_nan() && pressure > 0.0;

        self.sample.pressure = if pressure_contact { pressure.clamp(0.0, 1.0) } else { 0.0 };
        // PositionMPP2's row-dominance verdict, when available, wins over the
        // pressure-derived contact flag rather than only filling a gap.
        self.sample.contact = self.mppv2_in_contact.unwrap_or(pressure_contact);
    }

    fn handle_binary_mpp2(&mut self, window: &DftWindow, config: &Config) {
        if window.x.len() < 6 || window.y.len() < 6 {
            return;
        }
        if self.mppv2_binary_group.is_some() && self.mppv2_binary_group == window.group {
            return;
        }
        self.mppv2_binary_group = window.group;

        let mag4 = window.x[4].magnitude + window.y[4].magnitude;
        let mag5 = window.x[5].magnitude + window.y[5].magnitude;
        let threshold = 2 * config.dft_mpp2_button_min_mag as u64;

        self.mppv2_button_or_eraser = if mag4 < threshold && mag5 < threshold {
            None
        } else {
            Some(mag4 < mag5)
        };
    }

    fn handle_position_mpp2(&mut self, window: &DftWindow, config: &Config) {
        self.mppv2_in_contact = None;
        if window.x.len() < 4 || window.y.len() < 4 {
            return;
        }

        let mag2 = window.x[2].magnitude + window.y[2].magnitude;
        let mag3 = window.x[3].magnitude + window.y[3].magnitude;
        let threshold = 2 * config.dft_mpp2_contact_min_mag as u64;

        if !(mag2 < threshold && mag3 < threshold) {
            self.mppv2_in_contact = Some(mag2 < mag3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(magnitude: u64, first: i32, center_real: i32, center_imag: i32) -> Row {
        let mut real = [0i32; NUM_COMPONENTS];
        let mut imag = [0i32; NUM_COMPONENTS];
        real[CENTER] = center_real;
        imag[CENTER] = center_imag;
        real[CENTER - 1] = center_real / 2;
        imag[CENTER - 1] = center_imag / 2;
        real[CENTER + 1] = center_real / 3;
        imag[CENTER + 1] = center_imag / 3;
        Row { first, magnitude, real, imag }
    }

    fn position_window(group: u32, mag: u64) -> DftWindow {
        DftWindow {
            window_type: WindowType::Position,
            group: Some(group),
            width: 0,
            height: 0,
            x: vec![row(mag, 10, 3000, 1000)],
            y: vec![row(mag, 6, 3000, 1000)],
        }
    }

    #[test]
    fn weak_signal_lifts_the_stylus() {
        let config = Config::default();
        let mut stylus = DftStylus::new();
        let mut window = position_window(1, 10);
        window.x[0].magnitude = 1;
        window.y[0].magnitude = 1;
        let sample = stylus.process(&window, &config, 20, 15);
        assert!(!sample.proximity);
    }

    #[test]
    fn strong_signal_reports_proximity_and_a_position() {
        let config = Config::default();
        let mut stylus = DftStylus::new();
        let window = position_window(1, 5000);
        let sample = stylus.process(&window, &config, 20, 15);
        assert!(sample.proximity);
        assert!(sample.x >= 0.0 && sample.x <= 1.0);
        assert!(sample.y >= 0.0 && sample.y <= 1.0);
    }

    #[test]
    fn button_requires_matching_group() {
        let config = Config::default();
        let mut stylus = DftStylus::new();
        stylus.process(&position_window(1, 5000), &config, 20, 15);

        let mut button_window = position_window(2, 5000);
        button_window.window_type = WindowType::Button;
        let before = stylus.sample;
        let sample = stylus.process(&button_window, &config, 20, 15);
        assert_eq!(sample.button, before.button);
        assert_eq!(sample.rubber, before.rubber);
    }

    #[test]
    fn button_classifies_from_dot_product_sign() {
        let config = Config::default();
        let mut stylus = DftStylus::new();
        stylus.process(&position_window(7, 5000), &config, 20, 15);

        let mut button_window = position_window(7, 5000);
        button_window.window_type = WindowType::Button;
        button_window.x[0].real[CENTER] = -3000;
        button_window.y[0].real[CENTER] = -3000;
        button_window.x[0].imag[CENTER] = -1000;
        button_window.y[0].imag[CENTER] = -1000;

        let sample = stylus.process(&button_window, &config, 20, 15);
        assert!(sample.button);
        assert!(!sample.rubber);
    }

    #[test]
    fn binary_mpp2_is_only_consulted_once_per_group() {
        let config = Config::default();
        let mut stylus = DftStylus::new();

        let mut window = DftWindow {
            window_type: WindowType::BinaryMpp2,
            group: Some(1),
            width: 0,
            height: 0,
            x: (0..6).map(|_| row(0, 0, 0, 0)).collect(),
            y: (0..6).map(|_| row(0, 0, 0, 0)).collect(),
        };
        window.x[5].magnitude = 10_000;
        window.y[5].magnitude = 10_000;

        stylus.process(&window, &config, 20, 15);
        assert_eq!(stylus.mppv2_button_or_eraser, Some(false));

        // Same group again, with the opposite signal: ignored.
        window.x[4].magnitude = 10_000;
        window.y[4].magnitude = 10_000;
        window.x[5].magnitude = 0;
        window.y[5].magnitude = 0;
        stylus.process(&window, &config, 20, 15);
        assert_eq!(stylus.mppv2_button_or_eraser, Some(false));
    }

    #[test]
    fn position_mpp2_overrides_pressure_contact() {
        let config = Config::default();
        let mut stylus = DftStylus::new();

        let mut window = DftWindow {
            window_type: WindowType::PositionMpp2,
            group: Some(1),
            width: 0,
            height: 0,
            x: (0..4).map(|_| row(0, 0, 0, 0)).collect(),
            y: (0..4).map(|_| row(0, 0, 0, 0)).collect(),
        };
        window.x[3].magnitude = 10_000;
        window.y[3].magnitude = 10_000;
        stylus.process(&window, &config, 20, 15);
        assert_eq!(stylus.mppv2_in_contact, Some(true));
    }

    #[test]
    fn lift_clears_contact_state() {
        let config = Config::default();
        let mut stylus = DftStylus::new();
        stylus.process(&position_window(1, 5000), &config, 20, 15);

        let mut window = position_window(1, 5000);
        window.x[0].magnitude = 1;
        window.y[0].magnitude = 1;
        let sample = stylus.process(&window, &config, 20, 15);
        assert!(!sample.proximity);
        assert!(!sample.contact);
        assert!(!sample.button);
    }
}
