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

//! Wires parser samples to the contact finder, the DFT stylus estimator and
//! the rejection cones, and hands the result to the caller's output sinks.
//!
//! This is the one stateful object the main loop in `src/bin/iptsd.rs`
//! drives: one call to [`Application::process_report`] per `device.read()`.
//! Everything downstream of a [`crate::protocol::Sample`] -- heatmap
//! normalization, blob tracking, cone suppression, DFT estimation -- happens
//! here, in that order.

use std::collections::HashMap;

use crate::cone::RejectionCone;
use crate::config::Config;
use crate::descriptor::Metadata;
use crate::error::Result;
use crate::finder::ContactFinder;
use crate::protocol::dft::DftWindow;
use crate::protocol::frame::{LegacyStylusSample, Sample};
use crate::protocol::{heatmap, Parser};
use crate::stylus::DftStylus;
use crate::types::{ButtonSample, Contact, Heatmap, StylusSample};

/// Receives the touch contacts surviving one frame's axis inversion, cone
/// suppression and stability gate.
///
/// Turning this into OS input events (a `uinput` virtual touchscreen, or
/// whatever the host platform uses) is outside this crate's scope -- it
/// only promises to hand over clean, normalized contacts.
pub trait TouchSink {
    fn touch(&mut self, contacts: &[Contact]);
}

/// Receives one stylus's combined, normalized state.
pub trait StylusSink {
    fn stylus(&mut self, sample: StylusSample);
}

/// Receives touchpad button samples, unmodified.
pub trait ButtonSink {
    fn button(&mut self, samples: &[ButtonSample]);
}

/// Legacy stylus reports carry raw device units, not the normalized
/// coordinates DFT windows already produce.
const LEGACY_X_MAX: f64 = 9600.0;
const LEGACY_Y_MAX: f64 = 7200.0;
const LEGACY_PRESSURE_MAX: f64 = 4096.0;

/// Per-stylus runtime state: its rejection cone and whether it currently
/// counts toward `touch_disable_on_stylus`.
struct StylusRuntime {
    cone: RejectionCone,
    active: bool,
}

impl StylusRuntime {
    fn new(config: &Config) -> Self {
        StylusRuntime {
            cone: RejectionCone::new(config.cone_angle, config.cone_distance),
            active: false,
        }
    }
}

/// Ties the report-parsing state machine to the contact finder, the DFT
/// stylus estimator and a registry of per-stylus rejection cones.
///
/// DFT windows carry no stylus serial (the antenna array only ever tracks
/// one active pen), so the DFT-derived stylus gets a runtime of its own,
/// separate from the registry of legacy (`v1`/`v2`) styli keyed by their
/// on-wire `serial`.
pub struct Application<T: TouchSink, S: StylusSink, B: ButtonSink> {
    config: Config,
    metadata: Option<Metadata>,

    parser: Parser,
    finder: ContactFinder,
    dft_estimator: DftStylus,

    dft_runtime: StylusRuntime,
    legacy_runtimes: HashMap<u32, StylusRuntime>,
    active_styli: usize,

    grid: Vec<f64>,

    touch_sink: T,
    stylus_sink: S,
    button_sink: B,
}

impl<T: TouchSink, S: StylusSink, B: ButtonSink> Application<T, S, B> {
    pub fn new(config: Config, metadata: Option<Metadata>, touch_sink: T, stylus_sink: S, button_sink: B) -> Self {
        let dft_runtime = StylusRuntime::new(&config);
        Application {
            config,
            metadata,
            parser: Parser::new(),
            finder: ContactFinder::new(),
            dft_estimator: DftStylus::new(),
            dft_runtime,
            legacy_runtimes: HashMap::new(),
            active_styli: 0,
            grid: Vec::new(),
            touch_sink,
            stylus_sink,
            button_sink,
        }
    }

    /// Parses one touch-data report and dispatches every sample it yields.
    ///
    /// A [`crate::error::Error::MalformedFrame`] here means the whole report
    /// is discarded; the caller logs it and continues without counting it as
    /// a transport failure.
    pub fn process_report(&mut self, bytes: &[u8]) -> Result<()> {
        let samples = self.parser.parse(bytes)?;
        for sample in samples {
            self.dispatch(sample);
        }
        Ok(())
    }

    /// Parses a touchpad button report and forwards it directly.
    pub fn process_button_report(&mut self, bytes: &[u8]) -> Result<()> {
        let samples = self.parser.parse_button_report(bytes)?;
        self.button_sink.button(&samples);
        Ok(())
    }

    fn dispatch(&mut self, sample: Sample) {
        match sample {
            Sample::Heatmap(hm) => self.handle_heatmap(&hm),
            Sample::Stylus(legacy) => self.handle_legacy_stylus(legacy),
            Sample::Dft(window) => self.handle_dft(window),
            Sample::Metadata(meta) => self.metadata = Some(meta),
        }
    }

    fn handle_heatmap(&mut self, hm: &Heatmap) {
        if self.config.touch_disable {
            return;
        }
        if self.config.touch_disable_on_stylus && self.active_styli > 0 {
            return;
        }

        heatmap::normalize(hm, &mut self.grid);
        let mut contacts = self.finder.process(&self.grid, hm.rows, hm.cols, &self.config);

        for c in contacts.iter_mut() {
            if self.config.invert_x {
                c.mean_x = 1.0 - c.mean_x;
            }
            if self.config.invert_y {
                c.mean_y = 1.0 - c.mean_y;
            }
        }

        // Invalid (palm-shaped) contacts that aren't already swallowed by a
        // cone train that cone's direction: the anatomical fact that a palm
        // usually trails the stylus tip.
        for c in &contacts {
            if !c.valid && !self.in_any_cone(c) {
                self.train_cones(c);
            }
        }

        if self.config.touch_disable_on_palm && contacts.iter().any(|c| !c.valid) {
            return;
        }

        let surviving: Vec<Contact> = contacts
            .iter()
            .filter(|c| !(self.config.touch_check_stability && !c.stable))
            .filter(|c| c.valid)
            .filter(|c| !(self.config.touch_check_cone && self.in_any_cone(c)))
            .copied()
            .collect();

        self.touch_sink.touch(&surviving);
    }

    fn handle_legacy_stylus(&mut self, legacy: LegacyStylusSample) {
        if self.config.stylus_disable {
            return;
        }

        let mut x = (legacy.x as f64 / LEGACY_X_MAX).clamp(0.0, 1.0);
        let mut y = (legacy.y as f64 / LEGACY_Y_MAX).clamp(0.0, 1.0);
        if self.config.invert_x {
            x = 1.0 - x;
        }
        if self.config.invert_y {
            y = 1.0 - y;
        }

        let pressure = if legacy.proximity {
            (legacy.pressure as f64 / LEGACY_PRESSURE_MAX).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // The legacy protocol's altitude/azimuth fields are hundredths of a
        // degree; this is a unit conversion to radians, not a coordinate
        // transform.
        let (altitude, azimuth) = if legacy.proximity {
            let pi = std::f64::consts::PI;
            let altitude = (legacy.altitude as f64 / 18000.0) * pi;
            let azimuth = ((legacy.azimuth as f64 / 18000.0) * pi).rem_euclid(2.0 * pi);
            (altitude, azimuth)
        } else {
            (0.0, 0.0)
        };

        let sample = StylusSample {
            proximity: legacy.proximity,
            contact: legacy.proximity && legacy.contact,
            button: legacy.proximity && legacy.button,
            rubber: legacy.proximity && legacy.rubber,
            x,
            y,
            pressure,
            altitude,
            azimuth,
            timestamp: legacy.timestamp as u32,
        };

        self.publish_stylus(false, legacy.serial, sample);
    }

    fn handle_dft(&mut self, window: DftWindow) {
        if self.config.stylus_disable {
            return;
        }

        let (columns, rows) = match &self.metadata {
            Some(m) => (m.columns, m.rows),
            None => (0, 0),
        };

        let sample = self.dft_estimator.process(&window, &self.config, columns, rows);
        self.publish_stylus(true, 0, sample);
    }

    /// Updates the active-stylus count and the relevant cone's anchor, then
    /// hands the sample to the sink.
    fn publish_stylus(&mut self, is_dft: bool, serial: u32, sample: StylusSample) {
        let width = self.config.width;
        let height = self.config.height;

        let became_active;
        let became_inactive;
        {
            let runtime = self.stylus_runtime_mut(is_dft, serial);
            became_active = sample.proximity && !runtime.active;
            became_inactive = !sample.proximity && runtime.active;
            runtime.active = sample.proximity;

            if sample.proximity {
                runtime.cone.update_position(sample.x * width * 1e3, sample.y * height * 1e3);
            }
        }

        if became_active {
            self.active_styli += 1;
        }
        if became_inactive {
            self.active_styli = self.active_styli.saturating_sub(1);
        }

        self.stylus_sink.stylus(sample);
    }

    fn stylus_runtime_mut(&mut self, is_dft: bool, serial: u32) -> &mut StylusRuntime {
        if is_dft {
            &mut self.dft_runtime
        } else {
            let config = &self.config;
            self.legacy_runtimes
                .entry(serial)
                .or_insert_with(|| StylusRuntime::new(config))
        }
    }

    fn physical(&self, c: &Contact) -> (f64, f64) {
        (c.mean_x * self.config.width * 1e3, c.mean_y * self.config.height * 1e3)
    }

    fn in_any_cone(&self, c: &Contact) -> bool {
        let (x, y) = self.physical(c);
        self.dft_runtime.cone.contains(x, y) || self.legacy_runtimes.values().any(|r| r.cone.contains(x, y))
    }

    fn train_cones(&mut self, c: &Contact) {
        let (x, y) = self.physical(c);
        if self.dft_runtime.cone.alive() && self.dft_runtime.cone.active() {
            self.dft_runtime.cone.update_direction(x, y);
        }
        for r in self.legacy_runtimes.values_mut() {
            if r.cone.alive() && r.cone.active() {
                r.cone.update_direction(x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeutralAlgorithm;

    #[derive(Default)]
    struct RecordingSinks {
        touches: Vec<Vec<Contact>>,
        styli: Vec<StylusSample>,
        buttons: Vec<Vec<ButtonSample>>,
    }

    impl TouchSink for std::rc::Rc<std::cell::RefCell<RecordingSinks>> {
        fn touch(&mut self, contacts: &[Contact]) {
            self.borrow_mut().touches.push(contacts.to_vec());
        }
    }
    impl StylusSink for std::rc::Rc<std::cell::RefCell<RecordingSinks>> {
        fn stylus(&mut self, sample: StylusSample) {
            self.borrow_mut().styli.push(sample);
        }
    }
    impl ButtonSink for std::rc::Rc<std::cell::RefCell<RecordingSinks>> {
        fn button(&mut self, samples: &[ButtonSample]) {
            self.borrow_mut().buttons.push(samples.to_vec());
        }
    }

    fn test_config() -> Config {
        let mut config = Config {
            width: 0.29,
            height: 0.18,
            ..Config::default()
        };
        config.contacts_neutral = NeutralAlgorithm::Mode;
        config.contacts_temporal_window = 1;
        config
    }

    fn app(
        config: Config,
    ) -> (
        Application<
            std::rc::Rc<std::cell::RefCell<RecordingSinks>>,
            std::rc::Rc<std::cell::RefCell<RecordingSinks>>,
            std::rc::Rc<std::cell::RefCell<RecordingSinks>>,
        >,
        std::rc::Rc<std::cell::RefCell<RecordingSinks>>,
    ) {
        let sinks = std::rc::Rc::new(std::cell::RefCell::new(RecordingSinks::default()));
        let app = Application::new(config, None, sinks.clone(), sinks.clone(), sinks.clone());
        (app, sinks)
    }

    fn heatmap_sample(v: u8, row: usize, col: usize, rows: usize, cols: usize) -> Heatmap {
        let mut data = vec![0u8; rows * cols];
        data[row * cols + col] = v;
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
    fn touch_disable_suppresses_heatmap_pipeline() {
        let mut config = test_config();
        config.touch_disable = true;
        let (mut app, sinks) = app(config);
        app.handle_heatmap(&heatmap_sample(255, 5, 5, 10, 10));
        assert!(sinks.borrow().touches.is_empty());
    }

    #[test]
    fn stable_single_peak_contact_is_forwarded() {
        let (mut app, sinks) = app(test_config());
        app.handle_heatmap(&heatmap_sample(255, 5, 5, 10, 10));
        let touches = &sinks.borrow().touches;
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].len(), 1);
        assert_eq!(touches[0][0].index, 0);
    }

    #[test]
    fn cone_suppresses_contact_inside_it() {
        let (mut app, sinks) = app(test_config());

        // Physical (50mm, 50mm) stylus, cone pointed toward (55mm, 55mm).
        let stylus = StylusSample {
            proximity: true,
            x: 50.0 / (app.config.width * 1e3),
            y: 50.0 / (app.config.height * 1e3),
            ..StylusSample::default()
        };
        app.publish_stylus(true, 0, stylus);
        app.dft_runtime.cone.update_direction(55.0, 55.0);

        // A blob whose physical centre lands at (53mm, 53mm).
        let cols = 100;
        let rows = 100;
        let col = ((53.0 / (app.config.width * 1e3)) * (cols as f64 - 1.0)).round() as usize;
        let row = ((53.0 / (app.config.height * 1e3)) * (rows as f64 - 1.0)).round() as usize;
        app.handle_heatmap(&heatmap_sample(255, row, col, rows, cols));

        let touches = &sinks.borrow().touches;
        assert_eq!(touches.last().unwrap().len(), 0);
    }

    #[test]
    fn legacy_stylus_lift_clears_contact_fields() {
        let (mut app, sinks) = app(test_config());
        let sample = LegacyStylusSample {
            serial: 1,
            proximity: false,
            contact: true, // should be cleared because proximity is false
            button: true,
            rubber: true,
            x: 100,
            y: 100,
            pressure: 100,
            timestamp: 0,
        };
        app.handle_legacy_stylus(sample);
        let styli = &sinks.borrow().styli;
        assert_eq!(styli.len(), 1);
        assert!(!styli[0].proximity);
        assert!(!styli[0].contact);
        assert!(!styli[0].button);
        assert!(!styli[0].rubber);
        assert_eq!(styli[0].pressure, 0.0);
    }

    #[test]
    fn touch_disable_on_stylus_gates_heatmap_while_a_stylus_is_proximate() {
        let mut config = test_config();
        config.touch_disable_on_stylus = true;
        let (mut app, sinks) = app(config);

        app.publish_stylus(
            true,
            0,
            StylusSample {
                proximity: true,
                ..StylusSample::default()
            },
        );
        app.handle_heatmap(&heatmap_sample(255, 5, 5, 10, 10));
        assert!(sinks.borrow().touches.is_empty());

        app.publish_stylus(true, 0, StylusSample::default()); // lift
        app.handle_heatmap(&heatmap_sample(255, 5, 5, 10, 10));
        assert_eq!(sinks.borrow().touches.len(), 1);
    }

    #[test]
    fn disable_on_palm_gates_the_whole_frame() {
        let mut config = test_config();
        config.touch_disable_on_palm = true;
        config.contacts_size_max = 0.0001; // every contact is invalid
        let (mut app, sinks) = app(config);
        app.handle_heatmap(&heatmap_sample(255, 5, 5, 10, 10));
        assert!(sinks.borrow().touches.is_empty());
    }
}
