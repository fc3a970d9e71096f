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

//! A per-stylus rejection cone: a moving directional spatial filter used to
//! suppress palm contacts near an active stylus tip.
//!
//! All coordinates passed in and out of this type are physical (mm), not
//! normalized screen coordinates -- callers multiply by screen `(width,
//! height)` before calling in.

use std::time::{Duration, Instant};

const ACTIVE_WINDOW: Duration = Duration::from_millis(300);

pub struct RejectionCone {
    position_update: Option<Instant>,
    direction_update: Option<Instant>,

    x: f64,
    y: f64,
    dx: f64,
    dy: f64,

    cos_angle: f64,
    distance: f64,
}

impl RejectionCone {
    /// `angle_degrees` is the apex half-angle; `distance` is in mm.
    pub fn new(angle_degrees: f64, distance: f64) -> Self {
        RejectionCone {
            position_update: None,
            direction_update: None,
            x: 0.0,
            y: 0.0,
            dx: 0.0,
            dy: 0.0,
            cos_angle: (angle_degrees.to_radians()).cos(),
            distance,
        }
    }

    /// Whether the cone has ever seen a position update.
    pub fn alive(&self) -> bool {
        self.position_update.is_some()
    }

    /// Whether the last position update happened within the active window.
    pub fn active(&self) -> bool {
        match self.position_update {
            Some(t) => t.elapsed() <= ACTIVE_WINDOW,
            None => false,
        }
    }

    pub fn update_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
        self.position_update = Some(Instant::now());
    }

    /// Folds a new observed direction `(x, y)` into the cone's exponentially
    /// decaying running-average direction, then renormalizes it to unit
    /// length.
    pub fn update_direction(&mut self, x: f64, y: f64) {
        let now = Instant::now();

        let weight = match self.direction_update {
            Some(prev) => 2f64.powf(-now.duration_since(prev).as_secs_f64()),
            None => 0.0,
        };

        let dist = (self.x - x).hypot(self.y - y);
        let ux = (x - self.x) / (dist + 1e-6);
        let uy = (y - self.y) / (dist + 1e-6);

        self.dx = weight * self.dx + ux;
        self.dy = weight * self.dy + uy;

        let norm = self.dx.hypot(self.dy) + 1e-6;
        self.dx /= norm;
        self.dy /= norm;

        self.direction_update = Some(now);
    }

    /// Whether `(x, y)` lies within the cone: active, within `distance`, and
    /// within the apex half-angle of the current direction.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.active() {
            return false;
        }

        let dx = x - self.x;
        let dy = y - self.y;
        let dist = dx.hypot(dy);

        if dist > self.distance {
            return false;
        }

        dx * self.dx + dy * self.dy >= self.cos_angle * dist
    }
}
