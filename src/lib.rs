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

//! iptsd -- a user-space daemon that turns raw Intel Precise Touch & Stylus
//! reports into normalized touch and stylus events.
//!
//! The core is single-threaded and cooperative: one `Device::read` per loop
//! iteration feeds the [`protocol::Parser`], whose samples are dispatched to
//! [`finder::ContactFinder`], [`stylus::DftStylus`] and [`cone::RejectionCone`]
//! by the [`orchestrator::Application`].

#[macro_use]
extern crate log;

#[macro_use]
extern crate lazy_static;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod cone;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod finder;
pub mod orchestrator;
pub mod protocol;
pub mod rawdesc;
pub mod reader;
pub mod stylus;
pub mod types;

lazy_static! {
    /// Flipped to `false` by the `SIGINT`/`SIGTERM` handler installed in
    /// `src/bin/iptsd.rs`; the main loop checks it once per iteration and
    /// exits cleanly after the in-flight report finishes.
    pub static ref RUNNING: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
}

/// Build-time information (version, git hash, rustc version, ...) generated
/// by `build.rs` via the `built` crate.
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
