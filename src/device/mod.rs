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

//! Transport backends the main loop reads reports from.
//!
//! Parsing the raw HID report descriptor into [`crate::descriptor::StaticReport`]s
//! is somebody else's job -- every backend here is handed an already-parsed
//! list at construction time and just answers `raw_descriptor()` with it.

#[cfg(feature = "hidraw")]
pub mod hidraw;
pub mod replay;

#[cfg(feature = "hidraw")]
pub use hidraw::HidrawDevice;
pub use replay::ReplayDevice;

use crate::descriptor::{Metadata, StaticReport};
use crate::error::Result;

/// A source of IPTS reports, plus the handful of control-request verbs the
/// daemon needs around the main read loop.
pub trait Device {
    /// Blocking read of one input report into `buf`. Returns the number of
    /// bytes written.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Issues a `GET_REPORT(Feature)` control request for `report_id`,
    /// writing the response (including its leading report-id byte) into
    /// `buf`. Returns the number of bytes written.
    fn get_feature(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize>;

    /// Issues a `SET_REPORT(Feature)` control request. `buf`'s first byte is
    /// the report id.
    fn set_feature(&mut self, buf: &[u8]) -> Result<()>;

    /// Switches the device between single-touch and multitouch/raw-data
    /// mode via the mode-setting feature report.
    fn set_mode(&mut self, multitouch: bool) -> Result<()>;

    /// Reads and decodes the metadata feature report, if the device
    /// exposes one.
    fn get_metadata(&mut self) -> Result<Option<Metadata>>;

    /// Size of the largest input report, used to size the read buffer.
    fn buffer_size(&self) -> usize;

    /// The pre-parsed report descriptor this device was constructed with.
    fn raw_descriptor(&self) -> &[StaticReport];
}
