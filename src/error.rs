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

use thiserror::Error;

/// Top level error type for the daemon core.
///
/// `TransportFailure` is recoverable (the main loop retries with backoff);
/// `MalformedFrame` is recovered locally by discarding the current report;
/// `InvalidConfig` and `UnsupportedDevice` are fatal at start-up.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for building a [`Error::MalformedFrame`] from a `truncated frame` condition.
pub fn truncated(what: &str) -> Error {
    Error::MalformedFrame(format!("truncated frame while reading {what}"))
}
