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

//! Offline transport that replays a captured stream of reports from any
//! [`Read`]er, for running the core against a saved trace without a device.

use std::io::{ErrorKind, Read};

use crate::descriptor::{Descriptor, Metadata, StaticReport};
use crate::error::{Error, Result};

/// A capture is just length-prefixed reports: a 4-byte little-endian length
/// followed by that many bytes of report payload, repeated to EOF.
pub struct ReplayDevice<R: Read> {
    reader: R,
    descriptor: Descriptor<StaticReport>,
    metadata: Option<Metadata>,
}

impl<R: Read> ReplayDevice<R> {
    pub fn new(reader: R, reports: Vec<StaticReport>, metadata: Option<Metadata>) -> Self {
        ReplayDevice {
            reader,
            descriptor: Descriptor::new(reports),
            metadata,
        }
    }
}

impl<R: Read> super::Device for ReplayDevice<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(0),
            Err(e) => return Err(Error::TransportFailure(e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > buf.len() {
            return Err(Error::MalformedFrame(format!(
                "replayed report of {len} bytes does not fit the {}-byte buffer",
                buf.len()
            )));
        }

        self.reader
            .read_exact(&mut buf[..len])
            .map_err(Error::TransportFailure)?;

        Ok(len)
    }

    fn get_feature(&mut self, _report_id: u8, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn set_feature(&mut self, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    fn set_mode(&mut self, _multitouch: bool) -> Result<()> {
        Ok(())
    }

    fn get_metadata(&mut self) -> Result<Option<Metadata>> {
        Ok(self.metadata)
    }

    fn buffer_size(&self) -> usize {
        let size = self.descriptor.buffer_size();
        if size == 0 {
            // No descriptor was supplied; fall back to a buffer large enough
            // for any report this format is known to carry.
            8192
        } else {
            size
        }
    }

    fn raw_descriptor(&self) -> &[StaticReport] {
        self.descriptor.reports()
    }
}
