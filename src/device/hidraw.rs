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

//! Linux `/dev/hidrawN` transport.
//!
//! Talks to the kernel purely through `read(2)`/`write(2)` and the
//! `hidraw` ioctl family; HID report *parsing* stays someone else's job, so
//! this type is handed its [`StaticReport`] list at construction time.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use libc::{O_NONBLOCK, O_RDWR};

use crate::descriptor::{Descriptor, Metadata, Report, StaticReport, Transform2D};
use crate::error::{Error, Result};
use crate::reader::{ByteReader, FromLeBytes};

use super::Device;

const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

#[repr(C)]
struct RawDescriptor {
    size: i32,
    value: [u8; HID_MAX_DESCRIPTOR_SIZE],
}

#[repr(C)]
struct RawDevInfo {
    bustype: u32,
    vendor: i16,
    product: i16,
}

nix::ioctl_read!(hidraw_ioc_grdescsize, b'H', 0x01, i32);
nix::ioctl_read!(hidraw_ioc_grdesc, b'H', 0x02, RawDescriptor);
nix::ioctl_read!(hidraw_ioc_grawinfo, b'H', 0x03, RawDevInfo);
nix::ioctl_readwrite_buf!(hidraw_ioc_gfeature, b'H', 0x07, u8);
nix::ioctl_readwrite_buf!(hidraw_ioc_sfeature, b'H', 0x06, u8);

pub struct HidrawDevice {
    file: File,
    descriptor: Descriptor<StaticReport>,
}

impl HidrawDevice {
    /// Opens `path` (e.g. `/dev/hidraw3`) and pairs it with `reports`, the
    /// caller's already-parsed view of the device's report descriptor.
    pub fn open(path: &Path, reports: Vec<StaticReport>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_RDWR | O_NONBLOCK)
            .open(path)?;

        Ok(HidrawDevice {
            file,
            descriptor: Descriptor::new(reports),
        })
    }

    /// Fetches the raw HID report descriptor bytes straight from the
    /// kernel, for callers that want to hand them to an external parser.
    pub fn read_raw_descriptor(&self) -> Result<Vec<u8>> {
        let fd = self.file.as_raw_fd();

        let mut size: i32 = 0;
        unsafe { hidraw_ioc_grdescsize(fd, &mut size) }
            .map_err(|e| Error::TransportFailure(std::io::Error::from(e)))?;

        let mut raw = RawDescriptor {
            size,
            value: [0u8; HID_MAX_DESCRIPTOR_SIZE],
        };
        unsafe { hidraw_ioc_grdesc(fd, &mut raw) }
            .map_err(|e| Error::TransportFailure(std::io::Error::from(e)))?;

        Ok(raw.value[..raw.size as usize].to_vec())
    }

    /// Reads the `(vendor, product)` USB ids via `HIDIOCGRAWINFO`, used to
    /// select a vendor/product-tagged config preset.
    pub fn device_ids(&self) -> Result<(u16, u16)> {
        let fd = self.file.as_raw_fd();
        let mut info = RawDevInfo { bustype: 0, vendor: 0, product: 0 };
        unsafe { hidraw_ioc_grawinfo(fd, &mut info) }
            .map_err(|e| Error::TransportFailure(std::io::Error::from(e)))?;
        Ok((info.vendor as u16, info.product as u16))
    }
}

impl Device for HidrawDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.file.read(buf)?;
        trace!("read {} bytes from hidraw device", len);
        Ok(len)
    }

    fn get_feature(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::MalformedFrame("get_feature buffer is empty".into()));
        }
        buf[0] = report_id;

        let fd = self.file.as_raw_fd();
        let len = unsafe { hidraw_ioc_gfeature(fd, buf) }
            .map_err(|e| Error::TransportFailure(std::io::Error::from(e)))?;

        Ok(len as usize)
    }

    fn set_feature(&mut self, buf: &[u8]) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mut owned = buf.to_vec();
        unsafe { hidraw_ioc_sfeature(fd, owned.as_mut_slice()) }
            .map_err(|e| Error::TransportFailure(std::io::Error::from(e)))?;
        Ok(())
    }

    fn set_mode(&mut self, multitouch: bool) -> Result<()> {
        let report_id = self
            .descriptor
            .find_modesetting_report()
            .ok_or_else(|| Error::UnsupportedDevice("no mode-setting feature report".into()))?
            .report_id();

        let buf = [report_id, multitouch as u8];
        self.set_feature(&buf)
    }

    fn get_metadata(&mut self) -> Result<Option<Metadata>> {
        let report_id = match self.descriptor.find_metadata_report() {
            Some(r) => r.report_id(),
            None => return Ok(None),
        };

        use crate::protocol::wire::{MetadataSize, MetadataTransform};

        let mut buf = vec![0u8; 1 + MetadataSize::SIZE + MetadataTransform::SIZE];
        let len = self.get_feature(report_id, &mut buf)?;
        if len < buf.len() {
            return Err(Error::MalformedFrame("truncated metadata feature report".into()));
        }

        let mut r = ByteReader::new(&buf[1..]);
        let size = r
            .read::<MetadataSize>()
            .map_err(|_| Error::MalformedFrame("truncated metadata size block".into()))?;
        let transform = r
            .read::<MetadataTransform>()
            .map_err(|_| Error::MalformedFrame("truncated metadata transform block".into()))?;

        Ok(Some(Metadata {
            columns: size.columns as u8,
            rows: size.rows as u8,
            width_mm: size.width,
            height_mm: size.height,
            transform: Transform2D {
                xx: transform.xx,
                yy: transform.yy,
            },
        }))
    }

    fn buffer_size(&self) -> usize {
        self.descriptor.buffer_size()
    }

    fn raw_descriptor(&self) -> &[StaticReport] {
        self.descriptor.reports()
    }
}
