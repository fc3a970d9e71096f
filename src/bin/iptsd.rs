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

//! The `iptsd` daemon binary: wires a [`Device`] to an [`Application`] and
//! drives the single-threaded, cooperative main loop.
//!
//! Turning contacts and stylus samples into OS input events is out of this
//! crate's scope, so [`EventLog`] below just logs what would otherwise be
//! handed to a `uinput` (or platform-equivalent) virtual device -- swapping
//! it out is the one thing a real deployment needs to add.

#[macro_use]
extern crate log;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;
use flexi_logger::{colored_default_format, Cleanup, Criterion, FileSpec, Logger, Naming};

use iptsd::config::Config;
use iptsd::descriptor::{Descriptor, Metadata};
use iptsd::device::Device;
#[cfg(feature = "hidraw")]
use iptsd::device::HidrawDevice;
use iptsd::device::ReplayDevice;
use iptsd::error::{Error, Result};
use iptsd::orchestrator::{Application, ButtonSink, StylusSink, TouchSink};
use iptsd::rawdesc;
use iptsd::types::{ButtonSample, Contact, StylusSample};
use iptsd::{built_info, RUNNING};

/// After this many transport failures in a row the loop gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Turns raw Intel Precise Touch & Stylus reports into normalized touch and
/// stylus events.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The hidraw device node of the touchscreen (or, with --replay, a captured report stream).
    device: PathBuf,

    /// Treat DEVICE as a captured stream of length-prefixed reports instead of a live hidraw node.
    #[arg(long)]
    replay: bool,

    /// Explicit configuration file. Same effect as $IPTSD_CONFIG_FILE.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity. Repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    Logger::try_with_env_or_str(default_level)
        .unwrap_or_else(|e| panic!("invalid log spec: {e}"))
        .format(colored_default_format)
        .log_to_file(FileSpec::default().directory(std::env::temp_dir()))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Numbers,
            Cleanup::KeepLogFiles(5),
        )
        .duplicate_to_stderr(flexi_logger::Duplicate::All)
        .start()
        .unwrap_or_else(|e| panic!("logger initialization failed: {e}"));
}

/// A stand-in for the real platform input sink: logs every event at debug
/// level instead of emitting it through `uinput` or whatever the host
/// platform's equivalent is.
struct EventLog;

impl TouchSink for EventLog {
    fn touch(&mut self, contacts: &[Contact]) {
        for c in contacts {
            debug!(
                "touch idx={} pos=({:.3},{:.3}) size=({:.3},{:.3}) orientation={:.3} valid={} stable={}",
                c.index, c.mean_x, c.mean_y, c.major, c.minor, c.orientation, c.valid, c.stable
            );
        }
    }
}

impl StylusSink for EventLog {
    fn stylus(&mut self, sample: StylusSample) {
        debug!(
            "stylus prox={} contact={} button={} rubber={} pos=({:.3},{:.3}) pressure={:.3}",
            sample.proximity, sample.contact, sample.button, sample.rubber, sample.x, sample.y, sample.pressure
        );
    }
}

impl ButtonSink for EventLog {
    fn button(&mut self, samples: &[ButtonSample]) {
        for b in samples {
            debug!("button pressed={} pressure={:.3}", b.button, b.pressure);
        }
    }
}

#[cfg(feature = "hidraw")]
fn open_hidraw(path: &Path) -> Result<(HidrawDevice, Option<Metadata>, u16, u16)> {
    // Bootstrap: open once with no descriptor just to pull the raw bytes and
    // device ids off the kernel, then reopen with the real, parsed report
    // list. `Device::raw_descriptor` can't grow after construction.
    let probe = HidrawDevice::open(path, Vec::new())?;
    let raw = probe.read_raw_descriptor()?;
    let (vendor, product) = probe.device_ids()?;
    drop(probe);

    let reports = rawdesc::parse(&raw);
    if reports.is_empty() {
        return Err(Error::UnsupportedDevice(
            "report descriptor carries no reports".into(),
        ));
    }

    let mut device = HidrawDevice::open(path, reports)?;
    device.set_mode(true)?;
    let metadata = device.get_metadata()?;
    Ok((device, metadata, vendor, product))
}

/// Opens the transport named by `args`, returning it boxed (the two
/// backends are different concrete types) alongside whatever device
/// metadata and vendor/product ids it could establish.
fn open_device(args: &Args) -> Result<(Box<dyn Device>, Option<Metadata>, u16, u16)> {
    if args.replay {
        let file = std::fs::File::open(&args.device)?;
        return Ok((Box::new(ReplayDevice::new(file, Vec::new(), None)), None, 0, 0));
    }

    #[cfg(feature = "hidraw")]
    {
        let (device, metadata, vendor, product) = open_hidraw(&args.device)?;
        Ok((Box::new(device), metadata, vendor, product))
    }

    #[cfg(not(feature = "hidraw"))]
    {
        Err(Error::UnsupportedDevice(
            "this build has no hidraw support; pass --replay to read a captured stream".into(),
        ))
    }
}

fn run(args: Args) -> Result<()> {
    let running = RUNNING.clone();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("error installing SIGINT/SIGTERM handler");

    info!(
        "iptsd {}{} starting",
        built_info::PKG_VERSION,
        built_info::GIT_VERSION.map_or_else(String::new, |v| format!(" (git {v})")),
    );

    let (mut device, metadata, vendor, product) = open_device(&args)?;

    if let Some(m) = &metadata {
        info!(
            "device metadata: rows={} columns={} width={}mm height={}mm",
            m.rows, m.columns, m.width_mm, m.height_mm
        );
    }

    let config = Config::load(vendor, product, metadata.as_ref(), args.config.as_deref())?;
    info!("connected to device {vendor:04x}:{product:04x}");

    // Touch-data reports nest inside the HID-frame envelope (§4.C); touchpad
    // button reports are a flat, header-less sequence (§4.H) and are only
    // ever the whole report, so the two paths are distinguished once up
    // front by what the descriptor actually exposes.
    let descriptor = Descriptor::new(device.raw_descriptor().to_vec());
    let is_touchpad = descriptor.find_touch_data_reports().is_empty();

    let mut app = Application::new(config, metadata, EventLog, EventLog, EventLog);

    let buffer_size = device.buffer_size().max(1);
    let mut buf = vec![0u8; buffer_size];
    let mut consecutive_failures: u32 = 0;

    while RUNNING.load(Ordering::SeqCst) {
        let n = match device.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                consecutive_failures += 1;
                warn!("transport error ({consecutive_failures}/{MAX_CONSECUTIVE_FAILURES}): {e}");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    error!("too many consecutive transport failures, aborting");
                    return Err(e);
                }
                sleep(TRANSPORT_RETRY_DELAY);
                continue;
            }
        };
        consecutive_failures = 0;

        if n == 0 {
            if args.replay {
                break; // end of a replayed capture, not a live device blocking
            }
            continue;
        }

        let report = &buf[..n];
        let result = if is_touchpad {
            app.process_button_report(report)
        } else {
            app.process_report(report)
        };

        if let Err(e) = result {
            warn!("discarding malformed report: {e}");
        }
    }

    info!("iptsd stopping");
    Ok(())
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}
