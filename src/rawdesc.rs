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

//! A minimal walker over the raw HID report descriptor byte stream.
//!
//! This exists only so `src/bin/iptsd.rs` can turn the bytes a `hidraw` node
//! hands back into the `Vec<StaticReport>` the core expects -- a real HID
//! descriptor parser is a general-purpose library in its own right and is
//! explicitly out of this crate's scope. This walker decodes
//! just enough of the short-item encoding (global/local/main items, usage
//! pages, report id/size/count) to classify reports the way IPTS needs.

use std::collections::BTreeMap;

use crate::descriptor::{ReportType, StaticReport};

const TYPE_MAIN: u8 = 0;
const TYPE_GLOBAL: u8 = 1;
const TYPE_LOCAL: u8 = 2;

const GLOBAL_USAGE_PAGE: u8 = 0x0;
const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xA;
const GLOBAL_POP: u8 = 0xB;

const LOCAL_USAGE: u8 = 0x0;

const MAIN_INPUT: u8 = 0x8;
const MAIN_OUTPUT: u8 = 0x9;
const MAIN_FEATURE: u8 = 0xB;

struct Item<'a> {
    tag: u8,
    kind: u8,
    data: &'a [u8],
}

/// Splits the descriptor into short items. Long items (`0xFE`) don't occur
/// in real HID report descriptors and are skipped defensively.
fn items(bytes: &[u8]) -> Vec<Item<'_>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let head = bytes[i];
        if head == 0xFE {
            if i + 1 >= bytes.len() {
                break;
            }
            let len = bytes[i + 1] as usize;
            i += 3 + len;
            continue;
        }

        let size = match head & 0b11 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let kind = (head >> 2) & 0b11;
        let tag = (head >> 4) & 0b1111;

        i += 1;
        if i + size > bytes.len() {
            break;
        }
        out.push(Item { tag, kind, data: &bytes[i..i + size] });
        i += size;
    }
    out
}

fn item_value(item: &Item) -> u32 {
    let mut v = 0u32;
    for (shift, &b) in item.data.iter().enumerate() {
        v |= (b as u32) << (8 * shift);
    }
    v
}

fn main_tag_to_report_type(tag: u8) -> Option<ReportType> {
    match tag {
        MAIN_INPUT => Some(ReportType::Input),
        MAIN_OUTPUT => Some(ReportType::Output),
        MAIN_FEATURE => Some(ReportType::Feature),
        _ => None,
    }
}

#[derive(Default, Clone, Copy)]
struct GlobalState {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
}

/// Parses a raw HID report descriptor into the reports IPTS cares about.
///
/// Each `(report_type, report_id)` pair accumulates bit width across every
/// main item that commits it, and collects every usage seen on the current
/// `Usage Page` since the last local-state reset (an `Input`/`Output`/
/// `Feature` item always clears local state per the HID spec).
pub fn parse(bytes: &[u8]) -> Vec<StaticReport> {
    let mut state = GlobalState::default();
    let mut stack: Vec<GlobalState> = Vec::new();
    let mut report_id: u8 = 0;
    let mut local_usages: Vec<u16> = Vec::new();

    // Keyed by (type, report_id): accumulated size in bits and usages seen.
    let mut acc: BTreeMap<(ReportType, u8), (u32, Vec<(u16, u16)>)> = BTreeMap::new();

    for item in items(bytes) {
        match item.kind {
            TYPE_GLOBAL => match item.tag {
                GLOBAL_USAGE_PAGE => state.usage_page = item_value(&item) as u16,
                GLOBAL_REPORT_SIZE => state.report_size = item_value(&item),
                GLOBAL_REPORT_COUNT => state.report_count = item_value(&item),
                GLOBAL_REPORT_ID => report_id = item_value(&item) as u8,
                GLOBAL_PUSH => stack.push(state),
                GLOBAL_POP => {
                    if let Some(s) = stack.pop() {
                        state = s;
                    }
                }
                _ => {}
            },
            TYPE_LOCAL => {
                if item.tag == LOCAL_USAGE {
                    local_usages.push(item_value(&item) as u16);
                }
            }
            TYPE_MAIN => {
                if let Some(report_type) = main_tag_to_report_type(item.tag) {
                    if report_id != 0 {
                        let entry = acc.entry((report_type, report_id)).or_insert((0, Vec::new()));
                        entry.0 += state.report_size * state.report_count;
                        for &usage in &local_usages {
                            let pair = (state.usage_page, usage);
                            if !entry.1.contains(&pair) {
                                entry.1.push(pair);
                            }
                        }
                    }
                }
                local_usages.clear();
            }
            _ => {}
        }
    }

    acc.into_iter()
        .map(|((report_type, report_id), (bits, usages))| StaticReport {
            report_type,
            report_id,
            size_bytes: ((bits + 7) / 8) as usize,
            usages,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, USAGE_PAGE_DIGITIZER, USAGE_SCAN_TIME, USAGE_GESTURE_DATA};

    /// A short item: 1-byte header, `data` verbatim (1/2/4 bytes only).
    fn short(kind: u8, tag: u8, data: &[u8]) -> Vec<u8> {
        let size_code = match data.len() {
            0 => 0,
            1 => 1,
            2 => 2,
            4 => 3,
            n => panic!("unsupported short-item payload length {n}"),
        };
        let head = (tag << 4) | (kind << 2) | size_code;
        let mut out = vec![head];
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn extracts_a_single_input_report_with_usages() {
        let mut bytes = Vec::new();
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_USAGE_PAGE, &[0x0D, 0x00])); // digitizer
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_ID, &[0x01]));
        bytes.extend(short(TYPE_LOCAL, LOCAL_USAGE, &[USAGE_SCAN_TIME as u8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_SIZE, &[8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_COUNT, &[2]));
        bytes.extend(short(TYPE_MAIN, MAIN_INPUT, &[0x02]));
        bytes.extend(short(TYPE_LOCAL, LOCAL_USAGE, &[USAGE_GESTURE_DATA as u8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_SIZE, &[8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_COUNT, &[61]));
        bytes.extend(short(TYPE_MAIN, MAIN_INPUT, &[0x02]));

        let reports = parse(&bytes);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_type, ReportType::Input);
        assert_eq!(reports[0].report_id, 1);
        assert_eq!(reports[0].size_bytes, 1 + 2 + 61);

        let desc = Descriptor::new(reports);
        assert!(desc.find_touch_data_reports().iter().any(|r| {
            r.has_usage(USAGE_PAGE_DIGITIZER, USAGE_SCAN_TIME)
                && r.has_usage(USAGE_PAGE_DIGITIZER, USAGE_GESTURE_DATA)
        }));
    }

    #[test]
    fn report_without_an_id_is_ignored() {
        let mut bytes = Vec::new();
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_SIZE, &[8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_COUNT, &[1]));
        bytes.extend(short(TYPE_MAIN, MAIN_INPUT, &[0x02]));
        assert!(parse(&bytes).is_empty());
    }

    #[test]
    fn push_pop_restores_prior_global_state() {
        let mut bytes = Vec::new();
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_ID, &[3]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_SIZE, &[8]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_PUSH, &[]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_SIZE, &[32]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_POP, &[]));
        bytes.extend(short(TYPE_GLOBAL, GLOBAL_REPORT_COUNT, &[1]));
        bytes.extend(short(TYPE_MAIN, MAIN_FEATURE, &[0x02]));

        let reports = parse(&bytes);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].size_bytes, 1); // report_size restored to 8 bits
    }
}
