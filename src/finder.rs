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

//! Blob detection and frame-to-frame tracking over a normalized heatmap.
//!
//! [`detect`] turns one normalized frame into a set of candidate blobs.
//! [`ContactFinder`] wraps it with persistent tracking, assigning each blob a
//! stable `Contact.index` across frames and classifying validity/stability.

use std::collections::VecDeque;

use crate::config::{Config, NeutralAlgorithm};
use crate::types::Contact;

/// Emitted at most this many contacts per frame, preferring the highest
/// weighted peaks when more candidates are found.
pub const MAX_CONTACTS: usize = 16;

/// A single cell's own blob, in raw grid-cell coordinates, before tracking.
#[derive(Debug, Clone, Copy)]
struct Blob {
    mean_x: f64,
    mean_y: f64,
    major: f64,
    minor: f64,
    orientation: f64,
    weight: f64,
}

/// A grid position below which a blob's gaussian fit degenerates to a single
/// cell. Single-cell peaks are floored to a half-cell radius so `major` and
/// `minor` never collapse to exactly zero.
const MIN_AXIS_CELLS: f64 = 0.5;

fn neutral_baseline(grid: &[f64], algorithm: NeutralAlgorithm, bins: usize) -> f64 {
    match algorithm {
        NeutralAlgorithm::Average => {
            if grid.is_empty() {
                0.0
            } else {
                grid.iter().sum::<f64>() / grid.len() as f64
            }
        }
        NeutralAlgorithm::Mode => {
            let bins = bins.max(1);
            let mut counts = vec![0usize; bins];
            for &v in grid {
                let bin = ((v * bins as f64) as usize).min(bins - 1);
                counts[bin] += 1;
            }
            let (best, _) = counts
                .iter()
                .enumerate()
                .max_by_key(|&(_, c)| *c)
                .unwrap_or((0, &0));
            (best as f64 + 0.5) / bins as f64
        }
        NeutralAlgorithm::Constant => 0.0,
    }
}

/// Runs neutral estimation, thresholded-maxima peak detection, 4-connected
/// downhill component growth and gaussian fitting over `grid` (row-major,
/// `rows` x `cols`), returning screen-relative blobs sorted by descending
/// confidence.
fn detect(grid: &[f64], rows: usize, cols: usize, config: &Config) -> Vec<Blob> {
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let neutral = neutral_baseline(grid, config.contacts_neutral, config.contacts_neutral_value_backoff)
        + config.contacts_neutral_value / 255.0;
    let activation = config.contacts_activation_threshold / 255.0;
    let deactivation = config.contacts_deactivation_threshold / 255.0;

    let idx = |r: usize, c: usize| r * cols + c;

    // Candidate peaks: local maxima over the 8-neighbourhood, ties broken in
    // favour of the lexicographically smaller (row, col).
    let mut peaks: Vec<(usize, usize, f64)> = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let v = grid[idx(r, c)];
            if v < neutral + activation {
                continue;
            }

            let mut is_peak = true;
            'neighbours: for dr in -1i32..=1 {
                for dc in -1i32..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let nr = r as i32 + dr;
                    let nc = c as i32 + dc;
                    if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    let nv = grid[idx(nr, nc)];
                    if nv > v || (nv == v && (nr, nc) < (r, c)) {
                        is_peak = false;
                        break 'neighbours;
                    }
                }
            }

            if is_peak {
                peaks.push((r, c, v));
            }
        }
    }

    // Highest peaks get first pick of territory; a peak already engulfed by
    // a stronger neighbour's flood is discarded outright.
    peaks.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then((a.0, a.1).cmp(&(b.0, b.1))));

    let mut owner: Vec<Option<usize>> = vec![None; rows * cols];
    let mut accepted: Vec<(usize, usize)> = Vec::new();

    for &(r, c, _) in &peaks {
        if owner[idx(r, c)].is_some() {
            continue;
        }

        let blob_id = accepted.len();
        owner[idx(r, c)] = Some(blob_id);
        accepted.push((r, c));

        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        queue.push_back((r, c));

        while let Some((cr, cc)) = queue.pop_front() {
            let cv = grid[idx(cr, cc)];
            let neighbours = [
                (cr.wrapping_sub(1), cc),
                (cr + 1, cc),
                (cr, cc.wrapping_sub(1)),
                (cr, cc + 1),
            ];
            for (nr, nc) in neighbours {
                if nr >= rows || nc >= cols {
                    continue;
                }
                if owner[idx(nr, nc)].is_some() {
                    continue;
                }
                let nv = grid[idx(nr, nc)];
                if nv < neutral + deactivation || nv > cv {
                    continue;
                }
                owner[idx(nr, nc)] = Some(blob_id);
                queue.push_back((nr, nc));
            }
        }
    }

    // Gaussian fit per accepted component.
    let mut sums = vec![(0.0f64, 0.0f64, 0.0f64, 0.0f64); accepted.len()]; // w, wx, wy, (unused)
    let mut weight_sum = vec![0.0f64; accepted.len()];
    for r in 0..rows {
        for c in 0..cols {
            if let Some(id) = owner[idx(r, c)] {
                let w = (grid[idx(r, c)] - neutral).max(0.0);
                weight_sum[id] += w;
                sums[id].1 += w * c as f64;
                sums[id].2 += w * r as f64;
            }
        }
    }

    let mut means = vec![(0.0f64, 0.0f64); accepted.len()];
    for id in 0..accepted.len() {
        if weight_sum[id] > 0.0 {
            means[id] = (sums[id].1 / weight_sum[id], sums[id].2 / weight_sum[id]);
        } else {
            let (r, c) = accepted[id];
            means[id] = (c as f64, r as f64);
        }
    }

    let mut cov = vec![(0.0f64, 0.0f64, 0.0f64); accepted.len()]; // xx, yy, xy
    for r in 0..rows {
        for c in 0..cols {
            if let Some(id) = owner[idx(r, c)] {
                let w = (grid[idx(r, c)] - neutral).max(0.0);
                let (mx, my) = means[id];
                let dx = c as f64 - mx;
                let dy = r as f64 - my;
                cov[id].0 += w * dx * dx;
                cov[id].1 += w * dy * dy;
                cov[id].2 += w * dx * dy;
            }
        }
    }

    let diagonal = config.diagonal().max(f64::EPSILON);
    let mut blobs = Vec::with_capacity(accepted.len());

    for id in 0..accepted.len() {
        let w = weight_sum[id];
        let (cxx, cyy, cxy) = if w > 0.0 {
            (cov[id].0 / w, cov[id].1 / w, cov[id].2 / w)
        } else {
            (0.0, 0.0, 0.0)
        };

        let trace = cxx + cyy;
        let det = cxx * cyy - cxy * cxy;
        let disc = ((trace / 2.0).powi(2) - det).max(0.0).sqrt();
        let lambda_major = (trace / 2.0 + disc).max(0.0);
        let lambda_minor = (trace / 2.0 - disc).max(0.0);

        let (vx, vy) = if cxy.abs() > f64::EPSILON {
            (lambda_major - cyy, cxy)
        } else if cxx >= cyy {
            (1.0, 0.0)
        } else {
            (0.0, 1.0)
        };

        let mut angle = vy.atan2(vx);
        angle = angle.rem_euclid(std::f64::consts::PI);
        let orientation = angle / std::f64::consts::PI;

        let major_cells = lambda_major.sqrt().max(MIN_AXIS_CELLS);
        let minor_cells = lambda_minor.sqrt().max(MIN_AXIS_CELLS).min(major_cells);

        let (mx, my) = means[id];

        blobs.push(Blob {
            mean_x: mx / (cols - 1).max(1) as f64,
            mean_y: my / (rows - 1).max(1) as f64,
            major: major_cells / diagonal,
            minor: minor_cells / diagonal,
            orientation,
            weight: w,
        });
    }

    blobs.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap());
    blobs.truncate(MAX_CONTACTS);
    blobs
}

struct Track {
    index: usize,
    last_x: f64,
    last_y: f64,
    history: VecDeque<(f64, f64, f64)>, // (major, mean_x, mean_y)
}

/// Frame-to-frame persistent contact tracker, keyed by greedy
/// nearest-neighbour assignment on blob centroids.
pub struct ContactFinder {
    tracks: Vec<Track>,
}

impl Default for ContactFinder {
    fn default() -> Self {
        ContactFinder::new()
    }
}

impl ContactFinder {
    pub fn new() -> Self {
        ContactFinder { tracks: Vec::new() }
    }

    /// Detects blobs in `grid` and updates tracking state, returning the
    /// contacts for this frame.
    pub fn process(&mut self, grid: &[f64], rows: usize, cols: usize, config: &Config) -> Vec<Contact> {
        let blobs = detect(grid, rows, cols, config);
        let distance_threshold = config.contacts_distance_thresh / config.diagonal().max(f64::EPSILON);

        let mut track_used = vec![false; self.tracks.len()];
        let mut blob_used = vec![false; blobs.len()];
        let mut assignment: Vec<Option<usize>> = vec![None; blobs.len()]; // blob -> track

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for (ti, track) in self.tracks.iter().enumerate() {
                if track_used[ti] {
                    continue;
                }
                for (bi, blob) in blobs.iter().enumerate() {
                    if blob_used[bi] {
                        continue;
                    }
                    let d = (track.last_x - blob.mean_x).hypot(track.last_y - blob.mean_y);
                    if d > distance_threshold {
                        continue;
                    }
                    if best.map(|(_, _, bd)| d < bd).unwrap_or(true) {
                        best = Some((ti, bi, d));
                    }
                }
            }

            match best {
                Some((ti, bi, _)) => {
                    track_used[ti] = true;
                    blob_used[bi] = true;
                    assignment[bi] = Some(ti);
                }
                None => break,
            }
        }

        // Retire unmatched tracks immediately: no grace period.
        let mut kept_tracks: Vec<Track> = Vec::new();
        let mut old_index_for: Vec<Option<usize>> = vec![None; self.tracks.len()];
        for (ti, track) in self.tracks.drain(..).enumerate() {
            if track_used[ti] {
                old_index_for[ti] = Some(kept_tracks.len());
                kept_tracks.push(track);
            }
        }

        let mut used_indices: Vec<usize> = kept_tracks.iter().map(|t| t.index).collect();

        let mut contacts = Vec::with_capacity(blobs.len());
        for (bi, blob) in blobs.iter().enumerate() {
            let track_idx = match assignment[bi] {
                Some(old_ti) => old_index_for[old_ti].unwrap(),
                None => {
                    let mut fresh = 0usize;
                    while used_indices.contains(&fresh) {
                        fresh += 1;
                    }
                    used_indices.push(fresh);
                    kept_tracks.push(Track {
                        index: fresh,
                        last_x: blob.mean_x,
                        last_y: blob.mean_y,
                        history: VecDeque::new(),
                    });
                    kept_tracks.len() - 1
                }
            };

            let track = &mut kept_tracks[track_idx];
            track.last_x = blob.mean_x;
            track.last_y = blob.mean_y;
            track.history.push_back((blob.major, blob.mean_x, blob.mean_y));
            while track.history.len() > config.contacts_temporal_window {
                track.history.pop_front();
            }

            let valid = blob.major >= config.contacts_size_min / config.diagonal().max(f64::EPSILON)
                && blob.major <= config.contacts_size_max / config.diagonal().max(f64::EPSILON)
                && blob.minor > 0.0
                && (blob.major / blob.minor) >= config.contacts_aspect_min
                && (blob.major / blob.minor) <= config.contacts_aspect_max;

            let stable = track.history.len() >= config.contacts_temporal_window
                && config.contacts_temporal_window > 0
                && {
                    let majors: Vec<f64> = track.history.iter().map(|(m, _, _)| *m).collect();
                    let range = majors.iter().cloned().fold(f64::MIN, f64::max)
                        - majors.iter().cloned().fold(f64::MAX, f64::min);
                    let size_thresh = config.contacts_size_thresh / config.diagonal().max(f64::EPSILON);

                    let mut path = 0.0;
                    let positions: Vec<(f64, f64)> = track.history.iter().map(|(_, x, y)| (*x, *y)).collect();
                    for w in positions.windows(2) {
                        path += (w[0].0 - w[1].0).hypot(w[0].1 - w[1].1);
                    }
                    let min_move = config.contacts_position_thresh_min / config.diagonal().max(f64::EPSILON);
                    let max_move = config.contacts_position_thresh_max / config.diagonal().max(f64::EPSILON);

                    range <= size_thresh && path >= min_move && path <= max_move
                };

            contacts.push(Contact {
                index: track.index,
                mean_x: blob.mean_x,
                mean_y: blob.mean_y,
                major: blob.major,
                minor: blob.minor,
                orientation: blob.orientation,
                valid,
                stable,
            });
        }

        self.tracks = kept_tracks;
        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn single_peak(rows: usize, cols: usize, r: usize, c: usize) -> Vec<f64> {
        let mut grid = vec![0.0; rows * cols];
        grid[r * cols + c] = 1.0;
        grid
    }

    fn test_config() -> Config {
        let mut config = Config {
            width: 0.29,
            height: 0.18,
            ..Default::default()
        };
        config.contacts_neutral = NeutralAlgorithm::Mode;
        config
    }

    #[test]
    fn single_isolated_peak_is_found_near_its_grid_position() {
        let config = test_config();
        let grid = single_peak(10, 10, 5, 5);
        let blobs = detect(&grid, 10, 10, &config);
        assert_eq!(blobs.len(), 1);
        assert!((blobs[0].mean_x - 5.0 / 9.0).abs() < 1e-6);
        assert!((blobs[0].mean_y - 5.0 / 9.0).abs() < 1e-6);
        assert!(blobs[0].major >= blobs[0].minor);
        assert!(blobs[0].minor > 0.0);
    }

    #[test]
    fn two_far_apart_peaks_become_two_blobs() {
        let config = test_config();
        let mut grid = vec![0.0; 10 * 10];
        grid[2 * 10 + 2] = 1.0;
        grid[7 * 10 + 7] = 1.0;
        let blobs = detect(&grid, 10, 10, &config);
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn tracker_assigns_stable_lowest_free_indices() {
        let mut finder = ContactFinder::new();
        let config = test_config();
        let grid = single_peak(10, 10, 5, 5);

        let c1 = finder.process(&grid, 10, 10, &config);
        assert_eq!(c1.len(), 1);
        assert_eq!(c1[0].index, 0);
        assert!(!c1[0].stable);

        let c2 = finder.process(&grid, 10, 10, &config);
        assert_eq!(c2[0].index, 0);
    }

    #[test]
    fn lifted_contact_frees_its_index_for_reuse() {
        let mut finder = ContactFinder::new();
        let config = test_config();
        let grid = single_peak(10, 10, 5, 5);
        finder.process(&grid, 10, 10, &config);

        let empty = vec![0.0; 10 * 10];
        let c2 = finder.process(&empty, 10, 10, &config);
        assert!(c2.is_empty());

        let c3 = finder.process(&grid, 10, 10, &config);
        assert_eq!(c3[0].index, 0);
    }

    #[test]
    fn invalid_contact_is_still_emitted() {
        let mut config = test_config();
        config.contacts_size_max = 0.0001; // force every contact invalid
        let mut finder = ContactFinder::new();
        let grid = single_peak(10, 10, 5, 5);
        let contacts = finder.process(&grid, 10, 10, &config);
        assert_eq!(contacts.len(), 1);
        assert!(!contacts[0].valid);
    }

    /// Over random heatmaps, every emitted contact's coordinates/sizes stay
    /// in range and indices within one frame are pairwise distinct.
    #[test]
    fn random_heatmaps_uphold_range_and_distinct_index_invariants() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let config = test_config();
        let rows = 12;
        let cols = 12;

        for _ in 0..200 {
            let mut finder = ContactFinder::new();
            for _frame in 0..3 {
                let grid: Vec<f64> = (0..rows * cols).map(|_| rng.gen_range(0.0..1.0)).collect();
                let contacts = finder.process(&grid, rows, cols, &config);

                for c in &contacts {
                    assert!((0.0..=1.0).contains(&c.mean_x));
                    assert!((0.0..=1.0).contains(&c.mean_y));
                    assert!(c.major >= c.minor);
                    assert!(c.minor >= 0.0);
                }

                let mut indices: Vec<usize> = contacts.iter().map(|c| c.index).collect();
                indices.sort_unstable();
                indices.dedup();
                assert_eq!(indices.len(), contacts.len(), "duplicate index within one frame");
            }
        }
    }
}
