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

//! Layered TOML configuration.
//!
//! Load order, lowest to highest precedence: built-in [`Default`] values,
//! device metadata (screen size, axis inversion), `/etc/iptsd/presets/*.toml`
//! filtered by `[device] vendor`/`product`, `/etc/iptsd.toml`, then
//! `$IPTSD_CONFIG_FILE` if set. A missing `$IPTSD_CONFIG_FILE` is an
//! [`Error::InvalidConfig`], matching the original daemon's behavior for an
//! explicitly requested override.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::descriptor::Metadata;
use crate::error::{Error, Result};

pub const PRESET_DIR: &str = "/etc/iptsd/presets";
pub const SYSTEM_CONFIG_FILE: &str = "/etc/iptsd.toml";
pub const CONFIG_FILE_ENV: &str = "IPTSD_CONFIG_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeutralAlgorithm {
    Mode,
    Average,
    Constant,
}

impl NeutralAlgorithm {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mode" => Some(NeutralAlgorithm::Mode),
            "average" => Some(NeutralAlgorithm::Average),
            "constant" => Some(NeutralAlgorithm::Constant),
            _ => None,
        }
    }
}

/// The full daemon configuration, as consumed by every other component.
///
/// Fields mirror `core::Config` from the original implementation one for
/// one; the handful of `dft_mpp2_*` fields fill a gap where the original's
/// `core/generic/dft.hpp` reads config keys that its own `config.hpp`
/// (a slightly older snapshot) never declared.
#[derive(Debug, Clone)]
pub struct Config {
    pub vendor: u16,
    pub product: u16,

    pub invert_x: bool,
    pub invert_y: bool,

    pub width: f64,
    pub height: f64,

    pub touch_disable: bool,
    pub touch_check_cone: bool,
    pub touch_check_stability: bool,
    pub touch_disable_on_palm: bool,
    pub touch_disable_on_stylus: bool,

    pub contacts_neutral: NeutralAlgorithm,
    pub contacts_neutral_value: f64,
    pub contacts_neutral_value_backoff: usize,
    pub contacts_activation_threshold: f64,
    pub contacts_deactivation_threshold: f64,
    pub contacts_temporal_window: usize,
    pub contacts_size_min: f64,
    pub contacts_size_max: f64,
    pub contacts_aspect_min: f64,
    pub contacts_aspect_max: f64,
    pub contacts_size_thresh: f64,
    pub contacts_position_thresh_min: f64,
    pub contacts_position_thresh_max: f64,
    pub contacts_distance_thresh: f64,

    pub stylus_disable: bool,

    pub cone_angle: f64,
    pub cone_distance: f64,

    pub dft_position_min_amp: u32,
    pub dft_position_min_mag: u32,
    pub dft_position_exp: f64,
    pub dft_button_min_mag: u32,
    pub dft_freq_min_mag: u32,
    pub dft_tilt_min_mag: u32,
    pub dft_tilt_distance: f64,
    pub dft_tip_distance: f64,
    pub dft_mpp2_button_min_mag: u32,
    pub dft_mpp2_contact_min_mag: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vendor: 0,
            product: 0,

            invert_x: false,
            invert_y: false,

            width: 0.0,
            height: 0.0,

            touch_disable: false,
            touch_check_cone: true,
            touch_check_stability: true,
            touch_disable_on_palm: false,
            touch_disable_on_stylus: false,

            contacts_neutral: NeutralAlgorithm::Mode,
            contacts_neutral_value: 0.0,
            contacts_neutral_value_backoff: 16,
            contacts_activation_threshold: 24.0,
            contacts_deactivation_threshold: 20.0,
            contacts_temporal_window: 3,
            contacts_size_min: 0.2,
            contacts_size_max: 2.0,
            contacts_aspect_min: 1.0,
            contacts_aspect_max: 2.5,
            contacts_size_thresh: 0.1,
            contacts_position_thresh_min: 0.2,
            contacts_position_thresh_max: 2.0,
            contacts_distance_thresh: 1.0,

            stylus_disable: false,

            cone_angle: 30.0,
            cone_distance: 5.0,

            dft_position_min_amp: 50,
            dft_position_min_mag: 2000,
            dft_position_exp: -0.7,
            dft_button_min_mag: 1000,
            dft_freq_min_mag: 10000,
            dft_tilt_min_mag: 10000,
            dft_tilt_distance: 0.6,
            dft_tip_distance: 0.0,
            dft_mpp2_button_min_mag: 1000,
            dft_mpp2_contact_min_mag: 1000,
        }
    }
}

/// One `[device]`-tagged preset file, or the free-form system/override file.
///
/// All fields are optional so a preset only needs to mention the keys it
/// wants to change; anything absent leaves the running value untouched.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    device: Option<DeviceSection>,
    config: Option<TopSection>,
    touch: Option<TouchSection>,
    contacts: Option<ContactsSection>,
    stylus: Option<StylusSection>,
    cone: Option<ConeSection>,
    dft: Option<DftSection>,
}

#[derive(Debug, Deserialize)]
struct DeviceSection {
    vendor: Option<String>,
    product: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopSection {
    invert_x: Option<bool>,
    invert_y: Option<bool>,
    width: Option<f64>,
    height: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TouchSection {
    disable: Option<bool>,
    check_cone: Option<bool>,
    check_stability: Option<bool>,
    disable_on_palm: Option<bool>,
    disable_on_stylus: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContactsSection {
    neutral: Option<String>,
    neutral_value: Option<f64>,
    neutral_value_backoff: Option<usize>,
    activation_threshold: Option<f64>,
    deactivation_threshold: Option<f64>,
    temporal_window: Option<usize>,
    size_min: Option<f64>,
    size_max: Option<f64>,
    aspect_min: Option<f64>,
    aspect_max: Option<f64>,
    size_thresh: Option<f64>,
    position_thresh_min: Option<f64>,
    position_thresh_max: Option<f64>,
    distance_thresh: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StylusSection {
    disable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ConeSection {
    angle: Option<f64>,
    distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DftSection {
    position_min_amp: Option<u32>,
    position_min_mag: Option<u32>,
    position_exp: Option<f64>,
    button_min_mag: Option<u32>,
    freq_min_mag: Option<u32>,
    tilt_min_mag: Option<u32>,
    tilt_distance: Option<f64>,
    tip_distance: Option<f64>,
    mpp2_button_min_mag: Option<u32>,
    mpp2_contact_min_mag: Option<u32>,
}

fn parse_hex_or_dec(s: &str) -> Option<u16> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

impl Config {
    /// Applies one parsed config file's overrides on top of `self`.
    ///
    /// Fails with [`Error::InvalidConfig`] if `[contacts] neutral` names an
    /// algorithm other than `mode`/`average`/`constant`.
    fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(top) = file.config {
            if let Some(v) = top.invert_x {
                self.invert_x = v;
            }
            if let Some(v) = top.invert_y {
                self.invert_y = v;
            }
            if let Some(v) = top.width {
                self.width = v;
            }
            if let Some(v) = top.height {
                self.height = v;
            }
        }
        if let Some(touch) = file.touch {
            if let Some(v) = touch.disable {
                self.touch_disable = v;
            }
            if let Some(v) = touch.check_cone {
                self.touch_check_cone = v;
            }
            if let Some(v) = touch.check_stability {
                self.touch_check_stability = v;
            }
            if let Some(v) = touch.disable_on_palm {
                self.touch_disable_on_palm = v;
            }
            if let Some(v) = touch.disable_on_stylus {
                self.touch_disable_on_stylus = v;
            }
        }
        if let Some(c) = file.contacts {
            if let Some(v) = c.neutral.as_deref() {
                self.contacts_neutral = NeutralAlgorithm::parse(v)
                    .ok_or_else(|| Error::InvalidConfig(format!("unrecognized neutral algorithm: {v}")))?;
            }
            if let Some(v) = c.neutral_value {
                self.contacts_neutral_value = v;
            }
            if let Some(v) = c.neutral_value_backoff {
                self.contacts_neutral_value_backoff = v;
            }
            if let Some(v) = c.activation_threshold {
                self.contacts_activation_threshold = v;
            }
            if let Some(v) = c.deactivation_threshold {
                self.contacts_deactivation_threshold = v;
            }
            if let Some(v) = c.temporal_window {
                self.contacts_temporal_window = v;
            }
            if let Some(v) = c.size_min {
                self.contacts_size_min = v;
            }
            if let Some(v) = c.size_max {
                self.contacts_size_max = v;
            }
            if let Some(v) = c.aspect_min {
                self.contacts_aspect_min = v;
            }
            if let Some(v) = c.aspect_max {
                self.contacts_aspect_max = v;
            }
            if let Some(v) = c.size_thresh {
                self.contacts_size_thresh = v;
            }
            if let Some(v) = c.position_thresh_min {
                self.contacts_position_thresh_min = v;
            }
            if let Some(v) = c.position_thresh_max {
                self.contacts_position_thresh_max = v;
            }
            if let Some(v) = c.distance_thresh {
                self.contacts_distance_thresh = v;
            }
        }
        if let Some(s) = file.stylus {
            if let Some(v) = s.disable {
                self.stylus_disable = v;
            }
        }
        if let Some(c) = file.cone {
            if let Some(v) = c.angle {
                self.cone_angle = v;
            }
            if let Some(v) = c.distance {
                self.cone_distance = v;
            }
        }
        if let Some(d) = file.dft {
            if let Some(v) = d.position_min_amp {
                self.dft_position_min_amp = v;
            }
            if let Some(v) = d.position_min_mag {
                self.dft_position_min_mag = v;
            }
            if let Some(v) = d.position_exp {
                self.dft_position_exp = v;
            }
            if let Some(v) = d.button_min_mag {
                self.dft_button_min_mag = v;
            }
            if let Some(v) = d.freq_min_mag {
                self.dft_freq_min_mag = v;
            }
            if let Some(v) = d.tilt_min_mag {
                self.dft_tilt_min_mag = v;
            }
            if let Some(v) = d.tilt_distance {
                self.dft_tilt_distance = v;
            }
            if let Some(v) = d.tip_distance {
                self.dft_tip_distance = v;
            }
            if let Some(v) = d.mpp2_button_min_mag {
                self.dft_mpp2_button_min_mag = v;
            }
            if let Some(v) = d.mpp2_contact_min_mag {
                self.dft_mpp2_contact_min_mag = v;
            }
        }
        Ok(())
    }

    /// Whether `file`'s `[device]` section names this `vendor`/`product`
    /// pair (or declares no device section at all, i.e. applies globally).
    fn matches_device(file: &ConfigFile, vendor: u16, product: u16) -> bool {
        match &file.device {
            None => true,
            Some(dev) => {
                let v_ok = dev
                    .vendor
                    .as_deref()
                    .and_then(parse_hex_or_dec)
                    .map(|v| v == vendor)
                    .unwrap_or(true);
                let p_ok = dev
                    .product
                    .as_deref()
                    .and_then(parse_hex_or_dec)
                    .map(|p| p == product)
                    .unwrap_or(true);
                v_ok && p_ok
            }
        }
    }

    fn load_preset_dir(&mut self, dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return Ok(()), // missing preset dir is not an error
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let text = fs::read_to_string(&path)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            let file: ConfigFile = toml::from_str(&text)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;

            if Self::matches_device(&file, self.vendor, self.product) {
                self.apply(file)?;
            }
        }
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let file: ConfigFile = toml::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        self.apply(file)?;
        Ok(())
    }

    /// Builds the layered configuration for one device.
    ///
    /// `metadata` seeds screen size and axis inversion before any config
    /// file is consulted, matching the original `Config(vendor, product,
    /// metadata)` constructor. `config_override` is the `--config` CLI flag,
    /// which has the same effect as `$IPTSD_CONFIG_FILE`.
    pub fn load(
        vendor: u16,
        product: u16,
        metadata: Option<&Metadata>,
        config_override: Option<&Path>,
    ) -> Result<Config> {
        let mut config = Config {
            vendor,
            product,
            ..Config::default()
        };

        if let Some(meta) = metadata {
            config.width = meta.width_mm as f64 / 1e3;
            config.height = meta.height_mm as f64 / 1e3;
            config.invert_x = meta.transform.xx < 0.0;
            config.invert_y = meta.transform.yy < 0.0;
        }

        config.load_preset_dir(Path::new(PRESET_DIR))?;

        let env_override = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        let explicit = config_override.map(Path::to_path_buf).or(env_override);

        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::InvalidConfig(format!(
                        "{} not found",
                        path.display()
                    )));
                }
                config.load_file(&path)?;
            }
            None => {
                if Path::new(SYSTEM_CONFIG_FILE).exists() {
                    config.load_file(Path::new(SYSTEM_CONFIG_FILE))?;
                }
            }
        }

        if config.width == 0.0 || config.height == 0.0 {
            return Err(Error::InvalidConfig(
                "screen width/height is zero; no device metadata and no config override".into(),
            ));
        }

        Ok(config)
    }

    /// `sqrt(width^2 + height^2)`, used to normalize linear mm thresholds.
    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_screen_size() {
        let err = Config::load(0, 0, None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn metadata_seeds_screen_size_and_inversion() {
        let meta = Metadata {
            columns: 10,
            rows: 10,
            width_mm: 290,
            height_mm: 180,
            transform: crate::descriptor::Transform2D { xx: -1.0, yy: 1.0 },
        };
        let config = Config::load(0x1, 0x2, Some(&meta), None).unwrap();
        assert!((config.width - 0.290).abs() < 1e-9);
        assert!((config.height - 0.180).abs() < 1e-9);
        assert!(config.invert_x);
        assert!(!config.invert_y);
    }

    #[test]
    fn missing_explicit_override_is_invalid_config() {
        let meta = Metadata {
            columns: 10,
            rows: 10,
            width_mm: 290,
            height_mm: 180,
            transform: crate::descriptor::Transform2D { xx: 1.0, yy: 1.0 },
        };
        let err = Config::load(0, 0, Some(&meta), Some(Path::new("/no/such/file.toml")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn parses_hex_and_decimal_device_ids() {
        assert_eq!(parse_hex_or_dec("0x045E"), Some(0x045E));
        assert_eq!(parse_hex_or_dec("1118"), Some(1118));
    }

    #[test]
    fn unrecognized_neutral_algorithm_is_invalid_config() {
        let meta = Metadata {
            columns: 10,
            rows: 10,
            width_mm: 290,
            height_mm: 180,
            transform: crate::descriptor::Transform2D { xx: 1.0, yy: 1.0 },
        };
        let path = std::env::temp_dir().join(format!("iptsd-test-{:?}.toml", std::thread::current().id()));
        fs::write(&path, "[contacts]\nneutral = \"bogus\"\n").unwrap();

        let err = Config::load(0, 0, Some(&meta), Some(&path)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let _ = fs::remove_file(&path);
    }
}
