#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Parameter file schema for the calibration rig.
//!
//! - `Parameters` and sub-structs are (de)serialized from the device JSON file
//!   (upper-case keys, as written by the bar configuration tools) or from TOML.
//! - `validate()` rejects shapes the core cannot work with.
//! - Persistence writes atomically and derives the `_calibrated.json` sibling.
//! - A diagnostics CSV records every solve for later review.
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Number of channel slots a bar exposes in its mask.
pub const MAX_CHANNELS: u32 = 4;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct Serial {
    /// Port path or name; empty means "auto-detect".
    #[serde(default)]
    pub port: String,
    pub baudrate: u32,
    /// Sampling command sent to read raw channels.
    pub command: String,
}

/// One stored calibration record for a channel.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct LoadCell {
    pub zero: u64,
    pub factor: f32,
    /// Big-endian IEEE-754 bits of `factor`, 8 hex digits.
    #[serde(default)]
    pub ieee: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct BarCfg {
    pub id: u8,
    /// Bitmask of active channel slots (bits 0..=3).
    pub lcs: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lc: Vec<LoadCell>,
}

impl BarCfg {
    pub fn active_channels(&self) -> u32 {
        self.lcs.count_ones()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "lowercase")]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

impl Logging {
    fn is_empty(&self) -> bool {
        self.file.is_none() && self.level.is_none() && self.rotation.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct Parameters {
    pub serial: Serial,
    pub bars: Vec<BarCfg>,
    /// Nominal calibration weight placed at every weight step.
    #[serde(default)]
    pub weight: f64,
    /// Samples averaged per calibration step.
    pub avg: u32,
    /// Samples discarded before averaging; 0 falls back to `avg`.
    #[serde(default)]
    pub ignore: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Logging::is_empty")]
    pub logging: Logging,
}

impl Parameters {
    /// Fill defaults that depend on other fields.
    pub fn normalize(&mut self) {
        if self.ignore == 0 {
            self.ignore = self.avg;
        }
        self.serial.port = self.serial.port.trim().to_string();
    }

    /// Active channels per bar, taken from the first bar.
    pub fn nlcs(&self) -> u32 {
        self.bars.first().map_or(0, BarCfg::active_channels)
    }

    /// True when every bar carries calibration records.
    pub fn is_calibrated(&self) -> bool {
        !self.bars.is_empty() && self.bars.iter().all(|b| !b.lc.is_empty())
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.baudrate == 0 {
            eyre::bail!("SERIAL.BAUDRATE must be > 0");
        }
        if self.serial.command.trim().is_empty() {
            eyre::bail!("SERIAL.COMMAND must not be empty");
        }

        // Sampling
        if self.avg == 0 {
            eyre::bail!("AVG must be >= 1");
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            eyre::bail!("WEIGHT must be > 0");
        }

        // Bars
        if self.bars.is_empty() {
            eyre::bail!("no BARS defined");
        }
        let nlcs = self.nlcs();
        for (i, bar) in self.bars.iter().enumerate() {
            if bar.lcs == 0 {
                eyre::bail!("BARS[{i}].LCS has no active channel");
            }
            if u32::from(bar.lcs) >> MAX_CHANNELS != 0 {
                eyre::bail!("BARS[{i}].LCS uses bits above channel {MAX_CHANNELS}");
            }
            if bar.active_channels() != nlcs {
                eyre::bail!(
                    "BARS[{i}] has {} active channels, expected {nlcs}; number of load cells per bar must match",
                    bar.active_channels()
                );
            }
            if !bar.lc.is_empty() && bar.lc.len() != nlcs as usize {
                eyre::bail!(
                    "BARS[{i}].LC has {} records, expected {nlcs}",
                    bar.lc.len()
                );
            }
            if self.bars[..i].iter().any(|b| b.id == bar.id) {
                eyre::bail!("BARS[{i}].ID {} is used twice", bar.id);
            }
        }
        Ok(())
    }
}

pub fn load_json(s: &str) -> eyre::Result<Parameters> {
    let mut p: Parameters = serde_json::from_str(s)?;
    p.normalize();
    Ok(p)
}

pub fn load_toml(s: &str) -> eyre::Result<Parameters> {
    let mut p: Parameters = toml::from_str(s)?;
    p.normalize();
    Ok(p)
}

/// Load parameters from disk, choosing the format by extension (`.toml` or JSON).
pub fn load_path(path: &Path) -> eyre::Result<Parameters> {
    let text = fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read parameters {:?}: {}", path, e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        load_toml(&text)
    } else {
        load_json(&text)
    };
    parsed.map_err(|e| eyre::eyre!("parse parameters {:?}: {}", path, e))
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Write parameters as indented JSON, atomically.
pub fn persist_json(path: &Path, p: &Parameters) -> eyre::Result<()> {
    let data = serde_json::to_vec_pretty(p)?;
    write_atomic(path, &data).map_err(|e| eyre::eyre!("write parameters {:?}: {}", path, e))
}

/// Write parameters back in the format `load_path` would read them in.
pub fn persist_path(path: &Path, p: &Parameters) -> eyre::Result<()> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if !is_toml {
        return persist_json(path, p);
    }
    let data = toml::to_string_pretty(p)?;
    write_atomic(path, data.as_bytes())
        .map_err(|e| eyre::eyre!("write parameters {:?}: {}", path, e))
}

/// Derive the calibrated sibling path: `rig.json` -> `rig_calibrated.json`.
pub fn calibrated_path(config: &Path) -> PathBuf {
    let s = config.to_string_lossy();
    let lower = s.to_ascii_lowercase();
    if lower.ends_with("_calibrated.json") {
        return config.to_path_buf();
    }
    if lower.ends_with(".json") {
        return PathBuf::from(format!("{}_calibrated.json", &s[..s.len() - 5]));
    }
    PathBuf::from(format!("{s}_calibrated.json"))
}

/// Derive the diagnostics sibling path: `rig.json` -> `rig_debug.csv`.
pub fn debug_report_path(config: &Path) -> PathBuf {
    config.with_file_name(format!(
        "{}_debug.csv",
        config
            .file_stem()
            .map_or_else(|| "runrilla".into(), |s| s.to_string_lossy())
    ))
}

/// One calibration solve, as recorded in the diagnostics CSV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugRow {
    pub timestamp_s: u64,
    pub bars: usize,
    pub nlcs: usize,
    pub weight: f64,
    /// ‖diff·factors − W‖ / weight
    pub residual: f64,
    pub pinv_norm: f64,
    /// `;`-joined per-channel zeros, bar-major.
    pub zeros: String,
    /// `;`-joined per-channel factor hex, bar-major.
    pub factors: String,
}

/// Append a row to the diagnostics CSV, writing the header when the file is new.
pub fn append_debug_report(path: &Path, row: &DebugRow) -> eyre::Result<()> {
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre::eyre!("open debug report {:?}: {}", path, e))?;
    let mut w = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    w.serialize(row)?;
    w.flush()?;
    Ok(())
}
