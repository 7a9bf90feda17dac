//! Settings file.
//!
//! ```toml
//! # retrace.toml
//! macro_dir = "macros"
//! stop_key = "ESCAPE"
//! injector = "enigo"      # or "virtual"
//! dpi_scale = 1.25
//!
//! drain_grace_ms = 100
//! wait_margin_ms = 1000
//! start_lead_ms = 50
//! max_start_skew_ms = 2
//! spin_threshold_us = 2000
//! ```
//!
//! Every field is optional. Unknown fields are an error so typos don't go unnoticed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::BackendKind;
use crate::clock::Precision;
use crate::error::{Error, Result};
use crate::keycode;
use crate::orchestrator::ReplayOptions;
use crate::scheduler::SchedulerOptions;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding saved macros.
    pub macro_dir: PathBuf,
    /// Name of the key that ends a recording. Read by programs that embed
    /// [`Recorder`](crate::Recorder); see [`stop_code`](Self::stop_code).
    pub stop_key: String,
    pub drain_grace_ms: u64,
    pub wait_margin_ms: u64,
    pub start_lead_ms: u64,
    pub max_start_skew_ms: u64,
    pub spin_threshold_us: u64,
    /// Recorded coordinates are divided by this before injection.
    pub dpi_scale: f64,
    pub injector: BackendKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            macro_dir: PathBuf::from("macros"),
            stop_key: "ESCAPE".to_string(),
            drain_grace_ms: 100,
            wait_margin_ms: 1000,
            start_lead_ms: 50,
            max_start_skew_ms: 2,
            spin_threshold_us: 2000,
            dpi_scale: 1.0,
            injector: BackendKind::default(),
        }
    }
}

impl Settings {
    /// Read and validate a TOML settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.dpi_scale.is_finite() || self.dpi_scale <= 0.0 {
            return Err(Error::ConfigValue(format!(
                "dpi_scale must be a positive number, got {}",
                self.dpi_scale
            )));
        }
        self.stop_code()?;
        Ok(())
    }

    /// Capture code of [`stop_key`](Self::stop_key).
    pub fn stop_code(&self) -> Result<u16> {
        Ok(keycode::code_for_name(&self.stop_key)?)
    }

    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            scheduler: SchedulerOptions {
                drain_grace: Duration::from_millis(self.drain_grace_ms),
                precision: Precision {
                    spin_threshold: Duration::from_micros(self.spin_threshold_us),
                    ..Precision::default()
                },
                dpi_scale: self.dpi_scale,
            },
            start_lead: Duration::from_millis(self.start_lead_ms),
            wait_margin: Duration::from_millis(self.wait_margin_ms),
            max_start_skew: Duration::from_millis(self.max_start_skew_ms),
        }
    }
}
