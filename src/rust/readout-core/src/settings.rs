// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Settings of an acquisition session.
//!
//! Settings are plain serializable numbers so they can be kept in a JSON file
//! next to the measurement data. Typed accessors convert them into quantities
//! for the acquisition code.
use std::path::{Path, PathBuf};

use anyhow::Context;
use readout_common::{AnalogBank, ClockSource, DeviceTraits};
use readout_units::{DecibelMilliwatts, Duration, Power, Seconds, dbm, seconds};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Serial number of the readout board.
    pub serial: u16,
    /// An external splitter sits in both the drive and the return line.
    pub splitter: bool,
    pub splitter_loss_db: f64,
    pub clock_source: ClockSource,
    pub full_scale_dbm: f64,
    pub analog_bank: AnalogBank,
    /// FIR stage used while sweeping.
    pub sweep_fir_stage: u8,
    pub sweep_points: usize,
    pub samples_to_average: usize,
    pub calibration_samples: usize,
    /// Leading samples dropped from every read.
    pub discard_samples: usize,
    pub loopback_settle_s: f64,
    pub tone_settle_s: f64,
    pub configure_settle_s: f64,
    /// Extra electrical delay of the loopback path relative to the signal path.
    pub loopback_delay_s: f64,
    pub low_power_warning_dbm: f64,
    pub low_power_warning_max_tones: usize,
    pub perturbation_seed: u64,
    pub noise: NoiseSettings,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        AcquisitionSettings {
            serial: 27,
            splitter: true,
            splitter_loss_db: 10.5,
            clock_source: ClockSource::Sma,
            full_scale_dbm: 1.0,
            analog_bank: AnalogBank::Low,
            sweep_fir_stage: 6,
            sweep_points: 10,
            samples_to_average: 10,
            calibration_samples: 20,
            discard_samples: 0,
            loopback_settle_s: 0.5,
            tone_settle_s: 1.0,
            configure_settle_s: 1.0,
            loopback_delay_s: 0.0,
            low_power_warning_dbm: -60.0,
            low_power_warning_max_tones: 100,
            perturbation_seed: 0,
            noise: NoiseSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    pub fir_stage: u8,
    /// Packet parser executable.
    pub parser_path: PathBuf,
    /// Network interface the packet stream arrives on.
    pub interface: String,
    pub output_root: PathBuf,
    /// Directory below `output_root` the parser writes into.
    pub run_directory: String,
    /// Remove the capture artifacts after a successful import.
    pub delete_output: bool,
    /// Extra capture time requested from the parser beyond the noise duration.
    pub sample_margin_s: f64,
    /// Extra wait beyond the noise duration before the output is read.
    pub wait_margin_s: f64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        NoiseSettings {
            fir_stage: 6,
            parser_path: PathBuf::from("parser"),
            interface: "enp2s0".to_string(),
            output_root: PathBuf::from("tmp"),
            run_directory: "parser_data_00".to_string(),
            delete_output: false,
            sample_margin_s: 10.0,
            wait_margin_s: 20.0,
        }
    }
}

impl NoiseSettings {
    /// Directory the parser writes the capture into.
    pub fn run_path(&self) -> PathBuf {
        self.output_root.join(&self.run_directory)
    }

    pub fn sample_margin(&self) -> Duration<Seconds> {
        seconds(self.sample_margin_s)
    }

    pub fn wait_margin(&self) -> Duration<Seconds> {
        seconds(self.wait_margin_s)
    }
}

impl AcquisitionSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings = serde_json::from_str(json).context("Failed to parse acquisition settings")?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn full_scale(&self) -> Power<DecibelMilliwatts> {
        dbm(self.full_scale_dbm)
    }

    pub fn loopback_settle(&self) -> Duration<Seconds> {
        seconds(self.loopback_settle_s)
    }

    pub fn tone_settle(&self) -> Duration<Seconds> {
        seconds(self.tone_settle_s)
    }

    pub fn configure_settle(&self) -> Duration<Seconds> {
        seconds(self.configure_settle_s)
    }

    pub fn loopback_delay(&self) -> Duration<Seconds> {
        seconds(self.loopback_delay_s)
    }

    /// Splitter loss per pass, if a splitter is installed.
    pub fn splitter_loss(&self) -> Option<f64> {
        self.splitter.then_some(self.splitter_loss_db)
    }

    /// Bring settings into the range the device accepts.
    ///
    /// Returns the list of changes so that the caller can report them.
    pub fn sanitize(&mut self, traits: &DeviceTraits) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        let max_stage = traits.max_fir_stage;
        for (field, value) in [
            ("sweep_fir_stage", &mut self.sweep_fir_stage),
            ("noise.fir_stage", &mut self.noise.fir_stage),
        ] {
            if *value > max_stage {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: max_stage.to_string(),
                    reason: format!("FIR stage must not exceed {max_stage}."),
                });
                *value = max_stage;
            }
        }
        for (field, value) in [
            ("sweep_points", &mut self.sweep_points),
            ("samples_to_average", &mut self.samples_to_average),
            ("calibration_samples", &mut self.calibration_samples),
        ] {
            if *value == 0 {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: "1".to_string(),
                    reason: "At least one sample is required.".to_string(),
                });
                *value = 1;
            }
        }
        for (field, value) in [
            ("loopback_settle_s", &mut self.loopback_settle_s),
            ("tone_settle_s", &mut self.tone_settle_s),
            ("configure_settle_s", &mut self.configure_settle_s),
            ("noise.sample_margin_s", &mut self.noise.sample_margin_s),
            ("noise.wait_margin_s", &mut self.noise.wait_margin_s),
        ] {
            if value.is_nan() || *value < 0.0 {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: "0".to_string(),
                    reason: "Waiting times must be non-negative.".to_string(),
                });
                *value = 0.0;
            }
        }
        changes
    }
}
