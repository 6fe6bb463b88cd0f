// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Calibration of demodulated samples.
//!
//! A raw sample goes through four stages, always in this order:
//!
//! 1. removal of the internal phase shift measured on the loopback path,
//! 2. conversion from readout counts to volts,
//! 3. normalization by the linear tone amplitude,
//! 4. correction of the splitter loss (drive and return pass), if installed.
//!
//! [`CalibrationTransform::apply`] runs the whole chain.
use std::f64::consts::TAU;

use num_complex::Complex64;
use readout_common::DeviceTraits;
use readout_units::{Duration, Seconds, db_to_amplitude};

use crate::settings::AcquisitionSettings;
use crate::{Error, Result};

/// Unit phasor of the loopback reference.
///
/// The phase accumulated over the extra loopback delay is excluded, so only
/// the phase shift shared by both paths is divided out. Returns `None` for a
/// reference without a defined phase.
fn loopback_phasor(frequency: f64, loopback: Complex64, loopback_delay: f64) -> Option<Complex64> {
    let norm = loopback.norm();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(loopback / norm * Complex64::from_polar(1.0, TAU * frequency * loopback_delay))
}

/// Divide the internal phase shift, as seen on the loopback path, out of a sample.
///
/// A zero loopback reference carries no phase; the sample is returned unchanged.
pub fn remove_loopback_phase(
    frequency: f64,
    raw: Complex64,
    loopback: Complex64,
    loopback_delay: f64,
) -> Complex64 {
    match loopback_phasor(frequency, loopback, loopback_delay) {
        Some(phasor) => raw / phasor,
        None => raw,
    }
}

/// Inverse of [`remove_loopback_phase`].
pub fn restore_loopback_phase(
    frequency: f64,
    corrected: Complex64,
    loopback: Complex64,
    loopback_delay: f64,
) -> Complex64 {
    match loopback_phasor(frequency, loopback, loopback_delay) {
        Some(phasor) => corrected * phasor,
        None => corrected,
    }
}

/// [`remove_loopback_phase`] applied element-wise.
pub fn remove_loopback_phase_slice(
    frequencies: &[f64],
    raw: &[Complex64],
    loopback: &[Complex64],
    loopback_delay: f64,
) -> Result<Vec<Complex64>> {
    if frequencies.len() != raw.len() || raw.len() != loopback.len() {
        return Err(Error::new(format!(
            "Mismatched calibration inputs: {} frequencies, {} samples, {} loopback references",
            frequencies.len(),
            raw.len(),
            loopback.len()
        )));
    }
    Ok(frequencies
        .iter()
        .zip(raw)
        .zip(loopback)
        .map(|((&f, &z), &zcal)| remove_loopback_phase(f, z, zcal, loopback_delay))
        .collect())
}

pub fn to_physical_units(sample: Complex64, volts_per_count: f64) -> Complex64 {
    sample * volts_per_count
}

/// Divide by the linear amplitude of a tone driven at `amplitude_dbm`.
pub fn apply_amplitude_normalization(sample: Complex64, amplitude_dbm: f64) -> Complex64 {
    sample / db_to_amplitude(amplitude_dbm)
}

/// Undo a splitter loss of `loss_db` suffered once on the drive and once on the return line.
pub fn apply_splitter_loss(sample: Complex64, loss_db: f64) -> Complex64 {
    sample / db_to_amplitude(-2.0 * loss_db)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTransform {
    volts_per_count: f64,
    loopback_delay: Duration<Seconds>,
    splitter_loss_db: Option<f64>,
}

impl CalibrationTransform {
    pub fn new(
        volts_per_count: f64,
        loopback_delay: Duration<Seconds>,
        splitter_loss_db: Option<f64>,
    ) -> Self {
        CalibrationTransform {
            volts_per_count,
            loopback_delay,
            splitter_loss_db,
        }
    }

    pub fn from_settings(settings: &AcquisitionSettings, traits: &DeviceTraits) -> Self {
        Self::new(
            traits.volts_per_count,
            settings.loopback_delay(),
            settings.splitter_loss(),
        )
    }

    /// Raw sample converted to volts, without any other correction.
    pub fn raw_volts(&self, raw: Complex64) -> Complex64 {
        to_physical_units(raw, self.volts_per_count)
    }

    /// Full calibration chain for a single sample.
    pub fn apply(
        &self,
        frequency: f64,
        raw: Complex64,
        loopback: Complex64,
        amplitude_dbm: f64,
    ) -> Complex64 {
        let z = remove_loopback_phase(frequency, raw, loopback, self.loopback_delay.value());
        let z = to_physical_units(z, self.volts_per_count);
        let z = apply_amplitude_normalization(z, amplitude_dbm);
        match self.splitter_loss_db {
            Some(loss_db) => apply_splitter_loss(z, loss_db),
            None => z,
        }
    }

    /// Full calibration chain for a timestream sharing one tone and one loopback reference.
    pub fn apply_timestream(
        &self,
        frequency: f64,
        raw: &[Complex64],
        loopback: Complex64,
        amplitude_dbm: f64,
    ) -> Vec<Complex64> {
        raw.iter()
            .map(|&z| self.apply(frequency, z, loopback, amplitude_dbm))
            .collect()
    }
}
