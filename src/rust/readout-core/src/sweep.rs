// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Per-module tone writing and frequency sweeps.
//!
//! Every step of a sweep measures twice: once with the excitation comb routed
//! straight back into the demodulator (loopback) and once through the device
//! under test. The loopback reading is the calibration reference for that step.
use num_complex::Complex64;
use readout_common::{ModuleId, Routing};
use readout_log::{diagnostic, warn};
use readout_units::{Duration, Seconds, db_to_amplitude};

use crate::calibration::CalibrationTransform;
use crate::command_batch::CommandBatch;
use crate::driver::ReadoutDriver;
use crate::error::ProtocolContext;
use crate::partition::ModuleChannel;
use crate::perturb::TonePerturbation;
use crate::settings::AcquisitionSettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    TonesWritten,
    Sweeping(usize),
    Done,
}

/// Sweep data of one channel, indexed by step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSweep {
    /// Frequencies actually written, including perturbation.
    pub frequencies: Vec<f64>,
    pub z: Vec<Complex64>,
    /// Averaged samples through the device under test, in volts.
    pub raw: Vec<Complex64>,
    /// Averaged loopback samples, in readout counts.
    pub calibration: Vec<Complex64>,
}

#[derive(Debug, Clone)]
struct Step {
    frequencies: Vec<f64>,
    z: Vec<Complex64>,
    raw: Vec<Complex64>,
    calibration: Vec<Complex64>,
}

pub struct ModuleSweepExecutor<'a> {
    driver: &'a dyn ReadoutDriver,
    module: ModuleId,
    nco: f64,
    settings: &'a AcquisitionSettings,
    transform: &'a CalibrationTransform,
    state: ExecutorState,
    amplitudes: Vec<f64>,
    steps: Vec<Step>,
}

impl<'a> ModuleSweepExecutor<'a> {
    pub fn new(
        driver: &'a dyn ReadoutDriver,
        module: ModuleId,
        nco: f64,
        settings: &'a AcquisitionSettings,
        transform: &'a CalibrationTransform,
    ) -> Self {
        ModuleSweepExecutor {
            driver,
            module,
            nco,
            settings,
            transform,
            state: ExecutorState::Idle,
            amplitudes: vec![],
            steps: vec![],
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Amplitudes of the tones currently written, in dBm.
    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    fn check_amplitudes(&self, amplitudes: &[f64]) -> Result<()> {
        let full_scale = self.settings.full_scale_dbm;
        if let Some(a) = amplitudes
            .iter()
            .find(|a| a.is_nan() || **a > full_scale)
        {
            return Err(Error::configuration(format!(
                "Amplitude {a} dBm on module {} exceeds the full scale of {full_scale} dBm: raise the full scale or lower the power",
                self.module
            )));
        }
        if amplitudes.len() > usize::from(u16::MAX) {
            return Err(Error::configuration(format!(
                "Too many channels for module {}",
                self.module
            )));
        }
        let threshold = self.settings.low_power_warning_dbm;
        if amplitudes.len() < self.settings.low_power_warning_max_tones
            && amplitudes.iter().any(|&a| a < threshold)
        {
            warn!(
                "Tone amplitudes below {} dBm on module {}: digitization noise may occur",
                threshold,
                self.module
            );
        }
        Ok(())
    }

    /// Clear the module and write one tone per channel.
    ///
    /// Frequencies are perturbed before they are written. Returns the written
    /// frequencies.
    pub async fn write_tones(
        &mut self,
        channels: &[ModuleChannel],
        perturbation: &mut TonePerturbation,
    ) -> Result<Vec<f64>> {
        let amplitudes: Vec<f64> = channels.iter().map(|c| c.amplitude_dbm).collect();
        self.check_amplitudes(&amplitudes)?;
        let mut frequencies = channels
            .iter()
            .map(|c| {
                c.frequencies.first().copied().ok_or_else(|| {
                    Error::configuration(format!("Channel {} has no frequencies", c.channel))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        perturbation.perturb_all(&mut frequencies);
        self.write_exact(&frequencies, amplitudes).await?;
        Ok(frequencies)
    }

    async fn write_exact(&mut self, frequencies: &[f64], amplitudes: Vec<f64>) -> Result<()> {
        self.driver
            .clear_channels(self.module)
            .await
            .on_module(self.module)?;
        let full_scale = self.settings.full_scale_dbm;
        let mut batch = CommandBatch::new(self.driver, self.module);
        for (channel, (&f, &a)) in (1u16..).zip(frequencies.iter().zip(&amplitudes)) {
            batch.set_frequency(f - self.nco, channel);
            batch.set_amplitude(db_to_amplitude(a - full_scale), channel);
        }
        batch.commit().await?;
        self.amplitudes = amplitudes;
        self.steps.clear();
        self.state = ExecutorState::TonesWritten;
        Ok(())
    }

    async fn settle(&self, wait: Duration<Seconds>) {
        tokio::time::sleep(wait.to_std()).await;
    }

    /// Averaged loopback reference of the first `channels` channels.
    ///
    /// Routing is switched to loopback and back to normal, each followed by
    /// the loopback settling time.
    pub async fn acquire_calibration_frame(&mut self, channels: usize) -> Result<Vec<Complex64>> {
        let settings = self.settings;
        self.set_routing(Routing::Loopback).await?;
        self.settle(settings.loopback_settle()).await;
        let frame = self
            .driver
            .get_samples(
                settings.calibration_samples + settings.discard_samples,
                self.module,
            )
            .await
            .on_module(self.module)?;
        self.set_routing(Routing::Normal).await?;
        self.settle(settings.loopback_settle()).await;
        frame
            .channel_means(channels, settings.discard_samples)
            .map_err(|e| Error::protocol(Some(self.module), e.into()))
    }

    async fn set_routing(&self, routing: Routing) -> Result<()> {
        self.driver
            .set_routing(routing, self.module)
            .await
            .on_module(self.module)
    }

    /// Measure one sweep step at the given frequencies, one per written channel.
    pub async fn sweep_step(&mut self, step: usize, frequencies: &[f64]) -> Result<()> {
        if self.state == ExecutorState::Idle || self.state == ExecutorState::Done {
            return Err(Error::new(format!(
                "Module {} has no tones written for sweeping",
                self.module
            )));
        }
        let channels = self.amplitudes.len();
        if frequencies.len() != channels {
            return Err(Error::configuration(format!(
                "Sweep step {step} has {} frequencies for {channels} channels",
                frequencies.len()
            )));
        }
        self.state = ExecutorState::Sweeping(step);
        diagnostic!("Module {}: sweep step {}", self.module, step);

        let mut batch = CommandBatch::new(self.driver, self.module);
        for (channel, &f) in (1u16..).zip(frequencies) {
            batch.set_frequency(f - self.nco, channel);
        }
        batch.commit().await?;

        let calibration = self.acquire_calibration_frame(channels).await?;
        let settings = self.settings;
        let frame = self
            .driver
            .get_samples(
                settings.samples_to_average + settings.discard_samples,
                self.module,
            )
            .await
            .on_module(self.module)?;
        let measured = frame
            .channel_means(channels, settings.discard_samples)
            .map_err(|e| Error::protocol(Some(self.module), e.into()))?;

        let z = frequencies
            .iter()
            .zip(&measured)
            .zip(&calibration)
            .zip(&self.amplitudes)
            .map(|(((&f, &raw), &cal), &a)| self.transform.apply(f, raw, cal, a))
            .collect();
        let raw = measured.iter().map(|&m| self.transform.raw_volts(m)).collect();
        self.steps.push(Step {
            frequencies: frequencies.to_vec(),
            z,
            raw,
            calibration,
        });
        Ok(())
    }

    /// Clear the module and return the collected steps per channel.
    pub async fn finalize(&mut self) -> Result<Vec<ChannelSweep>> {
        self.driver
            .clear_channels(self.module)
            .await
            .on_module(self.module)?;
        self.state = ExecutorState::Done;
        let steps = std::mem::take(&mut self.steps);
        let mut channels = vec![ChannelSweep::default(); self.amplitudes.len()];
        for step in steps {
            for (channel, (((f, z), raw), cal)) in channels.iter_mut().zip(
                step.frequencies
                    .into_iter()
                    .zip(step.z)
                    .zip(step.raw)
                    .zip(step.calibration),
            ) {
                channel.frequencies.push(f);
                channel.z.push(z);
                channel.raw.push(raw);
                channel.calibration.push(cal);
            }
        }
        Ok(channels)
    }

    /// Run a complete sweep over the given channels.
    ///
    /// All channels must visit the same number of points. The whole frequency
    /// matrix is perturbed once; the tones are first written at the first
    /// point of every channel.
    pub async fn sweep(
        &mut self,
        channels: &[ModuleChannel],
        perturbation: &mut TonePerturbation,
    ) -> Result<Vec<ChannelSweep>> {
        if channels.is_empty() {
            return Ok(vec![]);
        }
        let points = channels[0].frequencies.len();
        if points == 0 {
            return Err(Error::configuration(format!(
                "Module {} got sweep channels without points",
                self.module
            )));
        }
        if let Some(c) = channels.iter().find(|c| c.frequencies.len() != points) {
            return Err(Error::configuration(format!(
                "Channel {} has {} sweep points, expected {points}",
                c.channel,
                c.frequencies.len()
            )));
        }
        let amplitudes: Vec<f64> = channels.iter().map(|c| c.amplitude_dbm).collect();
        self.check_amplitudes(&amplitudes)?;

        let mut matrix: Vec<Vec<f64>> = channels.iter().map(|c| c.frequencies.clone()).collect();
        for row in matrix.iter_mut() {
            perturbation.perturb_all(row);
        }
        let first: Vec<f64> = matrix.iter().map(|row| row[0]).collect();
        self.write_exact(&first, amplitudes).await?;
        for step in 0..points {
            let frequencies: Vec<f64> = matrix.iter().map(|row| row[step]).collect();
            self.sweep_step(step, &frequencies).await?;
        }
        self.finalize().await
    }
}
