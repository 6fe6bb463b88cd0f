// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Noise timestreams through the external packet capture.
use anyhow::Context;
use num_complex::Complex64;
use readout_common::{DeviceTraits, ModuleId};
use readout_log::{diagnostic, info, warn};
use readout_units::{Duration, Frequency, Hertz, Seconds};

use crate::calibration::CalibrationTransform;
use crate::capture_agent::{CaptureAgent, CaptureArgs, CaptureReader};
use crate::dispatch::fan_out;
use crate::driver::ReadoutDriver;
use crate::error::ProtocolContext;
use crate::module_map::ModuleMap;
use crate::partition::Partition;
use crate::perturb::TonePerturbation;
use crate::settings::AcquisitionSettings;
use crate::sweep::ModuleSweepExecutor;
use crate::{Error, Result};

/// Channels delivered unequal sample counts and were cut to the shortest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub shortest: usize,
    pub longest: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseTimestreams {
    pub sample_rate: Frequency<Hertz>,
    /// Calibrated timestream per channel, in request order.
    pub z: Vec<Vec<Complex64>>,
    /// Uncalibrated timestream per channel, in volts.
    pub raw: Vec<Vec<Complex64>>,
    /// Loopback reference per channel, in readout counts.
    pub calibration: Vec<Complex64>,
    pub length_mismatch: Option<LengthMismatch>,
}

struct ChannelStream {
    z: Vec<Complex64>,
    raw: Vec<Complex64>,
    calibration: Complex64,
}

pub struct NoiseCaptureCoordinator<'a> {
    pub driver: &'a dyn ReadoutDriver,
    pub agent: &'a dyn CaptureAgent,
    pub reader: &'a dyn CaptureReader,
    pub settings: &'a AcquisitionSettings,
    pub traits: &'a DeviceTraits,
    pub transform: &'a CalibrationTransform,
}

impl NoiseCaptureCoordinator<'_> {
    fn calibration_path(&self, module: ModuleId) -> std::path::PathBuf {
        self.settings
            .noise
            .output_root
            .join(format!("zcal_{module}.json"))
    }

    /// Capture `duration` of noise on every requested channel.
    ///
    /// `perturbations` must hold one entry per module of the partition.
    pub async fn capture(
        &self,
        partition: &Partition,
        nco: &ModuleMap<f64>,
        perturbations: ModuleMap<TonePerturbation>,
        duration: Duration<Seconds>,
    ) -> Result<NoiseTimestreams> {
        let noise = &self.settings.noise;
        let run_path = noise.run_path();
        if run_path.exists() {
            return Err(Error::Precapture(run_path));
        }
        tokio::fs::create_dir_all(&noise.output_root)
            .await
            .with_context(|| {
                format!(
                    "Failed to create capture directory {}",
                    noise.output_root.display()
                )
            })?;

        let stage = noise.fir_stage;
        if stage < self.traits.lossless_fir_stage {
            warn!(
                "Packets will drop at FIR stage {}, use {} or higher",
                stage,
                self.traits.lossless_fir_stage
            );
        }
        self.driver.set_fir_stage(stage).await.on_device()?;
        let sample_rate = self.traits.fir_sample_rate(stage);
        let readback = self.driver.fir_stage().await.on_device()?;
        info!("FIR stage is {}, sampling at {:#}", readback, sample_rate);

        // Tones and calibration frames
        let mut work = vec![];
        for (module, perturbation) in perturbations {
            if partition.channels(module).is_empty() {
                self.driver
                    .clear_channels(module)
                    .await
                    .on_module(module)?;
                continue;
            }
            let center = nco.get(module).copied().ok_or_else(|| {
                Error::configuration(format!("NCO of module {module} is not set"))
            })?;
            let executor = ModuleSweepExecutor::new(
                self.driver,
                module,
                center,
                self.settings,
                self.transform,
            );
            work.push((module, (executor, perturbation)));
        }
        let mut written: ModuleMap<(ModuleSweepExecutor<'_>, Vec<f64>)> =
            fan_out(work, |module, (mut executor, mut perturbation)| async move {
                let frequencies = executor
                    .write_tones(partition.channels(module), &mut perturbation)
                    .await?;
                Ok((executor, frequencies))
            })
            .await?;
        tokio::time::sleep(self.settings.tone_settle().to_std()).await;
        let frames: ModuleMap<Vec<Complex64>> =
            fan_out(written.iter_mut(), |_, (executor, frequencies)| {
                executor.acquire_calibration_frame(frequencies.len())
            })
            .await?;
        for (module, frame) in frames.iter() {
            self.persist_calibration(module, frame).await?;
        }

        // Capture
        let sample_count =
            (sample_rate.value() * (duration + noise.sample_margin()).value()).max(0.0) as u64;
        let args = CaptureArgs {
            output_dir: run_path.clone(),
            interface: noise.interface.clone(),
            serial: self.settings.serial,
            sample_count,
        };
        diagnostic!("Capturing {} samples into {}", sample_count, run_path.display());
        self.agent.launch(&args).await.on_device()?;
        tokio::time::sleep((duration + noise.wait_margin()).to_std()).await;
        self.driver
            .set_fir_stage(self.settings.sweep_fir_stage)
            .await
            .on_device()?;

        // Import
        let mut per_module: ModuleMap<Vec<ChannelStream>> = ModuleMap::new();
        for (module, (executor, frequencies)) in written.iter() {
            let frame = frames
                .get(module)
                .ok_or_else(|| Error::new(format!("No calibration frame for module {module}")))?;
            let streams = self
                .reader
                .read_module(&run_path, self.settings.serial, module, frequencies.len())
                .await
                .on_module(module)?;
            if streams.len() != frequencies.len() {
                return Err(Error::protocol(
                    Some(module),
                    anyhow::anyhow!(
                        "Capture holds {} channels, expected {}",
                        streams.len(),
                        frequencies.len()
                    ),
                ));
            }
            let channels = streams
                .into_iter()
                .zip(frequencies)
                .zip(frame)
                .zip(executor.amplitudes())
                .map(|(((raw, &f), &cal), &a)| ChannelStream {
                    z: self.transform.apply_timestream(f, &raw, cal, a),
                    raw: raw.iter().map(|&r| self.transform.raw_volts(r)).collect(),
                    calibration: cal,
                })
                .collect();
            per_module.insert(module, channels);
        }
        let merged = partition.merge(per_module)?;
        let result = truncate(merged, sample_rate);

        if noise.delete_output {
            self.delete_artifacts(&run_path, frames.modules()).await?;
        }
        Ok(result)
    }

    async fn persist_calibration(&self, module: ModuleId, frame: &[Complex64]) -> Result<()> {
        let path = self.calibration_path(module);
        let json = serde_json::to_string(frame).context("Failed to encode calibration frame")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write calibration frame {}", path.display()))?;
        Ok(())
    }

    async fn delete_artifacts(
        &self,
        run_path: &std::path::Path,
        modules: impl Iterator<Item = ModuleId>,
    ) -> Result<()> {
        if run_path.exists() {
            tokio::fs::remove_dir_all(run_path)
                .await
                .with_context(|| format!("Failed to remove {}", run_path.display()))?;
        }
        for module in modules {
            let path = self.calibration_path(module);
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

fn truncate(channels: Vec<ChannelStream>, sample_rate: Frequency<Hertz>) -> NoiseTimestreams {
    let shortest = channels.iter().map(|c| c.z.len()).min().unwrap_or(0);
    let longest = channels.iter().map(|c| c.z.len()).max().unwrap_or(0);
    let length_mismatch = (shortest != longest).then(|| {
        warn!(
            "Channels captured between {} and {} samples, truncating to {}",
            shortest,
            longest,
            shortest
        );
        LengthMismatch { shortest, longest }
    });
    let mut result = NoiseTimestreams {
        sample_rate,
        z: Vec::with_capacity(channels.len()),
        raw: Vec::with_capacity(channels.len()),
        calibration: Vec::with_capacity(channels.len()),
        length_mismatch,
    };
    for mut channel in channels {
        channel.z.truncate(shortest);
        channel.raw.truncate(shortest);
        result.z.push(channel.z);
        result.raw.push(channel.raw);
        result.calibration.push(channel.calibration);
    }
    result
}
