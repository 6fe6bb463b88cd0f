// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Top-level acquisition entry point.
//!
//! A session owns the driver, the NCO table and the settings. Every
//! acquisition call partitions the request, dispatches the work of all modules
//! concurrently and returns the results in request order. Acquisitions take
//! `&mut self`, so only one is in flight at a time.
use num_complex::Complex64;
use readout_common::{CRS_TRAITS, DeviceTraits, ModuleId, Routing, TimestampPort};
use readout_log::{info, warn};
use readout_units::{Duration, Seconds};

use crate::calibration::CalibrationTransform;
use crate::capture_agent::{CaptureAgent, CaptureReader, ExternalParser};
use crate::dispatch::fan_out;
use crate::driver::ReadoutDriver;
use crate::error::ProtocolContext;
use crate::fast_noise::{FastNoise, FastNoiseCapture, PfbCorrection};
use crate::module_map::ModuleMap;
use crate::noise::{NoiseCaptureCoordinator, NoiseTimestreams};
use crate::partition::{
    ChannelRequest, Partition, PartitionLimits, partition, sweep_requests, tone_requests,
};
use crate::perturb::TonePerturbation;
use crate::settings::AcquisitionSettings;
use crate::sweep::{ChannelSweep, ModuleSweepExecutor};
use crate::sweep_shapes::{SweepPlan, linspace};
use crate::{Error, Result};

/// Half-width of the band covered by [`AcquisitionSession::sweep_full`].
const FULL_SWEEP_HALF_SPAN: f64 = 300e6;
/// Distance kept between the outermost full-sweep channel and the band edge.
const FULL_SWEEP_EDGE_MARGIN: f64 = 10.0;
/// Overlap added to every full-sweep channel span.
const FULL_SWEEP_OVERLAP: f64 = 200.0;

/// Sweep data in request order, one row per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepResult {
    pub frequencies: Vec<Vec<f64>>,
    pub z: Vec<Vec<Complex64>>,
    /// Samples through the device under test, in volts.
    pub raw: Vec<Vec<Complex64>>,
    /// Loopback references, in readout counts.
    pub calibration: Vec<Vec<Complex64>>,
}

impl FromIterator<ChannelSweep> for SweepResult {
    fn from_iter<I: IntoIterator<Item = ChannelSweep>>(iter: I) -> Self {
        let mut result = SweepResult::default();
        for channel in iter {
            result.frequencies.push(channel.frequencies);
            result.z.push(channel.z);
            result.raw.push(channel.raw);
            result.calibration.push(channel.calibration);
        }
        result
    }
}

/// Full-band sweep flattened into ascending frequency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullSweep {
    pub frequencies: Vec<f64>,
    pub z: Vec<Complex64>,
}

pub struct AcquisitionSession<D> {
    driver: D,
    settings: AcquisitionSettings,
    traits: &'static DeviceTraits,
    transform: CalibrationTransform,
    nco: ModuleMap<f64>,
    perturbation: TonePerturbation,
    agent: Box<dyn CaptureAgent>,
    reader: Option<Box<dyn CaptureReader>>,
    pfb: Option<Box<dyn PfbCorrection>>,
}

/// Independent perturbation per module, forked in module order.
fn fork_per_module(
    perturbation: &mut TonePerturbation,
    modules: impl Iterator<Item = ModuleId>,
) -> ModuleMap<TonePerturbation> {
    modules.map(|module| (module, perturbation.fork())).collect()
}

impl<D: ReadoutDriver> AcquisitionSession<D> {
    pub fn new(driver: D, mut settings: AcquisitionSettings) -> Self {
        let traits = &CRS_TRAITS;
        for change in settings.sanitize(traits) {
            warn!(
                "Setting '{}' changed from {} to {}: {}",
                change.field,
                change.original,
                change.sanitized,
                change.reason
            );
        }
        AcquisitionSession {
            driver,
            transform: CalibrationTransform::from_settings(&settings, traits),
            perturbation: TonePerturbation::new(traits, settings.perturbation_seed),
            agent: Box::new(ExternalParser::new(settings.noise.parser_path.clone())),
            settings,
            traits,
            nco: ModuleMap::new(),
            reader: None,
            pfb: None,
        }
    }

    pub fn with_capture_agent(mut self, agent: impl CaptureAgent + 'static) -> Self {
        self.agent = Box::new(agent);
        self
    }

    pub fn with_capture_reader(mut self, reader: impl CaptureReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn with_pfb_correction(mut self, pfb: impl PfbCorrection + 'static) -> Self {
        self.pfb = Some(Box::new(pfb));
        self
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// NCO frequencies as read back from the device.
    pub fn nco_table(&self) -> &ModuleMap<f64> {
        &self.nco
    }

    fn limits(&self) -> PartitionLimits {
        PartitionLimits::new(self.traits, &self.settings)
    }

    /// Resolve the board and apply the clocking, bank and DAC scale settings.
    pub async fn configure_system(&mut self) -> Result<()> {
        let driver = &self.driver;
        driver.resolve().await.on_device()?;
        if driver.timestamp_port().await.on_device()? != TimestampPort::Test {
            driver
                .set_timestamp_port(TimestampPort::Test)
                .await
                .on_device()?;
        }
        driver
            .set_clock_source(self.settings.clock_source)
            .await
            .on_device()?;
        let bank = self.settings.analog_bank;
        driver.set_analog_bank(bank).await.on_device()?;
        for module in ModuleId::all() {
            driver
                .set_routing(Routing::Normal, module)
                .await
                .on_module(module)?;
            driver
                .set_dac_scale(self.settings.full_scale_dbm, module.converter(bank))
                .await
                .on_module(module)?;
        }
        tokio::time::sleep(self.settings.configure_settle().to_std()).await;
        let clock = driver.clock_source().await.on_device()?;
        info!(
            "System configured, clock source is {:?}, full scale is {}",
            clock,
            self.settings.full_scale()
        );
        Ok(())
    }

    /// Program NCO frequencies, given as `(module, hertz)` pairs.
    ///
    /// All entries are validated before the first one is written. The table
    /// keeps the values read back from the device; modules not named keep
    /// their previous setting.
    pub async fn set_nco(&mut self, table: impl IntoIterator<Item = (u8, f64)>) -> Result<()> {
        let max = self.traits.max_nco_frequency.value();
        let bin_width = self.traits.bin_width().value();
        let threshold = self.traits.bin_edge_threshold.value();
        let mut requested: ModuleMap<f64> = ModuleMap::new();
        for (module, hz) in table {
            let module = ModuleId::new(module)?;
            if !hz.is_finite() || hz <= 0.0 {
                return Err(Error::configuration(format!(
                    "NCO of module {module} must be a positive frequency, got {hz}"
                )));
            }
            if hz > max {
                return Err(Error::configuration(format!(
                    "NCOs must not exceed {max} Hz to avoid Nyquist reflections, got {hz} Hz for module {module}"
                )));
            }
            let offset = hz.rem_euclid(bin_width);
            if offset < threshold || bin_width - offset < threshold {
                return Err(Error::configuration(format!(
                    "NCO {hz} Hz of module {module} is within {threshold} Hz of a filter-bank bin edge"
                )));
            }
            requested.insert(module, hz);
        }
        let driver = &self.driver;
        let bank = self.settings.analog_bank;
        let readback = fan_out(requested, |module, hz| async move {
            let converter = module.converter(bank);
            driver
                .set_nco_frequency(hz, converter)
                .await
                .on_module(module)?;
            driver.nco_frequency(converter).await.on_module(module)
        })
        .await?;
        for (module, hz) in readback {
            info!("Module {} NCO is {:.6} MHz", module, hz * 1e-6);
            self.nco.insert(module, hz);
        }
        Ok(())
    }

    fn partition(&self, requests: &[ChannelRequest]) -> Result<Partition> {
        partition(&self.nco, requests, &self.limits())
    }

    /// Write one tone per channel. Returns the written frequencies in request
    /// order. Modules without tones are cleared.
    pub async fn write_tones(
        &mut self,
        frequencies: &[f64],
        amplitudes_dbm: &[f64],
    ) -> Result<Vec<f64>> {
        let partition = self.partition(&tone_requests(frequencies, amplitudes_dbm)?)?;
        let perturbations = fork_per_module(&mut self.perturbation, partition.modules().modules());
        let driver: &dyn ReadoutDriver = &self.driver;
        let settings = &self.settings;
        let transform = &self.transform;
        let nco = &self.nco;
        let partition = &partition;
        let written = fan_out(perturbations, |module, mut perturbation| async move {
            let channels = partition.channels(module);
            if channels.is_empty() {
                driver.clear_channels(module).await.on_module(module)?;
                return Ok(vec![]);
            }
            let center = nco.get(module).copied().unwrap_or_default();
            let mut executor =
                ModuleSweepExecutor::new(driver, module, center, settings, transform);
            executor.write_tones(channels, &mut perturbation).await
        })
        .await?;
        partition.merge(written)
    }

    /// Sweep every channel over its own frequencies.
    ///
    /// `frequencies[channel]` lists the points of one channel; all channels
    /// must have the same number of points.
    pub async fn sweep(
        &mut self,
        frequencies: &[Vec<f64>],
        amplitudes_dbm: &[f64],
    ) -> Result<SweepResult> {
        let partition = self.partition(&sweep_requests(frequencies, amplitudes_dbm)?)?;
        let perturbations = fork_per_module(&mut self.perturbation, partition.modules().modules());
        let driver: &dyn ReadoutDriver = &self.driver;
        driver
            .set_fir_stage(self.settings.sweep_fir_stage)
            .await
            .on_device()?;
        let settings = &self.settings;
        let transform = &self.transform;
        let nco = &self.nco;
        let partition = &partition;
        let work = perturbations
            .into_iter()
            .filter(|(module, _)| !partition.channels(*module).is_empty());
        let sweeps = fan_out(work, |module, mut perturbation| async move {
            let center = nco.get(module).copied().unwrap_or_default();
            let mut executor =
                ModuleSweepExecutor::new(driver, module, center, settings, transform);
            executor
                .sweep(partition.channels(module), &mut perturbation)
                .await
        })
        .await?;
        Ok(partition.merge(sweeps)?.into_iter().collect())
    }

    pub async fn sweep_plan(
        &mut self,
        plan: &SweepPlan,
        amplitudes_dbm: &[f64],
    ) -> Result<SweepResult> {
        let frequencies = plan.frequencies()?;
        self.sweep(&frequencies, amplitudes_dbm).await
    }

    /// Sweep a span of `bandwidth` around every center, with the configured
    /// number of points.
    pub async fn sweep_linear(
        &mut self,
        centers: &[f64],
        amplitudes_dbm: &[f64],
        bandwidth: f64,
    ) -> Result<SweepResult> {
        let plan = SweepPlan::Linear {
            centers: centers.to_vec(),
            bandwidth,
            points: self.settings.sweep_points,
        };
        self.sweep_plan(&plan, amplitudes_dbm).await
    }

    /// Sweep a span of `center / q` around every center.
    pub async fn sweep_qres(
        &mut self,
        centers: &[f64],
        amplitudes_dbm: &[f64],
        q: &[f64],
    ) -> Result<SweepResult> {
        let plan = SweepPlan::QualityFactor {
            centers: centers.to_vec(),
            q: q.to_vec(),
            points: self.settings.sweep_points,
        };
        self.sweep_plan(&plan, amplitudes_dbm).await
    }

    /// Sweep the whole band around every configured NCO with adjacent channels.
    pub async fn sweep_full(&mut self, amplitude_dbm: f64) -> Result<FullSweep> {
        let channels = self.traits.max_channels_per_module;
        let points = self.settings.sweep_points;
        let width = 2.0 * FULL_SWEEP_HALF_SPAN / channels as f64 + FULL_SWEEP_OVERLAP;
        let spacing = width / points as f64;
        let centers: Vec<f64> = self
            .nco
            .values()
            .flat_map(|&nco| {
                linspace(
                    nco - FULL_SWEEP_HALF_SPAN + FULL_SWEEP_EDGE_MARGIN + width,
                    nco + FULL_SWEEP_HALF_SPAN - FULL_SWEEP_EDGE_MARGIN - width,
                    channels,
                )
            })
            .collect();
        let amplitudes = vec![amplitude_dbm; centers.len()];
        let sweep = self
            .sweep_linear(&centers, &amplitudes, width - spacing)
            .await?;
        let mut points: Vec<(f64, Complex64)> = sweep
            .frequencies
            .into_iter()
            .flatten()
            .zip(sweep.z.into_iter().flatten())
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (frequencies, z) = points.into_iter().unzip();
        Ok(FullSweep { frequencies, z })
    }

    /// Capture noise timestreams on every channel through the packet parser.
    pub async fn capture_noise(
        &mut self,
        frequencies: &[f64],
        amplitudes_dbm: &[f64],
        duration: Duration<Seconds>,
    ) -> Result<NoiseTimestreams> {
        let partition = self.partition(&tone_requests(frequencies, amplitudes_dbm)?)?;
        let Some(reader) = self.reader.as_deref() else {
            return Err(Error::configuration(
                "Noise capture requires a capture reader",
            ));
        };
        let perturbations = fork_per_module(&mut self.perturbation, partition.modules().modules());
        let coordinator = NoiseCaptureCoordinator {
            driver: &self.driver,
            agent: &*self.agent,
            reader,
            settings: &self.settings,
            traits: self.traits,
            transform: &self.transform,
        };
        coordinator
            .capture(&partition, &self.nco, perturbations, duration)
            .await
    }

    /// Capture raw filter-bank noise of a single tone.
    pub async fn capture_fast_noise(
        &mut self,
        frequency: f64,
        amplitude_dbm: f64,
        duration: Duration<Seconds>,
    ) -> Result<FastNoise> {
        let Some(pfb) = self.pfb.as_deref() else {
            return Err(Error::configuration(
                "Fast noise requires a filter-bank correction",
            ));
        };
        let capture = FastNoiseCapture {
            driver: &self.driver,
            pfb,
            settings: &self.settings,
            traits: self.traits,
            transform: &self.transform,
        };
        capture
            .capture(&self.nco, frequency, amplitude_dbm, duration)
            .await
    }
}
