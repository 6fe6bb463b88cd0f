// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Single-tone noise from raw filter-bank samples.
//!
//! Raw filter-bank samples are taken at the full bin rate, far above the
//! demodulated stream. The NCO is shifted for the duration of the capture so
//! that the tone sits on a bin center, where the bin response is flattest.
use anyhow::Context;
use num_complex::Complex64;
use readout_common::{DeviceTraits, ModuleId, Routing};
use readout_log::diagnostic;
use readout_units::{Duration, Frequency, Hertz, Seconds, db_to_amplitude};

use crate::calibration::CalibrationTransform;
use crate::command_batch::CommandBatch;
use crate::driver::ReadoutDriver;
use crate::error::ProtocolContext;
use crate::module_map::ModuleMap;
use crate::settings::AcquisitionSettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinPolicy {
    /// Half-width of the band kept around the tone.
    pub bin_limit: Frequency<Hertz>,
    /// Drop the spectrum outside of the bin limit.
    pub trim: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PfbSpectrum {
    pub frequencies: Vec<f64>,
    pub z: Vec<Complex64>,
}

/// Correction of the non-flat filter-bank bin response.
pub trait PfbCorrection: Send + Sync {
    fn correct(
        &self,
        samples: &[Complex64],
        nco_hz: f64,
        target_hz: f64,
        policy: &BinPolicy,
    ) -> anyhow::Result<PfbSpectrum>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FastNoise {
    pub module: ModuleId,
    pub sample_rate: Frequency<Hertz>,
    pub frequencies: Vec<f64>,
    pub z: Vec<Complex64>,
    /// Corrected spectrum in volts, without loopback or amplitude calibration.
    pub raw: Vec<Complex64>,
    /// Mean of the corrected loopback spectrum.
    pub calibration: Complex64,
}

/// Offset of `offset` from the nearest filter-bank bin center.
pub fn bin_center_offset(traits: &DeviceTraits, offset: f64) -> f64 {
    traits
        .bin_centers()
        .map(|center| offset - center)
        .fold(f64::INFINITY, |best, d| {
            if d.abs() < best.abs() { d } else { best }
        })
}

pub struct FastNoiseCapture<'a> {
    pub driver: &'a dyn ReadoutDriver,
    pub pfb: &'a dyn PfbCorrection,
    pub settings: &'a AcquisitionSettings,
    pub traits: &'a DeviceTraits,
    pub transform: &'a CalibrationTransform,
}

struct Tone {
    module: ModuleId,
    converter: u8,
    frequency: f64,
    amplitude_dbm: f64,
    nco: f64,
    samples: usize,
}

impl FastNoiseCapture<'_> {
    pub async fn capture(
        &self,
        nco: &ModuleMap<f64>,
        frequency: f64,
        amplitude_dbm: f64,
        duration: Duration<Seconds>,
    ) -> Result<FastNoise> {
        let mut nearest: Option<(ModuleId, f64)> = None;
        for (module, &center) in nco.iter() {
            if nearest.is_none_or(|(_, c)| (frequency - center).abs() < (frequency - c).abs()) {
                nearest = Some((module, center));
            }
        }
        let Some((module, original_nco)) = nearest else {
            return Err(Error::configuration("NCO frequencies are not set"));
        };
        let bandwidth = self.traits.fast_noise_bandwidth.value();
        let offset = (frequency - original_nco).abs();
        if offset.is_nan() || offset > bandwidth {
            return Err(Error::configuration(format!(
                "Frequency must be within {bandwidth} Hz of an NCO frequency, got {frequency} Hz"
            )));
        }
        let full_scale = self.settings.full_scale_dbm;
        if amplitude_dbm.is_nan() || amplitude_dbm > full_scale {
            return Err(Error::configuration(format!(
                "Amplitude {amplitude_dbm} dBm exceeds the full scale of {full_scale} dBm"
            )));
        }
        let sample_rate = self.traits.pfb_sample_rate();
        let samples = (duration.value() * sample_rate.value()).max(0.0) as usize;
        if samples == 0 || samples > self.traits.max_pfb_samples {
            return Err(Error::configuration(format!(
                "Capture of {duration} gives {samples} samples, the limit is {}",
                self.traits.max_pfb_samples
            )));
        }

        let shifted_nco = original_nco + bin_center_offset(self.traits, frequency - original_nco);
        let tone = Tone {
            module,
            converter: module.converter(self.settings.analog_bank),
            frequency,
            amplitude_dbm,
            nco: shifted_nco,
            samples,
        };
        diagnostic!(
            "Module {}: NCO moved from {} Hz to {} Hz for fast noise",
            module,
            original_nco,
            shifted_nco
        );
        let measured = self.measure(&tone).await;
        let restored = self.restore(&tone, original_nco).await;
        let noise = measured?;
        restored?;
        Ok(noise)
    }

    async fn measure(&self, tone: &Tone) -> Result<FastNoise> {
        let driver = self.driver;
        let module = tone.module;
        driver
            .set_nco_frequency(tone.nco, tone.converter)
            .await
            .on_module(module)?;
        driver.clear_channels(module).await.on_module(module)?;
        let mut batch = CommandBatch::new(driver, module);
        batch.set_frequency(tone.frequency - tone.nco, 1);
        batch.set_amplitude(
            db_to_amplitude(tone.amplitude_dbm - self.settings.full_scale_dbm),
            1,
        );
        batch.commit().await?;

        driver
            .set_routing(Routing::Normal, module)
            .await
            .on_module(module)?;
        tokio::time::sleep(self.settings.tone_settle().to_std()).await;
        let samples = driver
            .get_pfb_samples(tone.samples, module)
            .await
            .on_module(module)?;

        driver
            .set_routing(Routing::Loopback, module)
            .await
            .on_module(module)?;
        tokio::time::sleep(self.settings.loopback_settle().to_std()).await;
        let loopback = driver
            .get_pfb_samples(self.traits.pfb_calibration_samples, module)
            .await
            .on_module(module)?;
        driver
            .set_routing(Routing::Normal, module)
            .await
            .on_module(module)?;
        let discard = self.traits.pfb_calibration_discard;
        if loopback.len() <= discard {
            return Err(Error::protocol(
                Some(module),
                anyhow::anyhow!("Got {} loopback samples, {discard} are discarded", loopback.len()),
            ));
        }

        let policy = BinPolicy {
            bin_limit: self.traits.fast_noise_bin_limit,
            trim: true,
        };
        let spectrum = self
            .pfb
            .correct(&samples, tone.nco, tone.frequency, &policy)
            .context("Filter-bank correction failed")?;
        let reference = self
            .pfb
            .correct(&loopback[discard..], tone.nco, tone.frequency, &policy)
            .context("Filter-bank correction of the loopback failed")?;
        if reference.z.is_empty() {
            return Err(Error::new("Filter-bank correction of the loopback is empty"));
        }
        let calibration =
            reference.z.iter().sum::<Complex64>() / reference.z.len() as f64;
        let z = spectrum
            .z
            .iter()
            .map(|&r| {
                self.transform
                    .apply(tone.frequency, r, calibration, tone.amplitude_dbm)
            })
            .collect();
        let raw = spectrum
            .z
            .iter()
            .map(|&r| self.transform.raw_volts(r))
            .collect();
        Ok(FastNoise {
            module,
            sample_rate: self.traits.pfb_sample_rate(),
            frequencies: spectrum.frequencies,
            z,
            raw,
            calibration,
        })
    }

    async fn restore(&self, tone: &Tone, original_nco: f64) -> Result<()> {
        self.driver
            .set_nco_frequency(original_nco, tone.converter)
            .await
            .on_module(tone.module)?;
        self.driver
            .clear_channels(tone.module)
            .await
            .on_module(tone.module)
    }
}

#[cfg(test)]
mod tests {
    use readout_common::CRS_TRAITS;
    use readout_units::seconds;

    use super::*;
    use crate::driver::Command;
    use crate::testing::{Call, LOOPBACK_SAMPLE, MockDriver, MockPfb};

    fn module(index: u8) -> ModuleId {
        ModuleId::new(index).unwrap()
    }

    fn nco() -> ModuleMap<f64> {
        [(module(1), 5e8), (module(2), 1.2e9)].into_iter().collect()
    }

    #[test]
    fn test_bin_center_offset() {
        let width = CRS_TRAITS.bin_width().value();
        assert_eq!(bin_center_offset(&CRS_TRAITS, 3.0 * width + 10.0), 10.0);
        assert_eq!(bin_center_offset(&CRS_TRAITS, -2.0 * width - 10.0), -10.0);
        assert_eq!(bin_center_offset(&CRS_TRAITS, 0.0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_noise() {
        let driver = MockDriver::default();
        let pfb = MockPfb::default();
        let settings = AcquisitionSettings {
            splitter: false,
            ..Default::default()
        };
        let transform = CalibrationTransform::new(1.0, seconds(0.0), None);
        let capture = FastNoiseCapture {
            driver: &driver,
            pfb: &pfb,
            settings: &settings,
            traits: &CRS_TRAITS,
            transform: &transform,
        };
        let width = CRS_TRAITS.bin_width().value();
        let frequency = 1.2e9 + 5.0 * width + 1000.0;
        let noise = capture
            .capture(&nco(), frequency, -10.0, seconds(1e-3))
            .await
            .unwrap();
        assert_eq!(noise.module, module(2));
        assert_eq!(noise.z.len(), 2441);
        assert_eq!(noise.calibration, LOOPBACK_SAMPLE);
        // i * 201 counts through the device, corrected to 201 / 10^(-10 / 20).
        let expected = 201.0 / db_to_amplitude(-10.0);
        assert!((noise.z[0] - Complex64::new(expected, 0.0)).norm() < 1e-9);

        let calls = driver.calls();
        assert_eq!(calls[0], Call::SetNco { hz: 1.2e9 + 1000.0, converter: 2 });
        let Call::Execute(commands) = &calls[2] else {
            panic!("expected a batch, got {:?}", calls[2]);
        };
        let Command::SetFrequency { offset_hz, .. } = commands[0] else {
            panic!("expected a frequency");
        };
        assert!((offset_hz - 5.0 * width).abs() < 1e-6);
        assert!(calls.contains(&Call::GetPfbSamples {
            count: 2441,
            module: module(2)
        }));
        assert!(calls.contains(&Call::GetPfbSamples {
            count: 2100,
            module: module(2)
        }));
        let n = calls.len();
        assert_eq!(calls[n - 2], Call::SetNco { hz: 1.2e9, converter: 2 });
        assert_eq!(calls[n - 1], Call::ClearChannels(module(2)));
        assert_eq!(driver.nco(2), Some(1.2e9));

        let pfb_calls = pfb.calls();
        assert_eq!(pfb_calls.len(), 2);
        assert_eq!(pfb_calls[1].0, 2000);
        assert_eq!(pfb_calls[1].1, 1.2e9 + 1000.0);
        assert_eq!(pfb_calls[1].3.bin_limit.value(), 1.1e6);
        assert!(pfb_calls[1].3.trim);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_nco_on_failure() {
        let driver = MockDriver::default();
        let pfb = MockPfb::default();
        let settings = AcquisitionSettings::default();
        let transform = CalibrationTransform::new(1.0, seconds(0.0), None);
        let capture = FastNoiseCapture {
            driver: &driver,
            pfb: &pfb,
            settings: &settings,
            traits: &CRS_TRAITS,
            transform: &transform,
        };
        // Module 1 fails every module-addressed call; NCO calls still succeed.
        driver.fail_module(module(1));
        let err = capture
            .capture(&nco(), 5.1e8, -10.0, seconds(1e-3))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Command on module 1 failed");
        assert_eq!(driver.nco(1), Some(5e8));
        assert!(pfb.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation() {
        let driver = MockDriver::default();
        let pfb = MockPfb::default();
        let settings = AcquisitionSettings::default();
        let transform = CalibrationTransform::new(1.0, seconds(0.0), None);
        let capture = FastNoiseCapture {
            driver: &driver,
            pfb: &pfb,
            settings: &settings,
            traits: &CRS_TRAITS,
            transform: &transform,
        };
        for (frequency, amplitude, duration) in [
            (8.1e8, -10.0, 1e-3),
            (5.1e8, 2.0, 1e-3),
            (5.1e8, -10.0, 1.0),
            (5.1e8, -10.0, 0.0),
        ] {
            let err = capture
                .capture(&nco(), frequency, amplitude, seconds(duration))
                .await
                .unwrap_err();
            assert!(err.is_configuration());
        }
        assert!(
            capture
                .capture(&ModuleMap::new(), 5e8, -10.0, seconds(1e-3))
                .await
                .is_err()
        );
        assert!(driver.calls().is_empty());
    }
}
