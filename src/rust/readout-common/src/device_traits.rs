// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use readout_units::{Frequency, Hertz, hertz};

/// Fixed properties of the readout board.
pub struct DeviceTraits {
    pub max_channels_per_module: usize,
    /// Maximum offset of a tone from its module's NCO.
    pub nco_bandwidth: Frequency<Hertz>,
    /// Highest NCO setting free of Nyquist reflections.
    pub max_nco_frequency: Frequency<Hertz>,
    pub comb_sampling_frequency: Frequency<Hertz>,
    /// Number of polyphase filter-bank bins across the comb sampling band.
    pub pfb_bins: u16,
    /// Tones closer than this above a bin multiple are pushed past it.
    pub bin_edge_threshold: Frequency<Hertz>,
    /// Half-width of the uniform jitter added to every tone frequency.
    pub tone_jitter: Frequency<Hertz>,
    /// Decimation of the demodulated stream at FIR stage 0.
    pub fir_base_decimation: u32,
    pub max_fir_stage: u8,
    /// Lowest FIR stage at which the packet stream is lossless.
    pub lossless_fir_stage: u8,
    /// Decimation of raw filter-bank samples.
    pub pfb_decimation: u32,
    /// Maximum tone offset from the NCO for raw filter-bank captures.
    pub fast_noise_bandwidth: Frequency<Hertz>,
    /// Bin limit handed to the filter-bank correction.
    pub fast_noise_bin_limit: Frequency<Hertz>,
    pub max_pfb_samples: usize,
    pub pfb_calibration_samples: usize,
    pub pfb_calibration_discard: usize,
    /// Digitizer scale: volts per readout count.
    pub volts_per_count: f64,
}

impl DeviceTraits {
    /// Width of one filter-bank bin.
    pub fn bin_width(&self) -> Frequency<Hertz> {
        self.comb_sampling_frequency / f64::from(self.pfb_bins)
    }

    /// Demodulated sample rate at the given FIR stage.
    pub fn fir_sample_rate(&self, fir_stage: u8) -> Frequency<Hertz> {
        let decimation = f64::from(self.fir_base_decimation) * 2f64.powi(i32::from(fir_stage));
        self.comb_sampling_frequency / decimation
    }

    /// Sample rate of raw filter-bank captures.
    pub fn pfb_sample_rate(&self) -> Frequency<Hertz> {
        self.comb_sampling_frequency / f64::from(self.pfb_decimation)
    }

    /// Bin center frequencies relative to the NCO, ascending.
    pub fn bin_centers(&self) -> impl Iterator<Item = f64> {
        let half = i32::from(self.pfb_bins / 2);
        let width = self.bin_width().value();
        (-half..half).map(move |i| f64::from(i) * width)
    }
}

pub const CRS_TRAITS: DeviceTraits = DeviceTraits {
    max_channels_per_module: 1024,
    nco_bandwidth: hertz(325e6),
    max_nco_frequency: hertz(2.5e9 - 325e6),
    comb_sampling_frequency: hertz(625e6),
    pfb_bins: 512,
    bin_edge_threshold: hertz(101.0),
    tone_jitter: hertz(50.0),
    fir_base_decimation: 256 * 64,
    max_fir_stage: 6,
    lossless_fir_stage: 5,
    pfb_decimation: 256,
    fast_noise_bandwidth: hertz(300e6),
    fast_noise_bin_limit: hertz(1.1e6),
    max_pfb_samples: 1_000_000,
    pfb_calibration_samples: 2100,
    pfb_calibration_discard: 100,
    volts_per_count: 1.3745425908439433e-7,
};
