// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Interface of the remote readout board.
//!
//! The RPC transport and its session handling live outside this crate. The
//! acquisition code only relies on the calls below. Converter-addressed calls
//! (DAC scale, NCO) take the converter index, which depends on the selected
//! analog bank; every other call takes the module.
use async_trait::async_trait;
use num_complex::Complex64;
use readout_common::{AnalogBank, ClockSource, ModuleId, Routing, TimestampPort};

use crate::{Error, Result};

/// Channel setter that can be batched into one atomic device call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Tone frequency relative to the module's NCO.
    SetFrequency {
        offset_hz: f64,
        channel: u16,
        module: ModuleId,
    },
    /// DAC amplitude relative to full scale, in `[0, 1]`.
    SetAmplitude {
        normalized: f64,
        channel: u16,
        module: ModuleId,
    },
}

impl Command {
    pub fn module(&self) -> ModuleId {
        match self {
            Command::SetFrequency { module, .. } | Command::SetAmplitude { module, .. } => *module,
        }
    }
}

/// Demodulated samples of all channels of one module.
///
/// `i[channel][sample]` and `q[channel][sample]`, in readout counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleFrame {
    pub i: Vec<Vec<f64>>,
    pub q: Vec<Vec<f64>>,
}

impl SampleFrame {
    /// Mean complex sample of the first `channels` channels, skipping `discard`
    /// leading samples.
    pub fn channel_means(&self, channels: usize, discard: usize) -> Result<Vec<Complex64>> {
        if self.i.len() < channels || self.q.len() < channels {
            return Err(Error::new(format!(
                "Expected samples for {channels} channels, got {} I and {} Q",
                self.i.len(),
                self.q.len()
            )));
        }
        self.i
            .iter()
            .zip(&self.q)
            .take(channels)
            .enumerate()
            .map(|(channel, (i, q))| {
                let n = i.len().min(q.len());
                if n <= discard {
                    return Err(Error::new(format!(
                        "Channel {} returned {n} samples, {discard} are discarded",
                        channel + 1
                    )));
                }
                let sum = i[discard..n]
                    .iter()
                    .zip(&q[discard..n])
                    .fold(Complex64::new(0.0, 0.0), |acc, (&re, &im)| {
                        acc + Complex64::new(re, im)
                    });
                Ok(sum / (n - discard) as f64)
            })
            .collect()
    }
}

#[async_trait]
pub trait ReadoutDriver: Send + Sync {
    /// Establish the session with the board.
    async fn resolve(&self) -> anyhow::Result<()>;

    async fn timestamp_port(&self) -> anyhow::Result<TimestampPort>;
    async fn set_timestamp_port(&self, port: TimestampPort) -> anyhow::Result<()>;

    async fn set_clock_source(&self, source: ClockSource) -> anyhow::Result<()>;
    async fn clock_source(&self) -> anyhow::Result<ClockSource>;

    async fn set_analog_bank(&self, bank: AnalogBank) -> anyhow::Result<()>;

    async fn set_dac_scale(&self, dbm: f64, converter: u8) -> anyhow::Result<()>;
    async fn set_nco_frequency(&self, hz: f64, converter: u8) -> anyhow::Result<()>;
    async fn nco_frequency(&self, converter: u8) -> anyhow::Result<f64>;

    async fn set_routing(&self, routing: Routing, module: ModuleId) -> anyhow::Result<()>;

    /// Switch off every channel of the module.
    async fn clear_channels(&self, module: ModuleId) -> anyhow::Result<()>;

    /// Apply the commands as one atomic batch.
    async fn execute(&self, commands: Vec<Command>) -> anyhow::Result<()>;

    async fn get_samples(&self, count: usize, module: ModuleId) -> anyhow::Result<SampleFrame>;

    /// Raw filter-bank samples of the first channel of the module.
    async fn get_pfb_samples(
        &self,
        count: usize,
        module: ModuleId,
    ) -> anyhow::Result<Vec<Complex64>>;

    async fn set_fir_stage(&self, stage: u8) -> anyhow::Result<()>;
    async fn fir_stage(&self) -> anyhow::Result<u8>;
}
