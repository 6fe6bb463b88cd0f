// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Multiplexed resonator readout acquisition.
//!
//! Tones are assigned to the readout module whose NCO covers them, written in
//! atomic command batches, swept point by point against a loopback reference,
//! and returned calibrated in the order the caller requested them. Noise
//! timestreams are captured through an external packet parser.

pub mod calibration;
pub mod capture_agent;
pub mod command_batch;
mod dispatch;
pub mod driver;
pub mod error;
pub mod fast_noise;
pub mod module_map;
pub mod noise;
pub mod partition;
pub mod perturb;
pub mod session;
pub mod settings;
pub mod sweep;
pub mod sweep_shapes;
#[cfg(test)]
mod testing;

pub use calibration::CalibrationTransform;
pub use capture_agent::{CaptureAgent, CaptureArgs, CaptureReader, ExternalParser};
pub use driver::{Command, ReadoutDriver, SampleFrame};
pub use error::{Error, Result};
pub use fast_noise::{BinPolicy, FastNoise, PfbCorrection, PfbSpectrum};
pub use module_map::ModuleMap;
pub use noise::{LengthMismatch, NoiseTimestreams};
pub use partition::{ChannelRequest, Partition, PartitionLimits, partition};
pub use session::{AcquisitionSession, FullSweep, SweepResult};
pub use settings::{AcquisitionSettings, NoiseSettings, SanitizationChange};
pub use sweep_shapes::SweepPlan;
