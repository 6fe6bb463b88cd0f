// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter, Result as FormatterResult};

crate::quantity!(Power);

/// Power level in decibels relative to one milliwatt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DecibelMilliwatts;

impl Display for DecibelMilliwatts {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatterResult {
        write!(f, "dBm")
    }
}

pub const fn dbm<T>(value: T) -> Power<DecibelMilliwatts, T> {
    Power {
        value,
        unit: DecibelMilliwatts,
    }
}

/// Linear amplitude ratio of a level given in dB.
pub fn db_to_amplitude(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

impl Power<DecibelMilliwatts, f64> {
    /// Linear amplitude of the level, i.e. `10^(P/20)`.
    pub fn amplitude(self) -> f64 {
        db_to_amplitude(self.value)
    }

    /// Linear amplitude relative to a full-scale reference.
    ///
    /// A level equal to `full_scale` maps to 1.0.
    pub fn relative_to(self, full_scale: Self) -> f64 {
        db_to_amplitude(self.value - full_scale.value)
    }
}
