// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter, Result as FormatterResult};

crate::quantity!(Frequency);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hertz;

impl Display for Hertz {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatterResult {
        write!(f, "Hz")
    }
}

pub const fn hertz<T>(value: T) -> Frequency<Hertz, T> {
    Frequency {
        value,
        unit: Hertz,
    }
}

impl Frequency<Hertz, f64> {
    /// Value in MHz, for log messages.
    pub fn megahertz(self) -> f64 {
        self.value * 1e-6
    }
}
