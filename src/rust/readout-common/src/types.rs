// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// Readout module (sub-band) identifier, in `1..=ModuleId::COUNT`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ModuleId(u8);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("modules must be in range [1, {max}], got {0}", max = ModuleId::COUNT)]
pub struct InvalidModule(pub u8);

impl ModuleId {
    pub const COUNT: u8 = 4;

    pub fn new(index: u8) -> Result<Self, InvalidModule> {
        if (1..=Self::COUNT).contains(&index) {
            Ok(ModuleId(index))
        } else {
            Err(InvalidModule(index))
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// All modules in ascending order.
    pub fn all() -> impl Iterator<Item = ModuleId> {
        (1..=Self::COUNT).map(ModuleId)
    }

    /// Index of the DAC/ADC pair serving this module.
    ///
    /// With the high analog bank selected, modules 1-4 are served by
    /// converters 5-8.
    pub const fn converter(self, bank: AnalogBank) -> u8 {
        match bank {
            AnalogBank::Low => self.0,
            AnalogBank::High => self.0 + Self::COUNT,
        }
    }
}

impl TryFrom<u8> for ModuleId {
    type Error = InvalidModule;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ModuleId::new(value)
    }
}

impl From<ModuleId> for u8 {
    fn from(value: ModuleId) -> Self {
        value.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data routing of a module's demodulator input.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Routing {
    /// Excitation comb fed straight back into the demodulator, bypassing the
    /// device under test.
    Loopback,
    /// Physical ADC input, i.e. the signal transmitted through the device.
    Normal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClockSource {
    /// Internal voltage-controlled crystal oscillator.
    Vcxo,
    /// External 10 MHz reference.
    #[default]
    Sma,
    Backplane,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalogBank {
    /// Modules 1-4 use converters 1-4.
    #[default]
    Low,
    /// Modules 1-4 use converters 5-8.
    High,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimestampPort {
    Backplane,
    Test,
    Sma,
    Gnss,
}
