// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod device_traits;
pub mod types;

pub use device_traits::{CRS_TRAITS, DeviceTraits};
pub use types::{AnalogBank, ClockSource, InvalidModule, ModuleId, Routing, TimestampPort};
