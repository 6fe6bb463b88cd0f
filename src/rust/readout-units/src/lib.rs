// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Typed quantities for readout settings and device traits.
//!
//! # Examples
//! ```rust
//! use readout_units::duration::seconds;
//! use readout_units::power::dbm;
//!
//! let settle = seconds(0.5);
//! assert_eq!(settle.to_std(), std::time::Duration::from_millis(500));
//! assert!((dbm(1.0).relative_to(dbm(1.0)) - 1.0).abs() < 1e-12);
//! ```

pub mod duration;
pub mod frequency;
pub mod power;
#[doc(hidden)]
pub mod unit;

pub use duration::{Duration, Seconds, seconds};
pub use frequency::{Frequency, Hertz, hertz};
pub use power::{DecibelMilliwatts, Power, db_to_amplitude, dbm};
