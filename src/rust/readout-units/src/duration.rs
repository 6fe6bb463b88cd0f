// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter, Result as FormatterResult};

crate::quantity!(Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seconds;

impl Display for Seconds {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatterResult {
        write!(f, "s")
    }
}

pub const fn seconds<T>(value: T) -> Duration<Seconds, T> {
    Duration {
        value,
        unit: Seconds,
    }
}

impl Duration<Seconds, f64> {
    /// Convert to a [`std::time::Duration`] for timers.
    ///
    /// Negative and non-finite values map to zero.
    pub fn to_std(self) -> std::time::Duration {
        if self.value.is_finite() && self.value > 0.0 {
            std::time::Duration::from_secs_f64(self.value)
        } else {
            std::time::Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let duration: Duration<Seconds> = 0.5.into();
        assert_eq!(duration.value(), 0.5);
        assert_eq!(seconds(0.5), duration);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", seconds(1e-6)), "1e-6 s");
        assert_eq!(format!("{}", seconds(1.1500000000000002e-6)), "1.15e-6 s");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(seconds(10.0) + seconds(20.0), seconds(30.0));
        assert_eq!(seconds(10.0) - seconds(2.5), seconds(7.5));
        assert_eq!(seconds(0.5) * 4.0, seconds(2.0));
        assert!(seconds(1.0) < seconds(2.0));
    }

    #[test]
    fn test_to_std() {
        assert_eq!(seconds(0.5).to_std(), std::time::Duration::from_millis(500));
        assert_eq!(seconds(-1.0).to_std(), std::time::Duration::ZERO);
        assert_eq!(seconds(f64::NAN).to_std(), std::time::Duration::ZERO);
    }
}
