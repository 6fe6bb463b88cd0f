// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub(crate) fn round_to_significant_digits(x: f64, n: u32) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        let order = x.abs().log10().floor();
        let scale = 10f64.powf((n as f64) - 1.0 - order);
        (x * scale).round() / scale
    }
}

/// Declare a quantity type tagged with a zero-sized unit.
///
/// The generated type supports the arithmetic needed for instrument settings:
/// addition and subtraction of like quantities, scaling by a plain number,
/// ordering, and a display form with the unit symbol appended.
#[macro_export]
macro_rules! quantity {
    ($ident:ident) => {
        /// A physical quantity tagged with its unit.
        ///
        /// # Type Parameter
        /// - `U`: The unit of the value, a zero-sized marker type
        /// - `T`: The underlying value (typically `f64`)
        #[derive(std::clone::Clone, std::marker::Copy, std::default::Default, core::fmt::Debug)]
        pub struct $ident<U, T = f64> {
            pub(crate) value: T,
            pub(crate) unit: U,
        }

        impl<U, T> $ident<U, T> {
            pub fn value(self) -> T {
                self.value
            }
        }

        impl<U, T: std::cmp::PartialEq> std::cmp::PartialEq for $ident<U, T> {
            fn eq(&self, other: &Self) -> bool {
                self.value == other.value
            }
        }

        impl<U, T: std::cmp::PartialOrd> std::cmp::PartialOrd for $ident<U, T> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                self.value.partial_cmp(&other.value)
            }
        }

        impl<U, T> std::ops::Add for $ident<U, T>
        where
            T: std::ops::Add<Output = T>,
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                $ident {
                    value: self.value + rhs.value,
                    unit: self.unit,
                }
            }
        }

        impl<U, T> std::ops::Sub for $ident<U, T>
        where
            T: std::ops::Sub<Output = T>,
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                $ident {
                    value: self.value - rhs.value,
                    unit: self.unit,
                }
            }
        }

        impl<U, T> std::ops::Mul<T> for $ident<U, T>
        where
            T: std::ops::Mul<T, Output = T>,
        {
            type Output = Self;

            fn mul(self, rhs: T) -> Self::Output {
                $ident {
                    value: self.value * rhs,
                    unit: self.unit,
                }
            }
        }

        impl<U, T> std::ops::Div<T> for $ident<U, T>
        where
            T: std::ops::Div<T, Output = T>,
        {
            type Output = Self;

            fn div(self, rhs: T) -> Self::Output {
                $ident {
                    value: self.value / rhs,
                    unit: self.unit,
                }
            }
        }

        impl<U, T> std::fmt::Display for $ident<U, T>
        where
            T: std::fmt::Display + num_traits::AsPrimitive<f64> + num_traits::Float,
            U: std::fmt::Display,
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if f.alternate() {
                    std::fmt::Display::fmt(&self.value, f)?;
                } else {
                    // Round slightly below epsilon so accumulated rounding errors do not
                    // show up in log messages.
                    let significand_digits = (-T::epsilon().log10() - T::one()).as_() as u32;
                    let value = $crate::unit::round_to_significant_digits(
                        self.value.as_(),
                        significand_digits,
                    );
                    std::fmt::Debug::fmt(&value, f)?;
                }
                write!(f, " ")?;
                self.unit.fmt(f)
            }
        }

        impl<T, U> From<T> for $ident<U, T>
        where
            T: num_traits::Float,
            U: std::default::Default,
        {
            fn from(value: T) -> Self {
                $ident {
                    value,
                    unit: U::default(),
                }
            }
        }

        impl<U> From<$ident<U, f64>> for f64 {
            fn from(value: $ident<U, f64>) -> Self {
                value.value
            }
        }
    };
}
