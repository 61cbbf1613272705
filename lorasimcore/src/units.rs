use std::{
    cmp::Ordering,
    fmt::Display,
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
};

use serde::{Deserialize, Serialize};

/// Same unit on both sides, e.g. `Time + Time`.
macro_rules! closed_ops {
    ($name: ident, $($trait: ident $method: ident $op: tt),+) => {
        $(
            impl $trait for $name {
                type Output = $name;

                fn $method(self, rhs: Self) -> Self::Output {
                    $name(self.0 $op rhs.0)
                }
            }
        )+
    };
}

/// Scaling by a plain float, e.g. `Time * 2.0` and `2.0 * Time`.
macro_rules! scalar_ops {
    ($name: ident) => {
        impl Mul<f64> for $name {
            type Output = $name;

            fn mul(self, rhs: f64) -> Self::Output {
                $name(self.0 * rhs)
            }
        }

        impl Mul<$name> for f64 {
            type Output = $name;

            fn mul(self, rhs: $name) -> Self::Output {
                $name(self * rhs.0)
            }
        }

        impl Div<f64> for $name {
            type Output = $name;

            fn div(self, rhs: f64) -> Self::Output {
                $name(self.0 / rhs)
            }
        }

        /// Ratio of two quantities of the same unit.
        impl Div for $name {
            type Output = f64;

            fn div(self, rhs: Self) -> Self::Output {
                self.0 / rhs.0
            }
        }
    };
}

/// An `f64` newtype for one physical unit.
macro_rules! quantity {
    ($name: ident) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
        pub struct $name(f64);

        impl From<f64> for $name {
            fn from(value: f64) -> Self {
                $name(value)
            }
        }

        impl From<$name> for f64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        closed_ops!($name, Add add +, Sub sub -);
        scalar_ops!($name);

        impl Neg for $name {
            type Output = $name;

            fn neg(self) -> Self::Output {
                $name(-self.0)
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold($name(0.0), |a, b| a + b)
            }
        }

        impl $name {
            #[inline]
            pub fn map<F>(self, f: F) -> Self
            where
                F: FnOnce(f64) -> f64,
            {
                Self(f(self.0))
            }

            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            /// Total ordering of the underlying float, see [`f64::total_cmp`].
            pub fn total_cmp(&self, other: &Self) -> Ordering {
                self.0.total_cmp(&other.0)
            }
        }
    };
}

/// `cycles / Frequency = Time`, used for symbol durations.
impl Div<Frequency> for f64 {
    type Output = Time;

    fn div(self, rhs: Frequency) -> Self::Output {
        Time(self / rhs.0)
    }
}

quantity!(Time);

pub const HOURS: Time = Time::from_seconds(60.0 * 60.0);
pub const MINS: Time = Time::from_seconds(60.0);
pub const SECONDS: Time = Time::from_seconds(1.0);
impl Time {
    pub const ZERO: Time = Time(0.0);

    pub const fn from_seconds(n: f64) -> Self {
        Time(n)
    }

    pub const fn from_milis(n: f64) -> Self {
        Time(n / 1000.0)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn milis(self) -> f64 {
        self.0 * 1000.0
    }

    /// Inclusive on both ends.
    pub fn within(self, start: Time, stop: Time) -> bool {
        self >= start && self <= stop
    }
}

quantity!(Frequency);

impl Frequency {
    #[allow(non_snake_case)]
    pub const fn from_MHz(n: f64) -> Self {
        Frequency(n * 1000.0 * 1000.0)
    }

    #[allow(non_snake_case)]
    pub const fn from_kHz(n: f64) -> Self {
        Frequency(n * 1000.0)
    }

    #[allow(non_snake_case)]
    pub fn MHz(self) -> f64 {
        self.0 / (1000.0 * 1000.0)
    }

    /// Channel frequencies are compared to the nearest Hz.
    pub fn same_channel(self, other: Frequency) -> bool {
        (self.0 - other.0).abs() < 1.0
    }
}
