//! The two timestamp domains that must never be conflated: the server's
//! monotonic counter since its process start, and the client's own
//! monotonic clock since its process start. Keeping them as distinct
//! newtypes turns that conflation bug into a type
//! error instead of a silent "very late" misclassification.

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Microseconds in the server's domain: a monotonic counter whose origin
/// is the server's process start. Never Unix time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerMicros(pub i64);

/// Microseconds in the client's own monotonic domain, since client
/// process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalMicros(pub i64);

macro_rules! impl_micros_ops {
    ($ty:ident) => {
        impl $ty {
            pub const fn new(micros: i64) -> Self {
                Self(micros)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl Sub for $ty {
            type Output = i64;

            fn sub(self, rhs: Self) -> i64 {
                self.0 - rhs.0
            }
        }

        impl Add<i64> for $ty {
            type Output = Self;

            fn add(self, rhs: i64) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl Sub<i64> for $ty {
            type Output = Self;

            fn sub(self, rhs: i64) -> Self {
                Self(self.0 - rhs)
            }
        }
    };
}

impl_micros_ops!(ServerMicros);
impl_micros_ops!(LocalMicros);
