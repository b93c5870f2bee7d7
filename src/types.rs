// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::fmt;

/// Serial number comparison, see <https://datatracker.ietf.org/doc/html/rfc1982#section-3.2>.
///
/// Two values exactly half the number space apart are undefined by the RFC; they compare as
/// `Greater` here so that the ordering stays antisymmetric for everything else.
macro_rules! cmp_serial {
    ($a: expr, $b: expr, $half: expr) => {{
        let (a, b) = ($a, $b);
        if a == b {
            Ordering::Equal
        } else if (a < b && (b - a) < $half) || (a > b && (a - b) > $half) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }};
}

/// Defines a wrapping sequence number type that compares using serial number arithmetic.
macro_rules! serial_number {
    ($(#[$meta: meta])* $name: ident, $inner: ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
        pub struct $name(pub $inner);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                cmp_serial!(self.0, other.0, 1 << (<$inner>::BITS - 1))
            }
        }

        impl std::ops::Add<$inner> for $name {
            type Output = $name;

            #[inline]
            fn add(self, rhs: $inner) -> $name {
                $name(self.0.wrapping_add(rhs))
            }
        }

        impl std::ops::Sub<$inner> for $name {
            type Output = $name;

            #[inline]
            fn sub(self, rhs: $inner) -> $name {
                $name(self.0.wrapping_sub(rhs))
            }
        }

        impl std::ops::AddAssign<$inner> for $name {
            fn add_assign(&mut self, rhs: $inner) {
                self.0 = self.0.wrapping_add(rhs);
            }
        }

        impl std::ops::SubAssign<$inner> for $name {
            fn sub_assign(&mut self, rhs: $inner) {
                self.0 = self.0.wrapping_sub(rhs);
            }
        }

        impl $name {
            /// Returns the absolute number of steps between `self` and `other`.
            pub fn distance_to(self, other: $name) -> $inner {
                if self > other {
                    self.0.wrapping_sub(other.0)
                } else {
                    other.0.wrapping_sub(self.0)
                }
            }
        }
    };
}

serial_number!(
    /// Transmission Sequence Number (TSN)
    Tsn,
    u32
);

serial_number!(
    /// Stream Sequence Number (SSN)
    Ssn,
    u16
);

impl Tsn {
    /// Returns how far `self` is after `base`, or `None` if it's not after it. Used to compute the
    /// 16-bit gap ack block offsets relative to a cumulative TSN ack.
    pub fn offset_from(self, base: Tsn) -> Option<u32> {
        (self > base).then(|| self.0.wrapping_sub(base.0))
    }
}

/// Identifies a message handed to the send queue, so that all of its fragments can be found when
/// it's abandoned.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OutgoingMessageId(pub u64);

/// Index of a destination path within its association. Paths are never removed while an
/// association lives, so an index stays valid for the association's whole lifetime.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PathId(pub usize);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_U32: u32 = u32::MAX;
    const MAX_U16: u16 = u16::MAX;

    #[test]
    fn tsn_compares_across_wraparound() {
        assert!(Tsn(42) == Tsn(42));
        assert!(Tsn(1) > Tsn(0));
        assert!(Tsn(200) > Tsn(100));
        assert!(Tsn(0) > Tsn(MAX_U32));
        assert!(Tsn(MAX_U32) < Tsn(0));
        assert!(Tsn(44) > Tsn(MAX_U32 - 10));
        assert!(Tsn(1 << 30) > Tsn(0));
        assert!(Tsn(0) > Tsn((1 << 31) + 1));
    }

    #[test]
    fn tsn_wraps_when_stepping() {
        let mut tsn = Tsn(MAX_U32 - 1);
        tsn += 1;
        assert_eq!(tsn, Tsn(MAX_U32));
        tsn += 1;
        assert_eq!(tsn, Tsn(0));
        assert_eq!(tsn - 1, Tsn(MAX_U32));
        assert_eq!(Tsn(MAX_U32) + 2, Tsn(1));
    }

    #[test]
    fn tsn_distance_is_symmetric() {
        assert_eq!(Tsn(MAX_U32 - 1).distance_to(Tsn(2)), 4);
        assert_eq!(Tsn(2).distance_to(Tsn(MAX_U32 - 1)), 4);
        assert_eq!(Tsn(10).distance_to(Tsn(10)), 0);
        assert_eq!(Tsn(1_000_000).distance_to(Tsn(0)), 1_000_000);
    }

    #[test]
    fn tsn_offset_from_base() {
        assert_eq!(Tsn(105).offset_from(Tsn(100)), Some(5));
        assert_eq!(Tsn(2).offset_from(Tsn(MAX_U32)), Some(3));
        assert_eq!(Tsn(100).offset_from(Tsn(100)), None);
        assert_eq!(Tsn(99).offset_from(Tsn(100)), None);
    }

    #[test]
    fn ssn_compares_across_wraparound() {
        assert!(Ssn(1) > Ssn(0));
        assert!(Ssn(255) > Ssn(200));
        assert!(Ssn(0) > Ssn(MAX_U16));
        assert!(Ssn(MAX_U16) < Ssn(44));
    }

    #[test]
    fn ssn_wraps_when_stepping() {
        let mut ssn = Ssn(MAX_U16);
        ssn += 1;
        assert_eq!(ssn, Ssn(0));
        assert_eq!(ssn - 1, Ssn(MAX_U16));
        assert_eq!(Ssn(MAX_U16 - 1).distance_to(Ssn(1)), 3);
    }

    #[test]
    fn sorting_within_a_window_is_stable() {
        let mut tsns = vec![Tsn(2), Tsn(MAX_U32), Tsn(0), Tsn(MAX_U32 - 1), Tsn(1)];
        tsns.sort();
        assert_eq!(tsns, vec![Tsn(MAX_U32 - 1), Tsn(MAX_U32), Tsn(0), Tsn(1), Tsn(2)]);
    }
}
