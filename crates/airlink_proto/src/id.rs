//! See [`MacId`].

use core::fmt;

/// Identifier of a station on the data link.
///
/// Station identifiers are 24-bit ICAO addresses extended to the
/// [`MacId::BITS`]-wide field used by every header that carries an
/// identifier. A few negative values are reserved as symbolic link
/// identifiers, which never appear as the address of a real station:
///
/// | Sentinel | Meaning |
/// |---|---|
/// | [`MacId::UNSET`] | no identifier has been assigned |
/// | [`MacId::BROADCAST`] | the shared broadcast link |
/// | [`MacId::BEACON`] | the beacon link, which is also a broadcast |
/// | [`MacId::DME`] | the distance-measuring (ranging) link |
///
/// Identifiers are compared by value, and form a total order.
///
/// # Examples
///
/// ```
/// use airlink_proto::id::MacId;
///
/// let a = MacId::new(42);
/// assert!(!a.is_sentinel());
/// assert!(MacId::BROADCAST.is_sentinel());
/// assert!(MacId::new(1) < MacId::new(2));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacId(i32);

impl MacId {
    /// Number of bits an identifier occupies in a header.
    pub const BITS: u32 = 27;

    /// Largest identifier which can be given to a real station.
    pub const MAX: Self = Self((1 << Self::BITS) - 1);

    /// No identifier has been assigned.
    pub const UNSET: Self = Self(-1);

    /// Symbolic identifier of the broadcast link.
    pub const BROADCAST: Self = Self(-2);

    /// Symbolic identifier of the beacon link.
    pub const BEACON: Self = Self(-3);

    /// Symbolic identifier of the distance-measuring link.
    pub const DME: Self = Self(-4);

    /// Creates an identifier from a raw value.
    ///
    /// Passing one of the reserved negative values produces the matching
    /// sentinel.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Gets the raw value of this identifier.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Gets if this is one of the reserved symbolic identifiers, rather than
    /// the address of a station.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 < 0
    }

    /// Gets if this identifier has been assigned.
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.0 != Self::UNSET.0
    }
}

impl Default for MacId {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Debug for MacId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UNSET => f.write_str("MacId(UNSET)"),
            Self::BROADCAST => f.write_str("MacId(BROADCAST)"),
            Self::BEACON => f.write_str("MacId(BEACON)"),
            Self::DME => f.write_str("MacId(DME)"),
            Self(id) => f.debug_tuple("MacId").field(&id).finish(),
        }
    }
}

impl fmt::Display for MacId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UNSET => f.write_str("unset"),
            Self::BROADCAST => f.write_str("broadcast"),
            Self::BEACON => f.write_str("beacon"),
            Self::DME => f.write_str("dme"),
            Self(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for MacId {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        // bias towards a handful of stations so that generated packets
        // actually hit the same-destination paths
        Ok(match u.int_in_range(0..=9u8)? {
            0 => Self::UNSET,
            1 => Self::BROADCAST,
            2 => Self::BEACON,
            3 => Self::DME,
            n => Self(i32::from(n)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        let sentinels = [MacId::UNSET, MacId::BROADCAST, MacId::BEACON, MacId::DME];
        for (i, a) in sentinels.iter().enumerate() {
            assert!(a.is_sentinel());
            for b in &sentinels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn stations_are_not_sentinels() {
        assert!(!MacId::new(0).is_sentinel());
        assert!(!MacId::MAX.is_sentinel());
        assert!(MacId::new(0).is_set());
        assert!(!MacId::UNSET.is_set());
    }

    #[test]
    fn default_is_unset() {
        assert_eq!(MacId::UNSET, MacId::default());
    }

    #[test]
    fn display() {
        assert_eq!("broadcast", MacId::BROADCAST.to_string());
        assert_eq!("1234", MacId::new(1234).to_string());
    }
}
