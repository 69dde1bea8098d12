//! Position report carried in beacon headers.

use derive_more::{Display, Error};

/// Geographic position of a station as transmitted in a beacon.
///
/// On the wire the position is encoded with Compact Position Reporting (CPR),
/// as ADS-B does: a full position is spread over two consecutive beacons, one
/// carrying the *odd* and one the *even* encoding (see
/// [`BeaconHeader::is_cpr_odd`]). No encoding is performed here - this type
/// only holds the values and reports how many bits the encoding takes.
///
/// [`BeaconHeader::is_cpr_odd`]: crate::header::BeaconHeader::is_cpr_odd
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CprPosition {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in feet.
    pub altitude: f64,
}

impl CprPosition {
    /// Bits used to encode the latitude.
    pub const LATITUDE_BITS: u32 = 12;
    /// Bits used to encode the longitude.
    pub const LONGITUDE_BITS: u32 = 14;
    /// Bits used to encode the altitude.
    pub const ALTITUDE_BITS: u32 = 12;
    /// Bits used to encode a full position.
    pub const BITS: u32 = Self::LATITUDE_BITS + Self::LONGITUDE_BITS + Self::ALTITUDE_BITS;

    /// Creates a new position.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// How trustworthy a reported position is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PositionQuality {
    /// No statement about the quality can be made.
    #[default]
    Unknown,
    /// Coarse position.
    Low,
    /// Position good enough for routing decisions.
    Medium,
    /// Position good enough for ranging.
    High,
}

impl PositionQuality {
    /// Bits used to encode the quality.
    pub const BITS: u32 = 2;
}

/// Number of hops between a station and the nearest ground station.
///
/// Encoded in [`HopCount::BITS`] bits, so at most [`HopCount::MAX`].
///
/// # Examples
///
/// ```
/// use airlink_proto::position::HopCount;
///
/// assert_eq!(3, HopCount::new(3).unwrap().get());
/// assert!(HopCount::new(32).is_err());
/// assert_eq!(HopCount::MAX, HopCount::saturating(200));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HopCount(u8);

/// Attempted to create a [`HopCount`] larger than [`HopCount::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("hop count too large - {hops} / {}", HopCount::MAX.0)]
pub struct HopCountTooLarge {
    /// Value which was passed in.
    pub hops: u32,
}

impl HopCount {
    /// Bits used to encode the hop count.
    pub const BITS: u32 = 5;

    /// Largest encodable hop count.
    pub const MAX: Self = Self((1 << Self::BITS) - 1);

    /// Creates a hop count.
    ///
    /// # Errors
    ///
    /// Errors if `hops` does not fit into [`HopCount::BITS`] bits.
    pub fn new(hops: u32) -> Result<Self, HopCountTooLarge> {
        u8::try_from(hops)
            .ok()
            .filter(|hops| *hops <= Self::MAX.0)
            .map(Self)
            .ok_or(HopCountTooLarge { hops })
    }

    /// Creates a hop count, clamping it to [`HopCount::MAX`].
    #[must_use]
    pub fn saturating(hops: u32) -> Self {
        Self::new(hops).unwrap_or(Self::MAX)
    }

    /// Gets the number of hops.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0 as u32
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for HopCount {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self(u.int_in_range(0..=Self::MAX.0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_bits() {
        assert_eq!(38, CprPosition::BITS);
    }

    #[test]
    fn hop_count_bounds() {
        assert_eq!(Ok(HopCount(31)), HopCount::new(31));
        assert_eq!(Err(HopCountTooLarge { hops: 32 }), HopCount::new(32));
        assert_eq!(Err(HopCountTooLarge { hops: 1000 }), HopCount::new(1000));
        assert_eq!(0, HopCount::default().get());
    }
}
