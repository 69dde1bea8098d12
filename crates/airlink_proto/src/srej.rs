//! See [`SrejBitmap`].

use {
    crate::seq::SequenceNumber,
    core::fmt,
};

/// Selective-reject bitmap carried in unicast-family headers.
///
/// The bitmap is anchored at the *next expected* sequence number of the header
/// it is carried in. Bit `N` being set means that the frame
/// `next_expected + N` has not been received and should be retransmitted:
///
/// ```text
/// next_expected: 10
/// bits: 0b0000_0000_0000_0101
///                          ^ ^- frame 10 is missing
///                          +--- frame 12 is missing
/// ```
///
/// Frames more than [`SrejBitmap::BITS`] - 1 steps after the anchor cannot be
/// rejected, and must wait for the anchor to advance.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SrejBitmap(pub u16);

impl SrejBitmap {
    /// Number of bits the bitmap occupies in a header.
    pub const BITS: u32 = u16::BITS;

    /// Marks `seq` as missing, relative to the anchor `next_expected`.
    ///
    /// Returns `false` and leaves the bitmap untouched if `seq` is not within
    /// [`SrejBitmap::BITS`] steps after the anchor, or if either value is
    /// unset.
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_proto::{seq::SequenceNumber, srej::SrejBitmap};
    ///
    /// let anchor = SequenceNumber::new(254);
    /// let mut srej = SrejBitmap::default();
    /// assert!(srej.reject(anchor, SequenceNumber::new(254)));
    /// assert!(srej.reject(anchor, SequenceNumber::new(2)));
    /// assert!(!srej.reject(anchor, SequenceNumber::new(100)));
    ///
    /// assert!(srej.is_rejected(anchor, SequenceNumber::new(2)));
    /// assert!(!srej.is_rejected(anchor, SequenceNumber::new(1)));
    /// assert_eq!(2, srej.len());
    /// ```
    pub fn reject(&mut self, next_expected: SequenceNumber, seq: SequenceNumber) -> bool {
        match offset(next_expected, seq) {
            Some(bit) => {
                self.0 |= 1 << bit;
                true
            }
            None => false,
        }
    }

    /// Gets if `seq` is marked as missing, relative to the anchor
    /// `next_expected`.
    #[must_use]
    pub fn is_rejected(self, next_expected: SequenceNumber, seq: SequenceNumber) -> bool {
        offset(next_expected, seq).is_some_and(|bit| self.0 & (1 << bit) != 0)
    }

    /// Builds a bitmap from an iterator of missing sequence numbers.
    ///
    /// Values which cannot be represented relative to `next_expected` are
    /// skipped.
    pub fn from_missing(
        next_expected: SequenceNumber,
        missing: impl IntoIterator<Item = SequenceNumber>,
    ) -> Self {
        let mut srej = Self::default();
        for seq in missing {
            srej.reject(next_expected, seq);
        }
        srej
    }

    /// Iterates over all sequence numbers marked as missing, in ascending
    /// order starting from `next_expected`.
    pub fn iter(self, next_expected: SequenceNumber) -> impl Iterator<Item = SequenceNumber> {
        (0..Self::BITS).filter_map(move |bit| {
            if self.0 & (1 << bit) == 0 {
                return None;
            }
            let steps = u8::try_from(bit).ok()?;
            Some(next_expected + steps)
        })
    }

    /// Number of frames marked as missing.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Gets if no frame is marked as missing.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

fn offset(next_expected: SequenceNumber, seq: SequenceNumber) -> Option<u32> {
    next_expected
        .forward_distance(seq)
        .map(u32::from)
        .filter(|dist| *dist < SrejBitmap::BITS)
}

impl fmt::Debug for SrejBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SrejBitmap({:016b})", self.0)
    }
}
