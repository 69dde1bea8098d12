//! See [`SequenceNumber`].

use {
    core::{
        fmt,
        ops::{Add, AddAssign, Sub, SubAssign},
    },
    derive_more::{Display, Error},
};

/// ARQ sequence number of a frame sent over a link.
///
/// This is a one-byte modular counter. The raw value `0` is reserved as
/// [`SequenceNumber::UNSET`], and is skipped over when stepping, so the usable
/// values are `1..=255`, wrapping from `255` back to `1`:
///
/// ```text
///    254    255     1      2      3
/// ... --|------|------|------|------|-- ...
///       ^      ^      ^
///       |      +------+ forward distance 255 -> 1 = 1
///       +------------------------+ forward distance 254 -> 3 = 4
/// ```
///
/// # Ordering
///
/// Sequence numbers have no context-free order: once the counter has wrapped
/// around, a raw value of `2` may be either slightly ahead of or far behind a
/// raw value of `250`. For this reason this type does not implement
/// [`PartialOrd`] or [`Ord`], so `a < b` does not compile. Instead, compare
/// two sequence numbers relative to a window with
/// [`SequenceNumber::is_higher_than`] and friends: `a` is higher than `b` if
/// the forward distance from `b` to `a` is smaller than the window.
///
/// The result is only unambiguous if the real separation of the two values is
/// smaller than the window, and the window is at most
/// [`SequenceNumber::MAX_WINDOW`]. Callers (the ARQ sublayer) are responsible
/// for tracking where the window currently sits.
///
/// Equality is exact value equality and does not depend on any window.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceNumber(u8);

/// Attempted to create a [`SequenceNumber`] from a value above
/// [`SequenceNumber::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("sequence number out of range - {value} / {}", SequenceNumber::MAX.0)]
pub struct SeqOutOfRange {
    /// Value which was passed in.
    pub value: u32,
}

/// Number of distinct usable sequence numbers.
const MODULUS: u16 = 255;

impl SequenceNumber {
    /// Reserved value of a sequence number which has not been assigned yet.
    pub const UNSET: Self = Self(0);

    /// First usable sequence number.
    pub const FIRST: Self = Self(1);

    /// Last usable sequence number, directly before [`SequenceNumber::FIRST`].
    pub const MAX: Self = Self(255);

    /// Largest window for which windowed comparisons can never report that
    /// two different values are both higher than each other.
    pub const MAX_WINDOW: u8 = 127;

    /// Number of bits a sequence number occupies in a header.
    pub const BITS: u32 = 8;

    /// Creates a sequence number from a raw value.
    ///
    /// `0` creates [`SequenceNumber::UNSET`].
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Gets the raw value of this sequence number.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Gets if this is not [`SequenceNumber::UNSET`].
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.0 != Self::UNSET.0
    }

    /// Steps this sequence number one value forward, skipping over
    /// [`SequenceNumber::UNSET`].
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_proto::seq::SequenceNumber;
    ///
    /// let mut seq = SequenceNumber::UNSET;
    /// seq.increment();
    /// assert_eq!(SequenceNumber::FIRST, seq);
    ///
    /// let mut seq = SequenceNumber::MAX;
    /// seq.increment();
    /// assert_eq!(SequenceNumber::FIRST, seq);
    /// ```
    pub fn increment(&mut self) {
        *self = self.next();
    }

    /// Steps this sequence number one value backward, skipping over
    /// [`SequenceNumber::UNSET`].
    pub fn decrement(&mut self) {
        *self = self.prev();
    }

    /// Gets the sequence number directly after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        self.forward(1)
    }

    /// Gets the sequence number directly before this one.
    #[must_use]
    pub const fn prev(self) -> Self {
        self.backward(1)
    }

    /// Steps `n` values forward.
    ///
    /// [`SequenceNumber::UNSET`] sits right before [`SequenceNumber::FIRST`],
    /// so stepping forward from it lands on the usable range.
    #[must_use]
    pub const fn forward(self, n: u8) -> Self {
        if n == 0 {
            return self;
        }
        // position on the ring of usable values, where UNSET acts like the
        // value right before FIRST
        let from = if self.0 == 0 { MODULUS - 1 } else { self.0 as u16 - 1 };
        #[expect(clippy::cast_possible_truncation, reason = "result is at most `MODULUS`")]
        let raw = ((from + n as u16) % MODULUS + 1) as u8;
        Self(raw)
    }

    /// Steps `n` values backward.
    ///
    /// [`SequenceNumber::UNSET`] sits right after [`SequenceNumber::MAX`],
    /// so stepping backward from it lands on the usable range.
    #[must_use]
    pub const fn backward(self, n: u8) -> Self {
        if n == 0 {
            return self;
        }
        // UNSET acts like the value right after MAX
        let from = if self.0 == 0 { MODULUS + 1 } else { self.0 as u16 };
        let n = n as u16 % MODULUS;
        #[expect(clippy::cast_possible_truncation, reason = "result is at most `MODULUS`")]
        let raw = ((from + MODULUS - 1 - n) % MODULUS + 1) as u8;
        Self(raw)
    }

    /// Gets how many forward steps it takes to get from `self` to `to`.
    ///
    /// Returns [`None`] if either value is [`SequenceNumber::UNSET`].
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_proto::seq::SequenceNumber;
    ///
    /// let s = SequenceNumber::new;
    /// assert_eq!(Some(0), s(5).forward_distance(s(5)));
    /// assert_eq!(Some(3), s(5).forward_distance(s(8)));
    /// assert_eq!(Some(1), s(255).forward_distance(s(1)));
    /// assert_eq!(Some(254), s(1).forward_distance(s(255)));
    /// assert_eq!(None, SequenceNumber::UNSET.forward_distance(s(1)));
    /// ```
    #[must_use]
    pub const fn forward_distance(self, to: Self) -> Option<u8> {
        if self.0 == 0 || to.0 == 0 {
            return None;
        }
        let from = self.0 as u16 - 1;
        let to = to.0 as u16 - 1;
        #[expect(clippy::cast_possible_truncation, reason = "result is below `MODULUS`")]
        let dist = ((to + MODULUS - from) % MODULUS) as u8;
        Some(dist)
    }

    /// Gets if `self` is ahead of `other` by less than `window` steps.
    ///
    /// This measures the forward distance from `other` to `self`, which
    /// covers both the case where the raw value of `self` is larger, and the
    /// case where the counter has wrapped around in between.
    ///
    /// Always returns `false` if either value is [`SequenceNumber::UNSET`].
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_proto::seq::SequenceNumber;
    ///
    /// let s = SequenceNumber::new;
    /// assert!(s(2).is_higher_than(s(1), 100));
    /// assert!(s(1).is_higher_than(s(255), 100));
    /// assert!(!s(101).is_higher_than(s(1), 100));
    /// assert!(!s(1).is_higher_than(s(1), 100));
    /// ```
    #[must_use]
    pub const fn is_higher_than(self, other: Self, window: u8) -> bool {
        match other.forward_distance(self) {
            Some(dist) => dist > 0 && dist < window,
            None => false,
        }
    }

    /// Gets if `self` is behind `other` by less than `window` steps.
    ///
    /// This is [`SequenceNumber::is_higher_than`] with the operands swapped.
    #[must_use]
    pub const fn is_lower_than(self, other: Self, window: u8) -> bool {
        other.is_higher_than(self, window)
    }

    /// Gets if `self` is equal to `other`, or behind it by less than `window`
    /// steps.
    #[must_use]
    pub const fn is_lower_than_eq(self, other: Self, window: u8) -> bool {
        self.0 == other.0 || self.is_lower_than(other, window)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_set() {
            f.debug_tuple("SequenceNumber").field(&self.0).finish()
        } else {
            f.write_str("SequenceNumber(UNSET)")
        }
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SequenceNumber> for u8 {
    fn from(value: SequenceNumber) -> Self {
        value.0
    }
}

impl TryFrom<u16> for SequenceNumber {
    type Error = SeqOutOfRange;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::try_from(u32::from(value))
    }
}

impl TryFrom<u32> for SequenceNumber {
    type Error = SeqOutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map(Self)
            .map_err(|_| SeqOutOfRange { value })
    }
}

impl Add<u8> for SequenceNumber {
    type Output = Self;

    fn add(self, rhs: u8) -> Self::Output {
        self.forward(rhs)
    }
}

impl AddAssign<u8> for SequenceNumber {
    fn add_assign(&mut self, rhs: u8) {
        *self = *self + rhs;
    }
}

impl Sub<u8> for SequenceNumber {
    type Output = Self;

    fn sub(self, rhs: u8) -> Self::Output {
        self.backward(rhs)
    }
}

impl SubAssign<u8> for SequenceNumber {
    fn sub_assign(&mut self, rhs: u8) {
        *self = *self - rhs;
    }
}
