//! Link-layer headers and their bit-length accounting.
//!
//! Every message in a [`Packet`] may be led by one [`Header`]. Headers are a
//! closed set of variants, tagged on the wire by a [`FrameType`]. No byte
//! packing is performed - what matters to the scheduler is how many bits each
//! header takes up in a slot, which is reported by [`Header::bits`] and must
//! match the field widths below exactly.
//!
//! | Field | Bits |
//! |---|---|
//! | frame type tag (every header) | 3 |
//! | station identifier | 27 |
//! | burst offset | 8 |
//! | burst length, current and next | 4 + 4 |
//! | reservation timeout | 8 |
//! | authentication (base only) | 16 |
//! | fragment start/end flags | 2 |
//! | CPR position | 12 + 14 + 12 |
//! | CPR odd/even flag | 1 |
//! | hops to ground station | 5 |
//! | position quality | 2 |
//! | ARQ flag | 1 |
//! | sequence number, next expected, ack slot | 8 + 8 + 8 |
//! | selective-reject bitmap | 16 |
//!
//! [`Packet`]: crate::packet::Packet

use {
    crate::{
        id::MacId,
        position::{CprPosition, HopCount, PositionQuality},
        seq::SequenceNumber,
        srej::SrejBitmap,
    },
    derive_more::{Display, Error},
    static_assertions::const_assert,
};

/// Kind of a [`Header`], transmitted as a tag in front of every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameType {
    /// [`BaseHeader`].
    #[display("base")]
    Base,
    /// [`BroadcastHeader`].
    #[display("broadcast")]
    Broadcast,
    /// [`BeaconHeader`].
    #[display("beacon")]
    Beacon,
    /// [`UnicastHeader`].
    #[display("unicast")]
    Unicast,
    /// [`LinkEstablishmentHeader`] requesting a new link.
    #[display("link establishment request")]
    LinkEstablishmentRequest,
    /// [`LinkEstablishmentHeader`] answering a request.
    #[display("link establishment reply")]
    LinkEstablishmentReply,
    /// [`DmeRequestHeader`].
    #[display("dme request")]
    DmeRequest,
    /// [`DmeResponseHeader`].
    #[display("dme response")]
    DmeResponse,
}

impl FrameType {
    /// Bits used to encode the frame type tag.
    pub const BITS: u32 = 3;

    /// All frame types.
    pub const ALL: [Self; 8] = [
        Self::Base,
        Self::Broadcast,
        Self::Beacon,
        Self::Unicast,
        Self::LinkEstablishmentRequest,
        Self::LinkEstablishmentReply,
        Self::DmeRequest,
        Self::DmeResponse,
    ];

    /// Gets if headers of this type address a single station, and carry ARQ
    /// state.
    #[must_use]
    pub const fn is_unicast_family(self) -> bool {
        matches!(
            self,
            Self::Unicast | Self::LinkEstablishmentRequest | Self::LinkEstablishmentReply
        )
    }
}

const_assert!(FrameType::ALL.len() <= 1 << FrameType::BITS);

/// Errors when creating a [`Header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[non_exhaustive]
pub enum HeaderError {
    /// Unicast-family headers must address a real station, not an unset or
    /// symbolic identifier.
    #[display("invalid unicast destination {dest}")]
    InvalidDestination {
        /// Destination which was passed in.
        dest: MacId,
    },
    /// Attempted to build a unicast-family header with another frame type.
    #[display("{frame_type} is not a unicast frame type")]
    NotUnicastFamily {
        /// Frame type which was passed in.
        frame_type: FrameType,
    },
}

/// Number of slots of a burst, current or upcoming.
///
/// Encoded in [`BurstLength::BITS`] bits, so at most [`BurstLength::MAX`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BurstLength(u8);

impl BurstLength {
    /// Bits used to encode a burst length.
    pub const BITS: u32 = 4;

    /// Longest encodable burst.
    pub const MAX: Self = Self((1 << Self::BITS) - 1);

    /// Creates a burst length, or [`None`] if `slots` is above
    /// [`BurstLength::MAX`].
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_proto::header::BurstLength;
    ///
    /// assert_eq!(Some(15), BurstLength::new(15).map(BurstLength::get));
    /// assert_eq!(None, BurstLength::new(16));
    /// ```
    #[must_use]
    pub const fn new(slots: u8) -> Option<Self> {
        if slots <= Self::MAX.0 {
            Some(Self(slots))
        } else {
            None
        }
    }

    /// Gets the number of slots.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for BurstLength {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self(u.int_in_range(0..=Self::MAX.0)?))
    }
}

/// Slot reservation announced by a station for its next burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reservation {
    /// Slots until the next burst starts.
    pub burst_offset: u8,
    /// Length of the current burst.
    pub burst_length: BurstLength,
    /// Length of the next burst.
    pub burst_length_next: BurstLength,
    /// Number of further bursts this reservation stays valid for.
    pub timeout: u8,
}

impl Reservation {
    /// Bits used to encode a reservation.
    pub const BITS: u32 = 8 + BurstLength::BITS * 2 + 8;
}

/// Start and end markers of the datagram segment a message carries.
///
/// A datagram which fits into a single segment has both flags set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FragmentFlags {
    /// Segment starts a datagram.
    pub start: bool,
    /// Segment ends a datagram.
    pub end: bool,
}

impl FragmentFlags {
    /// Bits used to encode the flags.
    pub const BITS: u32 = 2;

    /// Flags of a segment carrying a whole datagram.
    pub const WHOLE: Self = Self {
        start: true,
        end: true,
    };
}

/// Leading header of every packet, identifying the sender and its slot
/// reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaseHeader {
    /// Station which sent this packet.
    pub src_id: MacId,
    /// Reservation of the sender.
    pub reservation: Reservation,
    /// Message authentication field.
    pub authentication: u16,
}

impl BaseHeader {
    /// Bits used to encode the authentication field.
    pub const AUTHENTICATION_BITS: u32 = 16;

    /// Bits used to encode this header.
    pub const BITS: u32 =
        FrameType::BITS + MacId::BITS + Reservation::BITS + Self::AUTHENTICATION_BITS;

    /// Creates a base header for `src_id` with an empty reservation.
    #[must_use]
    pub fn new(src_id: MacId) -> Self {
        Self {
            src_id,
            ..Default::default()
        }
    }
}

/// Header of a message for every station in range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BroadcastHeader {
    /// Fragment markers of the carried segment.
    pub fragment: FragmentFlags,
}

impl BroadcastHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 = FrameType::BITS + FragmentFlags::BITS;
}

/// Header of a periodic beacon announcing position and topology.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconHeader {
    /// Position of the sender.
    pub position: CprPosition,
    /// Whether [`BeaconHeader::position`] carries the odd CPR encoding, rather
    /// than the even one.
    pub is_cpr_odd: bool,
    /// Hops from the sender to its nearest ground station.
    pub hops_to_gs: HopCount,
    /// Quality of [`BeaconHeader::position`].
    pub position_quality: PositionQuality,
}

impl BeaconHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 =
        FrameType::BITS + CprPosition::BITS + 1 + HopCount::BITS + PositionQuality::BITS;
}

/// Header of a message for a single station, carrying ARQ state.
///
/// # Examples
///
/// ```
/// use airlink_proto::{header::UnicastHeader, id::MacId};
///
/// let header = UnicastHeader::new(MacId::new(2)).unwrap();
/// assert_eq!(MacId::new(2), header.dest_id());
///
/// assert!(UnicastHeader::new(MacId::BROADCAST).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnicastHeader {
    dest_id: MacId,
    /// Whether the link this message travels over is ARQ-protected.
    pub use_arq: bool,
    /// Sequence number of this frame.
    pub seq: SequenceNumber,
    /// Next sequence number the sender expects from the receiver. This
    /// acknowledges every frame before it.
    pub next_expected: SequenceNumber,
    /// Frames the sender is missing, relative to
    /// [`UnicastHeader::next_expected`].
    pub srej: SrejBitmap,
    /// Slots until the receiver should send its acknowledgement.
    pub ack_slot_offset: u8,
    /// Fragment markers of the carried segment.
    pub fragment: FragmentFlags,
}

impl UnicastHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 = FrameType::BITS
        + 1
        + FragmentFlags::BITS
        + SequenceNumber::BITS * 3
        + SrejBitmap::BITS
        + MacId::BITS;

    /// Creates a header addressed to `dest_id`, with ARQ disabled and unset
    /// sequence numbers.
    ///
    /// # Errors
    ///
    /// Errors if `dest_id` is unset or one of the symbolic identifiers.
    pub fn new(dest_id: MacId) -> Result<Self, HeaderError> {
        if dest_id.is_sentinel() {
            return Err(HeaderError::InvalidDestination { dest: dest_id });
        }
        Ok(Self {
            dest_id,
            use_arq: false,
            seq: SequenceNumber::UNSET,
            next_expected: SequenceNumber::UNSET,
            srej: SrejBitmap::default(),
            ack_slot_offset: 0,
            fragment: FragmentFlags::default(),
        })
    }

    /// Gets the station this header is addressed to.
    #[must_use]
    pub const fn dest_id(&self) -> MacId {
        self.dest_id
    }
}

/// Header of a link-establishment handshake message.
///
/// Used by both [`FrameType::LinkEstablishmentRequest`] and
/// [`FrameType::LinkEstablishmentReply`]: a unicast header followed by the
/// reservation proposed for the new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkEstablishmentHeader {
    /// Addressing and ARQ state.
    pub unicast: UnicastHeader,
    /// Proposed reservation of the link.
    pub reservation: Reservation,
}

impl LinkEstablishmentHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 = UnicastHeader::BITS + Reservation::BITS;

    /// Creates a header addressed to `dest_id`.
    ///
    /// # Errors
    ///
    /// Errors if `dest_id` is unset or one of the symbolic identifiers.
    pub fn new(dest_id: MacId, reservation: Reservation) -> Result<Self, HeaderError> {
        Ok(Self {
            unicast: UnicastHeader::new(dest_id)?,
            reservation,
        })
    }
}

/// Header of a ranging request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DmeRequestHeader;

impl DmeRequestHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 = FrameType::BITS;
}

/// Header of a ranging response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DmeResponseHeader {
    /// Station whose request is being answered.
    pub requester_id: MacId,
}

impl DmeResponseHeader {
    /// Bits used to encode this header.
    pub const BITS: u32 = FrameType::BITS + MacId::BITS;
}

/// Header of a single message in a packet.
///
/// # Examples
///
/// ```
/// use airlink_proto::{
///     header::{BaseHeader, FrameType, Header},
///     id::MacId,
/// };
///
/// let base = Header::from(BaseHeader::new(MacId::new(1)));
/// assert_eq!(FrameType::Base, base.frame_type());
/// assert_eq!(70, base.bits());
/// assert_eq!(Some(MacId::new(1)), base.source());
/// assert_eq!(None, base.destination());
///
/// let unicast = Header::unicast_family(FrameType::Unicast, MacId::new(2)).unwrap();
/// assert_eq!(73, unicast.bits());
/// assert_eq!(Some(MacId::new(2)), unicast.destination());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Header {
    /// See [`BaseHeader`].
    Base(BaseHeader),
    /// See [`BroadcastHeader`].
    Broadcast(BroadcastHeader),
    /// See [`BeaconHeader`].
    Beacon(BeaconHeader),
    /// See [`UnicastHeader`].
    Unicast(UnicastHeader),
    /// See [`LinkEstablishmentHeader`].
    LinkEstablishmentRequest(LinkEstablishmentHeader),
    /// See [`LinkEstablishmentHeader`].
    LinkEstablishmentReply(LinkEstablishmentHeader),
    /// See [`DmeRequestHeader`].
    DmeRequest(DmeRequestHeader),
    /// See [`DmeResponseHeader`].
    DmeResponse(DmeResponseHeader),
}

impl Header {
    /// Creates a unicast-family header of the given frame type, addressed to
    /// `dest_id`.
    ///
    /// Link-establishment headers are given an empty reservation.
    ///
    /// # Errors
    ///
    /// Errors if `frame_type` is not part of the unicast family, or if
    /// `dest_id` is not a station address.
    pub fn unicast_family(frame_type: FrameType, dest_id: MacId) -> Result<Self, HeaderError> {
        let header = match frame_type {
            FrameType::Unicast => Self::Unicast(UnicastHeader::new(dest_id)?),
            FrameType::LinkEstablishmentRequest => Self::LinkEstablishmentRequest(
                LinkEstablishmentHeader::new(dest_id, Reservation::default())?,
            ),
            FrameType::LinkEstablishmentReply => Self::LinkEstablishmentReply(
                LinkEstablishmentHeader::new(dest_id, Reservation::default())?,
            ),
            frame_type => return Err(HeaderError::NotUnicastFamily { frame_type }),
        };
        Ok(header)
    }

    /// Gets the frame type tag of this header.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Base(_) => FrameType::Base,
            Self::Broadcast(_) => FrameType::Broadcast,
            Self::Beacon(_) => FrameType::Beacon,
            Self::Unicast(_) => FrameType::Unicast,
            Self::LinkEstablishmentRequest(_) => FrameType::LinkEstablishmentRequest,
            Self::LinkEstablishmentReply(_) => FrameType::LinkEstablishmentReply,
            Self::DmeRequest(_) => FrameType::DmeRequest,
            Self::DmeResponse(_) => FrameType::DmeResponse,
        }
    }

    /// Gets how many bits this header takes up on the wire.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        match self {
            Self::Base(_) => BaseHeader::BITS,
            Self::Broadcast(_) => BroadcastHeader::BITS,
            Self::Beacon(_) => BeaconHeader::BITS,
            Self::Unicast(_) => UnicastHeader::BITS,
            Self::LinkEstablishmentRequest(_) | Self::LinkEstablishmentReply(_) => {
                LinkEstablishmentHeader::BITS
            }
            Self::DmeRequest(_) => DmeRequestHeader::BITS,
            Self::DmeResponse(_) => DmeResponseHeader::BITS,
        }
    }

    /// Gets which link this header addresses.
    ///
    /// Beacons address [`MacId::BEACON`], broadcasts address
    /// [`MacId::BROADCAST`], and unicast-family headers address their
    /// destination station. Other headers take no part in addressing, and
    /// give [`None`].
    #[must_use]
    pub const fn destination(&self) -> Option<MacId> {
        match self {
            Self::Beacon(_) => Some(MacId::BEACON),
            Self::Broadcast(_) => Some(MacId::BROADCAST),
            Self::Unicast(header) => Some(header.dest_id),
            Self::LinkEstablishmentRequest(header) | Self::LinkEstablishmentReply(header) => {
                Some(header.unicast.dest_id)
            }
            Self::Base(_) | Self::DmeRequest(_) | Self::DmeResponse(_) => None,
        }
    }

    /// Gets the station which sent this header, if the header carries it.
    #[must_use]
    pub const fn source(&self) -> Option<MacId> {
        match self {
            Self::Base(header) => Some(header.src_id),
            _ => None,
        }
    }

    /// Gets the unicast part of a unicast-family header.
    #[must_use]
    pub const fn as_unicast(&self) -> Option<&UnicastHeader> {
        match self {
            Self::Unicast(header) => Some(header),
            Self::LinkEstablishmentRequest(header) | Self::LinkEstablishmentReply(header) => {
                Some(&header.unicast)
            }
            _ => None,
        }
    }

    /// Gets the unicast part of a unicast-family header mutably.
    #[must_use]
    pub const fn as_unicast_mut(&mut self) -> Option<&mut UnicastHeader> {
        match self {
            Self::Unicast(header) => Some(header),
            Self::LinkEstablishmentRequest(header) | Self::LinkEstablishmentReply(header) => {
                Some(&mut header.unicast)
            }
            _ => None,
        }
    }
}

impl From<BaseHeader> for Header {
    fn from(value: BaseHeader) -> Self {
        Self::Base(value)
    }
}

impl From<BroadcastHeader> for Header {
    fn from(value: BroadcastHeader) -> Self {
        Self::Broadcast(value)
    }
}

impl From<BeaconHeader> for Header {
    fn from(value: BeaconHeader) -> Self {
        Self::Beacon(value)
    }
}

impl From<UnicastHeader> for Header {
    fn from(value: UnicastHeader) -> Self {
        Self::Unicast(value)
    }
}

impl From<DmeRequestHeader> for Header {
    fn from(value: DmeRequestHeader) -> Self {
        Self::DmeRequest(value)
    }
}

impl From<DmeResponseHeader> for Header {
    fn from(value: DmeResponseHeader) -> Self {
        Self::DmeResponse(value)
    }
}
