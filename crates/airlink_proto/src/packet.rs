//! See [`Packet`].

use {
    crate::{
        header::{BaseHeader, FrameType, Header, UnicastHeader},
        id::MacId,
        payload::Payload,
    },
    core::fmt,
    derive_more::{Display, Error},
    log::trace,
};

/// Single message of a [`Packet`]: an optional header followed by an optional
/// payload.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Header leading this message.
    pub header: Option<Header>,
    /// Data carried by this message.
    pub payload: Option<Box<dyn Payload>>,
}

impl Message {
    /// Gets how many bits this message takes up on the wire.
    ///
    /// Absent parts take up no bits.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.header.as_ref().map_or(0, Header::bits)
            + self.payload.as_ref().map_or(0, |payload| payload.bits())
    }
}

/// Error when adding a message to, or removing a message from, a [`Packet`].
///
/// Adding a message which causes an error leaves the packet untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[non_exhaustive]
pub enum PacketError {
    /// The first header of a packet must be a [`BaseHeader`].
    #[display("first header must be base, got {frame_type}")]
    FirstHeaderNotBase {
        /// Frame type of the rejected header.
        frame_type: FrameType,
    },
    /// A packet already has a [`BaseHeader`].
    #[display("packet already has a base header")]
    DuplicateBase,
    /// A beacon must come before every other addressed header, and a packet
    /// carries at most one.
    #[display("beacon must precede all other addressed headers")]
    BeaconNotFirst,
    /// A broadcast cannot follow a unicast-family header.
    #[display("broadcast cannot follow a unicast header")]
    BroadcastAfterUnicast,
    /// All unicast-family headers of a packet must address the same station.
    #[display("packet already addressed to {existing}, got {new}")]
    ConflictingDestination {
        /// Destination already in the packet.
        existing: MacId,
        /// Destination of the rejected header.
        new: MacId,
    },
    /// A unicast-family header addresses an unset or symbolic identifier.
    #[display("invalid unicast destination {dest}")]
    InvalidDestination {
        /// Destination of the rejected header.
        dest: MacId,
    },
    /// Index passed to [`Packet::erase`] is out of range.
    #[display("index {index} out of range for packet of {len} messages")]
    IndexOutOfRange {
        /// Index which was passed in.
        index: usize,
        /// Number of messages in the packet.
        len: usize,
    },
}

/// Function called right before a packet is handed to the radio.
pub type SentCallback = Box<dyn FnMut(&Packet)>;

/// Transmission unit of the data link: an ordered sequence of [`Message`]s
/// concatenated into a single burst.
///
/// # Composition
///
/// Every call to [`Packet::add_message`] checks the new header against all
/// headers already in the packet:
/// - the first header must be a [`Header::Base`], and there can be only one
///   (messages without a header may come before it)
/// - a [`Header::Beacon`] must come before any other beacon, broadcast or
///   unicast-family header
/// - a [`Header::Broadcast`] may not follow a unicast-family header
/// - unicast-family headers must all address the same station
///
/// Ranging headers are not constrained beyond the first rule.
///
/// # Addressing
///
/// [`Packet::destination`] resolves which link the packet travels over, in
/// priority order: [`MacId::BEACON`] if the packet contains a beacon, else
/// [`MacId::BROADCAST`] if it contains a broadcast, else the destination of
/// the first unicast-family header, else [`MacId::UNSET`].
///
/// # Cloning
///
/// [`Clone`] deep-copies every header and payload, keeping message order.
/// Sent callbacks are tied to the exact packet they were registered on, and
/// are not carried over.
///
/// # Examples
///
/// ```
/// use airlink_proto::{
///     header::{BaseHeader, Header, UnicastHeader},
///     id::MacId,
///     packet::Packet,
///     payload::FixedSizePayload,
/// };
///
/// let mut packet = Packet::new();
/// packet
///     .add_message(Some(BaseHeader::new(MacId::new(1)).into()), None)
///     .unwrap();
/// packet
///     .add_message(
///         Some(UnicastHeader::new(MacId::new(2)).unwrap().into()),
///         Some(Box::new(FixedSizePayload(8))),
///     )
///     .unwrap();
///
/// assert_eq!(70 + 73 + 8, packet.bits());
/// assert_eq!(MacId::new(1), packet.origin());
/// assert_eq!(MacId::new(2), packet.destination());
///
/// // a second base header is never allowed
/// assert!(packet.add_message(Some(BaseHeader::default().into()), None).is_err());
/// assert_eq!(2, packet.len());
/// ```
#[derive(Default)]
pub struct Packet {
    messages: Vec<Message>,
    callbacks: Vec<SentCallback>,
}

impl Packet {
    /// Creates an empty packet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Appends a message to the end of this packet.
    ///
    /// # Errors
    ///
    /// Errors if `header` may not be combined with the headers already in
    /// this packet. See the [composition rules](Packet#composition).
    pub fn add_message(
        &mut self,
        header: Option<Header>,
        payload: Option<Box<dyn Payload>>,
    ) -> Result<(), PacketError> {
        if let Some(header) = &header {
            self.check_composition(header)?;
        }
        self.messages.push(Message { header, payload });
        Ok(())
    }

    fn check_composition(&self, new: &Header) -> Result<(), PacketError> {
        let mut headers = self.headers().peekable();
        if headers.peek().is_none() {
            return match new {
                Header::Base(_) => Ok(()),
                _ => Err(PacketError::FirstHeaderNotBase {
                    frame_type: new.frame_type(),
                }),
            };
        }

        match new {
            Header::Base(_) => Err(PacketError::DuplicateBase),
            Header::Beacon(_) => {
                if headers.any(|header| header.destination().is_some()) {
                    Err(PacketError::BeaconNotFirst)
                } else {
                    Ok(())
                }
            }
            Header::Broadcast(_) => {
                if headers.any(|header| header.frame_type().is_unicast_family()) {
                    Err(PacketError::BroadcastAfterUnicast)
                } else {
                    Ok(())
                }
            }
            Header::Unicast(_)
            | Header::LinkEstablishmentRequest(_)
            | Header::LinkEstablishmentReply(_) => {
                let Some(dest) = new.destination() else {
                    return Ok(());
                };
                if dest.is_sentinel() {
                    return Err(PacketError::InvalidDestination { dest });
                }
                match self.unicast_destination() {
                    Some(existing) if existing != dest => {
                        Err(PacketError::ConflictingDestination {
                            existing,
                            new: dest,
                        })
                    }
                    _ => Ok(()),
                }
            }
            Header::DmeRequest(_) | Header::DmeResponse(_) => Ok(()),
        }
    }

    fn unicast_destination(&self) -> Option<MacId> {
        self.headers()
            .filter_map(Header::as_unicast)
            .map(UnicastHeader::dest_id)
            .next()
    }

    /// Gets how many bits this packet takes up on the wire.
    ///
    /// This is the sum of every message's header and payload bits.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.messages.iter().map(Message::bits).sum()
    }

    /// Gets which link this packet travels over.
    ///
    /// See [addressing](Packet#addressing).
    #[must_use]
    pub fn destination(&self) -> MacId {
        let mut broadcast = false;
        let mut unicast = None;
        for header in self.headers() {
            match header {
                Header::Beacon(_) => return MacId::BEACON,
                Header::Broadcast(_) => broadcast = true,
                _ => {
                    if unicast.is_none() {
                        unicast = header.as_unicast().map(UnicastHeader::dest_id);
                    }
                }
            }
        }
        if broadcast {
            MacId::BROADCAST
        } else {
            unicast.unwrap_or(MacId::UNSET)
        }
    }

    /// Gets the station which sent this packet.
    ///
    /// This is the source of the first header if it is a base header, or
    /// [`MacId::UNSET`] otherwise.
    #[must_use]
    pub fn origin(&self) -> MacId {
        match self.headers().next() {
            Some(Header::Base(base)) => base.src_id,
            _ => MacId::UNSET,
        }
    }

    /// Removes the message at `index` and returns it, shifting all later
    /// messages one place forward.
    ///
    /// # Errors
    ///
    /// Errors if `index` is out of range.
    pub fn erase(&mut self, index: usize) -> Result<Message, PacketError> {
        let len = self.messages.len();
        if index >= len {
            return Err(PacketError::IndexOutOfRange { index, len });
        }
        Ok(self.messages.remove(index))
    }

    /// Registers a function to call right before this packet is handed to
    /// the radio.
    pub fn add_callback(&mut self, callback: impl FnMut(&Self) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Calls every registered sent callback, in registration order.
    ///
    /// Callbacks stay registered, and are called again on the next call.
    pub fn notify_callbacks(&mut self) {
        let mut callbacks = core::mem::take(&mut self.callbacks);
        trace!("Notifying {} sent callbacks", callbacks.len());
        for callback in &mut callbacks {
            callback(self);
        }
        // a callback cannot reach `self` mutably, so nothing was added meanwhile
        self.callbacks = callbacks;
    }

    /// Number of messages in this packet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Gets if this packet has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Gets all messages, in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Gets all messages mutably, in order.
    ///
    /// Only existing messages can be changed through this, so replacing a
    /// header here bypasses the [composition rules](Packet#composition).
    #[must_use]
    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    /// Consumes this packet, returning its messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Iterates over all headers present, in order.
    pub fn headers(&self) -> impl Iterator<Item = &Header> {
        self.messages.iter().filter_map(|msg| msg.header.as_ref())
    }

    /// Iterates over all payloads present, in order.
    pub fn payloads(&self) -> impl Iterator<Item = &dyn Payload> {
        self.messages.iter().filter_map(|msg| msg.payload.as_deref())
    }

    /// Gets the base header, if there is one.
    #[must_use]
    pub fn base(&self) -> Option<&BaseHeader> {
        self.headers().find_map(|header| match header {
            Header::Base(base) => Some(base),
            _ => None,
        })
    }

    /// Gets the base header mutably, if there is one.
    #[must_use]
    pub fn base_mut(&mut self) -> Option<&mut BaseHeader> {
        self.messages
            .iter_mut()
            .find_map(|msg| match &mut msg.header {
                Some(Header::Base(base)) => Some(base),
                _ => None,
            })
    }

    /// Iterates over the unicast part of every unicast-family header mutably.
    pub fn unicast_headers_mut(&mut self) -> impl Iterator<Item = &mut UnicastHeader> {
        self.messages
            .iter_mut()
            .filter_map(|msg| msg.header.as_mut().and_then(Header::as_unicast_mut))
    }

    /// Gets if this packet contains a header of the given frame type.
    #[must_use]
    pub fn contains(&self, frame_type: FrameType) -> bool {
        self.headers()
            .any(|header| header.frame_type() == frame_type)
    }
}

impl Clone for Packet {
    fn clone(&self) -> Self {
        Self {
            messages: self.messages.clone(),
            callbacks: Vec::new(),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("messages", &self.messages)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            header::{
                BeaconHeader, BroadcastHeader, BurstLength, DmeRequestHeader, DmeResponseHeader,
                Reservation,
            },
            payload::FixedSizePayload,
            seq::SequenceNumber,
        },
        assert_matches::assert_matches,
        std::{cell::Cell, rc::Rc},
    };

    fn station(id: i32) -> MacId {
        MacId::new(id)
    }

    fn base(src: i32) -> Header {
        BaseHeader::new(station(src)).into()
    }

    fn unicast(dest: i32) -> Header {
        UnicastHeader::new(station(dest)).unwrap().into()
    }

    fn link_request(dest: i32) -> Header {
        Header::unicast_family(FrameType::LinkEstablishmentRequest, station(dest)).unwrap()
    }

    fn beacon() -> Header {
        BeaconHeader::default().into()
    }

    fn broadcast() -> Header {
        BroadcastHeader::default().into()
    }

    fn packet_of(headers: impl IntoIterator<Item = Header>) -> Result<Packet, PacketError> {
        let mut packet = Packet::new();
        for header in headers {
            packet.add_message(Some(header), None)?;
        }
        Ok(packet)
    }

    #[test]
    fn base_then_unicast() {
        let base = BaseHeader {
            src_id: station(1),
            reservation: Reservation {
                burst_offset: 3,
                burst_length: BurstLength::new(1).unwrap(),
                burst_length_next: BurstLength::default(),
                timeout: 12,
            },
            authentication: 0,
        };
        let mut unicast = UnicastHeader::new(station(2)).unwrap();
        unicast.use_arq = true;
        unicast.seq = SequenceNumber::new(12);
        unicast.next_expected = SequenceNumber::new(5);

        let mut packet = Packet::new();
        packet.add_message(Some(base.into()), None).unwrap();
        packet
            .add_message(Some(unicast.into()), Some(Box::new(FixedSizePayload(1))))
            .unwrap();

        assert_eq!(BaseHeader::BITS + UnicastHeader::BITS + 1, packet.bits());
        assert_eq!(station(2), packet.destination());
        assert_eq!(station(1), packet.origin());
    }

    #[test]
    fn erase_until_empty() {
        let mut packet = packet_of([base(1), unicast(2)]).unwrap();

        let removed = packet.erase(0).unwrap();
        assert_matches!(removed.header, Some(Header::Base(_)));
        assert_eq!(1, packet.len());
        assert_eq!(station(2), packet.destination());

        packet.erase(0).unwrap();
        assert!(packet.is_empty());

        assert_matches!(
            packet.erase(0),
            Err(PacketError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn first_header_must_be_base() {
        for header in [unicast(2), beacon(), broadcast(), DmeRequestHeader.into()] {
            let mut packet = Packet::new();
            let frame_type = header.frame_type();
            assert_matches!(
                packet.add_message(Some(header), None),
                Err(PacketError::FirstHeaderNotBase { frame_type: f }) if f == frame_type
            );
            assert!(packet.is_empty());
        }
    }

    #[test]
    fn headerless_messages_may_lead() {
        let mut packet = Packet::new();
        packet
            .add_message(None, Some(Box::new(FixedSizePayload(4))))
            .unwrap();
        assert_matches!(
            packet.add_message(Some(unicast(2)), None),
            Err(PacketError::FirstHeaderNotBase { .. })
        );
        packet.add_message(Some(base(1)), None).unwrap();
        packet.add_message(Some(unicast(2)), None).unwrap();
        assert_eq!(3, packet.len());
        // origin only looks at the first header
        assert_eq!(station(1), packet.origin());
    }

    #[test]
    fn duplicate_base() {
        assert_matches!(
            packet_of([base(1), base(1)]),
            Err(PacketError::DuplicateBase)
        );
        assert_matches!(
            packet_of([base(1), unicast(2), base(3)]),
            Err(PacketError::DuplicateBase)
        );
    }

    #[test]
    fn compatible_compositions() {
        packet_of([base(1), beacon(), broadcast(), unicast(2), link_request(2)]).unwrap();
        packet_of([base(1), broadcast(), broadcast(), unicast(2)]).unwrap();
        packet_of([base(1), unicast(2), unicast(2)]).unwrap();
        packet_of([base(1), DmeRequestHeader.into(), beacon()]).unwrap();
        packet_of([base(1), unicast(2), DmeResponseHeader::default().into()]).unwrap();
    }

    #[test]
    fn beacon_must_come_first() {
        assert_matches!(
            packet_of([base(1), broadcast(), beacon()]),
            Err(PacketError::BeaconNotFirst)
        );
        assert_matches!(
            packet_of([base(1), unicast(2), beacon()]),
            Err(PacketError::BeaconNotFirst)
        );
        assert_matches!(
            packet_of([base(1), beacon(), beacon()]),
            Err(PacketError::BeaconNotFirst)
        );
    }

    #[test]
    fn broadcast_after_unicast() {
        assert_matches!(
            packet_of([base(1), unicast(2), broadcast()]),
            Err(PacketError::BroadcastAfterUnicast)
        );
        assert_matches!(
            packet_of([base(1), link_request(2), broadcast()]),
            Err(PacketError::BroadcastAfterUnicast)
        );
    }

    #[test]
    fn conflicting_destination_leaves_packet_untouched() {
        let mut packet = packet_of([base(1), unicast(2)]).unwrap();
        let bits = packet.bits();
        assert_matches!(
            packet.add_message(Some(link_request(3)), Some(Box::new(FixedSizePayload(5)))),
            Err(PacketError::ConflictingDestination { existing, new })
                if existing == station(2) && new == station(3)
        );
        assert_eq!(2, packet.len());
        assert_eq!(bits, packet.bits());
    }

    #[test]
    fn destination_precedence() {
        assert_eq!(MacId::UNSET, Packet::new().destination());
        assert_eq!(MacId::UNSET, packet_of([base(1)]).unwrap().destination());
        assert_eq!(
            MacId::BEACON,
            packet_of([base(1), beacon(), broadcast(), unicast(2)])
                .unwrap()
                .destination()
        );
        assert_eq!(
            MacId::BROADCAST,
            packet_of([base(1), broadcast(), unicast(2)])
                .unwrap()
                .destination()
        );
        assert_eq!(
            station(2),
            packet_of([base(1), unicast(2), DmeRequestHeader.into()])
                .unwrap()
                .destination()
        );
    }

    #[test]
    fn origin() {
        assert_eq!(MacId::UNSET, Packet::new().origin());
        let mut packet = packet_of([base(7), unicast(2)]).unwrap();
        assert_eq!(station(7), packet.origin());
        packet.erase(0).unwrap();
        assert_eq!(MacId::UNSET, packet.origin());
    }

    #[test]
    fn bits_sum_headers_and_payloads() {
        let mut packet = Packet::new();
        packet
            .add_message(None, Some(Box::new(FixedSizePayload(3))))
            .unwrap();
        packet.add_message(Some(base(1)), None).unwrap();
        packet
            .add_message(Some(broadcast()), Some(Box::new(FixedSizePayload(100))))
            .unwrap();
        packet.add_message(None, None).unwrap();
        assert_eq!(3 + 70 + 5 + 100, packet.bits());
    }

    #[test]
    fn clone_is_independent() {
        let mut original = Packet::new();
        original.add_message(Some(base(1)), None).unwrap();
        original
            .add_message(Some(unicast(2)), Some(Box::new(FixedSizePayload(10))))
            .unwrap();

        let mut copy = original.clone();
        copy.messages_mut()[1].payload = Some(Box::new(FixedSizePayload(20)));
        copy.base_mut().unwrap().src_id = station(9);
        for header in copy.unicast_headers_mut() {
            header.seq = SequenceNumber::new(3);
        }

        assert_eq!(70 + 73 + 10, original.bits());
        assert_eq!(70 + 73 + 20, copy.bits());
        assert_eq!(station(1), original.origin());
        assert_eq!(station(9), copy.origin());
        assert_matches!(
            &original.messages()[1].header,
            Some(Header::Unicast(header)) if header.seq == SequenceNumber::UNSET
        );
    }

    #[test]
    fn callbacks_are_not_cloned() {
        let calls = Rc::new(Cell::new(0));
        let mut packet = packet_of([base(1)]).unwrap();
        packet.add_callback({
            let calls = calls.clone();
            move |packet| {
                assert_eq!(1, packet.len());
                calls.set(calls.get() + 1);
            }
        });

        let mut copy = packet.clone();
        copy.notify_callbacks();
        assert_eq!(0, calls.get());

        packet.notify_callbacks();
        assert_eq!(1, calls.get());
    }

    #[test]
    fn accessors() {
        let packet = packet_of([base(1), beacon(), unicast(2)]).unwrap();
        assert!(packet.contains(FrameType::Beacon));
        assert!(!packet.contains(FrameType::Broadcast));
        assert_eq!(Some(station(1)), packet.base().map(|base| base.src_id));
        assert_eq!(3, packet.headers().count());
        assert_eq!(0, packet.payloads().count());
    }
}
