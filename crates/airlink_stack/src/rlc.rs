//! Radio link control sublayer: queues datagrams per destination, cuts them
//! into segments which fit into the packets the MAC asks for, and reassembles
//! received segments.

use {
    crate::{
        arq::Arq,
        layer::{Binding, LayerError, Priority},
        net::{Datagram, Net},
    },
    ahash::AHashMap,
    airlink_proto::{
        FrameType, Header, MacId, Packet,
        header::{BaseHeader, BroadcastHeader, FragmentFlags, UnicastHeader},
        payload::Payload,
    },
    core::cmp::Reverse,
    log::{debug, trace, warn},
    std::collections::{BTreeMap, VecDeque},
};

/// RLC sublayer, which sits between the [`Net`] layer and the [`Arq`]
/// sublayer.
pub trait Rlc {
    /// Binding to the network layer above.
    fn upper(&self) -> &Binding<dyn Net>;

    /// Binding to the ARQ sublayer below.
    fn lower(&self) -> &Binding<dyn Arq>;

    /// Queues a datagram for transmission to `dest`.
    ///
    /// # Errors
    ///
    /// Errors if the datagram cannot be queued.
    fn receive_from_upper(
        &mut self,
        datagram: Datagram,
        dest: MacId,
        priority: Priority,
    ) -> Result<(), LayerError>;

    /// Builds the next packet for `dest`, taking up at most `bits` bits.
    ///
    /// # Errors
    ///
    /// Errors if a packet cannot be built.
    fn request_segment(&mut self, bits: u32, dest: MacId) -> Result<Packet, LayerError>;

    /// Builds the packet for frame `frame_index` of a multi-frame burst to
    /// `dest`, taking up at most `bits` bits.
    ///
    /// # Errors
    ///
    /// Errors if a packet cannot be built.
    fn request_burst_segment(
        &mut self,
        bits: u32,
        dest: MacId,
        frame_index: u32,
    ) -> Result<Packet, LayerError> {
        _ = frame_index;
        self.request_segment(bits, dest)
    }

    /// Receives a packet from the ARQ sublayer, and passes every completed
    /// datagram up.
    ///
    /// # Errors
    ///
    /// Errors if passing a datagram up fails.
    fn receive_from_lower(&mut self, packet: Packet) -> Result<(), LayerError>;

    /// Queues a control packet which bypasses the datagram queues.
    ///
    /// # Errors
    ///
    /// Errors if the packet cannot be queued.
    fn receive_injection_from_lower(
        &mut self,
        packet: Packet,
        priority: Priority,
    ) -> Result<(), LayerError>;

    /// Gets if anything is queued for `dest`.
    fn is_there_more_data(&self, dest: MacId) -> bool;

    /// Gets the number of hops to the nearest ground station from the network
    /// layer.
    ///
    /// # Errors
    ///
    /// Errors if the network layer is not wired, or keeps no routing
    /// information.
    fn num_hops_to_gs(&self) -> Result<u32, LayerError> {
        self.upper().call(|net| net.num_hops_to_gs())
    }

    /// Forwards a neighbor's hop count to the network layer.
    ///
    /// # Errors
    ///
    /// Errors if the network layer is not wired, or keeps no routing
    /// information.
    fn report_num_hops_to_gs(&mut self, id: MacId, hops: u32) -> Result<(), LayerError> {
        self.upper()
            .call(|net| net.report_num_hops_to_gs(id, hops))
    }
}

/// Part of a datagram carried by one message.
///
/// The segment keeps a cheap handle to the whole datagram, and records which
/// bits of it this segment covers. The bytes themselves are not split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPayload {
    /// Datagram this segment is cut from.
    pub datagram: Datagram,
    /// Offset of the first bit of this segment in the datagram.
    pub offset: u32,
    /// Number of bits in this segment.
    pub len: u32,
}

impl Payload for SegmentPayload {
    fn bits(&self) -> u32 {
        self.len
    }
}

/// Configuration of a [`SegmentingRlc`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RlcConfig {
    /// Maximum number of datagrams queued per destination.
    pub max_queued_datagrams: usize,
}

impl Default for RlcConfig {
    fn default() -> Self {
        Self {
            max_queued_datagrams: 256,
        }
    }
}

#[derive(Debug)]
struct Outgoing {
    datagram: Datagram,
    sent_bits: u32,
}

impl Outgoing {
    fn left_bits(&self) -> u32 {
        self.datagram.bits() - self.sent_bits
    }
}

#[derive(Debug, Default)]
struct DestQueue {
    by_priority: BTreeMap<Reverse<Priority>, VecDeque<Outgoing>>,
}

impl DestQueue {
    fn len(&self) -> usize {
        self.by_priority.values().map(VecDeque::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.by_priority.is_empty()
    }

    fn left_bits(&self) -> u32 {
        self.by_priority
            .values()
            .flatten()
            .map(Outgoing::left_bits)
            .fold(0, u32::saturating_add)
    }

    fn front_mut(&mut self) -> Option<&mut Outgoing> {
        self.by_priority.values_mut().find_map(VecDeque::front_mut)
    }

    fn pop_front(&mut self) {
        if let Some(mut entry) = self.by_priority.first_entry() {
            entry.get_mut().pop_front();
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

#[derive(Debug)]
struct Reassembly {
    datagram: Datagram,
    received_bits: u32,
}

/// RLC sublayer which segments datagrams at bit granularity.
///
/// Every packet it builds starts with a [`BaseHeader`] for the MAC to fill in,
/// followed by one message per segment: a [`BroadcastHeader`] for
/// [`MacId::BROADCAST`], or a [`UnicastHeader`] for a station. One packet may
/// carry segments of several datagrams, served in priority order, and a
/// datagram which does not fit is continued in the next packet.
///
/// Injected control packets are kept apart, and always leave before queued
/// datagrams. Link-establishment packets travel over the shared broadcast
/// channel, so they are handed out when the MAC asks for
/// [`MacId::BROADCAST`].
///
/// On receive, segments are reassembled per sending station and channel
/// using the fragment start and end flags of their headers.
///
/// Segments only account for bits. Every [`SegmentPayload`] carries a handle
/// to the whole datagram rather than its own slice of the bytes, so the
/// receiver takes the datagram from the first segment and checks the rest
/// only for their offset and length.
#[derive(Debug)]
pub struct SegmentingRlc {
    config: RlcConfig,
    upper: Binding<dyn Net>,
    lower: Binding<dyn Arq>,
    queues: AHashMap<MacId, DestQueue>,
    injected: AHashMap<MacId, BTreeMap<Reverse<Priority>, VecDeque<Packet>>>,
    // keyed by sender and channel
    reassembly: AHashMap<(MacId, MacId), Reassembly>,
}

impl SegmentingRlc {
    /// Creates a sublayer with empty queues.
    #[must_use]
    pub fn new(config: RlcConfig) -> Self {
        Self {
            config,
            upper: Binding::new("net"),
            lower: Binding::new("arq"),
            queues: AHashMap::new(),
            injected: AHashMap::new(),
            reassembly: AHashMap::new(),
        }
    }

    /// Gets the configuration of this sublayer.
    #[must_use]
    pub const fn config(&self) -> &RlcConfig {
        &self.config
    }

    /// Number of datagrams queued for `dest`.
    #[must_use]
    pub fn num_queued(&self, dest: MacId) -> usize {
        self.queues.get(&dest).map_or(0, DestQueue::len)
    }

    /// Number of bits still queued for `dest`.
    #[must_use]
    pub fn queued_bits(&self, dest: MacId) -> u32 {
        self.queues.get(&dest).map_or(0, DestQueue::left_bits)
    }

    fn pop_injected(&mut self, bits: u32, dest: MacId) -> Option<Packet> {
        let queues = self.injected.get_mut(&dest)?;
        let mut entry = queues.first_entry()?;
        let fits = entry
            .get()
            .front()
            .is_some_and(|packet| packet.bits() <= bits);
        if !fits {
            warn!("Injected packet for {dest} does not fit into {bits} bits, holding it back");
            return None;
        }
        let packet = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if queues.is_empty() {
            self.injected.remove(&dest);
        }
        packet
    }

    fn segment_header(dest: MacId, fragment: FragmentFlags) -> Result<Header, LayerError> {
        if dest == MacId::BROADCAST || dest == MacId::BEACON {
            return Ok(BroadcastHeader { fragment }.into());
        }
        let mut header = UnicastHeader::new(dest)?;
        header.fragment = fragment;
        Ok(header.into())
    }

    fn fill(&mut self, packet: &mut Packet, bits: u32, dest: MacId) -> Result<(), LayerError> {
        let header_bits = if dest.is_sentinel() {
            BroadcastHeader::BITS
        } else {
            UnicastHeader::BITS
        };

        let Some(queue) = self.queues.get_mut(&dest) else {
            return Ok(());
        };
        while let Some(outgoing) = queue.front_mut() {
            let free_bits = bits.saturating_sub(packet.bits());
            let left_bits = outgoing.left_bits();
            // an empty datagram still needs its header to arrive
            let needed_bits = if left_bits == 0 {
                header_bits
            } else {
                header_bits + 1
            };
            if free_bits < needed_bits {
                break;
            }
            let len = left_bits.min(free_bits - header_bits);
            let fragment = FragmentFlags {
                start: outgoing.sent_bits == 0,
                end: len == left_bits,
            };
            let segment = SegmentPayload {
                datagram: outgoing.datagram.clone(),
                offset: outgoing.sent_bits,
                len,
            };
            packet.add_message(
                Some(Self::segment_header(dest, fragment)?),
                Some(Box::new(segment)),
            )?;
            trace!(
                "Segment of {len} / {left_bits} bits for {dest}, start: {}, end: {}",
                fragment.start, fragment.end
            );

            outgoing.sent_bits += len;
            if fragment.end {
                queue.pop_front();
            }
        }
        if queue.is_empty() {
            self.queues.remove(&dest);
        }
        Ok(())
    }

    fn reassemble(
        &mut self,
        (origin, channel): (MacId, MacId),
        fragment: FragmentFlags,
        segment: &SegmentPayload,
    ) -> Option<Datagram> {
        let key = (origin, channel);
        if fragment.start {
            if let Some(stale) = self.reassembly.remove(&key) {
                warn!(
                    "Discarding incomplete datagram from {origin} after {} / {} bits",
                    stale.received_bits,
                    stale.datagram.bits()
                );
            }
            self.reassembly.insert(
                key,
                Reassembly {
                    datagram: segment.datagram.clone(),
                    received_bits: 0,
                },
            );
        }

        let Some(reassembly) = self.reassembly.get_mut(&key) else {
            warn!("Discarding segment from {origin} without a start");
            return None;
        };
        if reassembly.received_bits != segment.offset {
            warn!(
                "Discarding datagram from {origin}, expected bit {} but got {}",
                reassembly.received_bits, segment.offset
            );
            self.reassembly.remove(&key);
            return None;
        }
        reassembly.received_bits += segment.len;

        if !fragment.end {
            return None;
        }
        let reassembly = self.reassembly.remove(&key)?;
        if reassembly.received_bits == reassembly.datagram.bits() {
            Some(reassembly.datagram)
        } else {
            warn!(
                "Discarding datagram from {origin} ending after {} / {} bits",
                reassembly.received_bits,
                reassembly.datagram.bits()
            );
            None
        }
    }
}

impl Rlc for SegmentingRlc {
    fn upper(&self) -> &Binding<dyn Net> {
        &self.upper
    }

    fn lower(&self) -> &Binding<dyn Arq> {
        &self.lower
    }

    fn receive_from_upper(
        &mut self,
        datagram: Datagram,
        dest: MacId,
        priority: Priority,
    ) -> Result<(), LayerError> {
        if dest == MacId::UNSET || dest == MacId::DME {
            return Err(LayerError::UnknownId { id: dest });
        }
        if self.num_queued(dest) >= self.config.max_queued_datagrams {
            warn!("Dropping datagram for {dest}, queue is full");
            return Err(LayerError::QueueFull { dest });
        }

        // nothing is queued unless the layers below accepted the demand
        let queued_bits = self.queued_bits(dest).saturating_add(datagram.bits());
        self.lower
            .call(|arq| arq.notify_outgoing(queued_bits, dest))?;
        trace!("{queued_bits} bits queued for {dest}");

        self.queues
            .entry(dest)
            .or_default()
            .by_priority
            .entry(Reverse(priority))
            .or_default()
            .push_back(Outgoing {
                datagram,
                sent_bits: 0,
            });
        Ok(())
    }

    fn request_segment(&mut self, bits: u32, dest: MacId) -> Result<Packet, LayerError> {
        self.request_burst_segment(bits, dest, 0)
    }

    fn request_burst_segment(
        &mut self,
        bits: u32,
        dest: MacId,
        frame_index: u32,
    ) -> Result<Packet, LayerError> {
        if bits < BaseHeader::BITS {
            warn!("Cannot fit a packet into {bits} bits");
            return Ok(Packet::new());
        }
        // control packets only go out at the start of a burst
        if frame_index == 0 {
            if let Some(packet) = self.pop_injected(bits, dest) {
                debug!("Serving injected packet for {dest}");
                return Ok(packet);
            }
        }

        let mut packet = Packet::new();
        packet.add_message(Some(BaseHeader::default().into()), None)?;
        self.fill(&mut packet, bits, dest)?;
        Ok(packet)
    }

    fn receive_from_lower(&mut self, packet: Packet) -> Result<(), LayerError> {
        let origin = packet.origin();
        let mut complete = Vec::new();
        for message in packet.messages() {
            let Some(segment) = message
                .payload
                .as_deref()
                .and_then(<dyn Payload>::downcast_ref::<SegmentPayload>)
            else {
                continue;
            };
            let (channel, fragment) = match &message.header {
                Some(Header::Broadcast(header)) => (MacId::BROADCAST, header.fragment),
                Some(header) => match header.as_unicast() {
                    Some(unicast) => (unicast.dest_id(), unicast.fragment),
                    None => continue,
                },
                None => continue,
            };
            if let Some(datagram) = self.reassemble((origin, channel), fragment, segment) {
                complete.push(datagram);
            }
        }

        for datagram in complete {
            trace!("Reassembled {} bits from {origin}", datagram.bits());
            self.upper
                .call(|net| net.receive_from_lower(datagram, origin))?;
        }
        Ok(())
    }

    fn receive_injection_from_lower(
        &mut self,
        packet: Packet,
        priority: Priority,
    ) -> Result<(), LayerError> {
        let is_link_management = packet.contains(FrameType::LinkEstablishmentRequest)
            || packet.contains(FrameType::LinkEstablishmentReply);
        let key = if is_link_management {
            MacId::BROADCAST
        } else {
            packet.destination()
        };
        debug!("Queued injected packet for {key} with priority {}", priority.0);
        self.injected
            .entry(key)
            .or_default()
            .entry(Reverse(priority))
            .or_default()
            .push_back(packet);
        Ok(())
    }

    fn is_there_more_data(&self, dest: MacId) -> bool {
        self.queues.contains_key(&dest) || self.injected.contains_key(&dest)
    }
}

impl Default for SegmentingRlc {
    fn default() -> Self {
        Self::new(RlcConfig::default())
    }
}
