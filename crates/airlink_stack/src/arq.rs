//! Automatic repeat request sublayer: sequences frames on protected links,
//! acknowledges received frames, and retransmits frames the peer reports as
//! missing.

use {
    crate::{
        layer::{Binding, LayerError, PRIORITY_LINK_MANAGEMENT},
        mac::Mac,
        rlc::Rlc,
    },
    ahash::AHashMap,
    airlink_proto::{
        MacId, Packet, SequenceNumber,
        header::UnicastHeader,
        srej::SrejBitmap,
    },
    derive_more::{Display, Error},
    log::{debug, trace, warn},
    std::collections::VecDeque,
};

/// ARQ sublayer, which sits between the [`Rlc`] sublayer and the [`Mac`]
/// sublayer.
pub trait Arq {
    /// Binding to the RLC sublayer above.
    fn upper(&self) -> &Binding<dyn Rlc>;

    /// Binding to the MAC sublayer below.
    fn lower(&self) -> &Binding<dyn Mac>;

    /// Tells the MAC how many bits are queued for `dest`.
    ///
    /// # Errors
    ///
    /// Errors if the MAC is not wired.
    fn notify_outgoing(&mut self, bits: u32, dest: MacId) -> Result<(), LayerError> {
        self.lower().call(|mac| mac.notify_outgoing(bits, dest))
    }

    /// Builds the next packet for `dest`, taking up at most `bits` bits.
    ///
    /// # Errors
    ///
    /// Errors if the RLC is not wired, or fails to build a packet.
    fn request_segment(&mut self, bits: u32, dest: MacId) -> Result<Packet, LayerError>;

    /// Builds the packet for frame `frame_index` of a multi-frame burst to
    /// `dest`, taking up at most `bits` bits.
    ///
    /// # Errors
    ///
    /// Errors if the RLC is not wired, or fails to build a packet.
    fn request_burst_segment(
        &mut self,
        bits: u32,
        dest: MacId,
        frame_index: u32,
    ) -> Result<Packet, LayerError> {
        _ = frame_index;
        self.request_segment(bits, dest)
    }

    /// Receives a packet from the MAC.
    ///
    /// # Errors
    ///
    /// Errors if passing the packet up fails.
    fn receive_from_lower(&mut self, packet: Packet) -> Result<(), LayerError>;

    /// Hands a control packet to the RLC, bypassing its datagram queues.
    ///
    /// # Errors
    ///
    /// Errors if the RLC is not wired, or rejects the packet.
    fn inject_into_upper(&mut self, packet: Packet) -> Result<(), LayerError> {
        self.upper()
            .call(|rlc| rlc.receive_injection_from_lower(packet, PRIORITY_LINK_MANAGEMENT))
    }

    /// Called by the MAC when a link to `id` has been established.
    ///
    /// # Errors
    ///
    /// Errors if link state could not be set up.
    fn notify_about_new_link(&mut self, id: MacId) -> Result<(), LayerError>;

    /// Called by the MAC when the link to `id` has been torn down.
    ///
    /// # Errors
    ///
    /// Errors if no link to `id` is known.
    fn notify_about_removed_link(&mut self, id: MacId) -> Result<(), LayerError>;

    /// Gets if frames to `id` should be sequenced and acknowledged.
    fn should_link_be_arq_protected(&self, id: MacId) -> bool;

    /// Gets if anything is waiting to be sent to `dest`.
    ///
    /// # Errors
    ///
    /// Errors if the RLC is not wired.
    fn is_there_more_data(&self, dest: MacId) -> Result<bool, LayerError> {
        self.upper().with(|rlc| rlc.is_there_more_data(dest))
    }

    /// Advances time by `num_slots` slots.
    ///
    /// Called by the MAC at the start of every slot.
    fn update(&mut self, num_slots: u64) {
        _ = num_slots;
    }

    /// Forwards a neighbor's hop count towards the network layer.
    ///
    /// # Errors
    ///
    /// Errors if a layer above is not wired, or keeps no routing information.
    fn report_num_hops_to_gs(&mut self, id: MacId, hops: u32) -> Result<(), LayerError> {
        self.upper()
            .call(|rlc| rlc.report_num_hops_to_gs(id, hops))
    }

    /// Gets the number of hops to the nearest ground station from the network
    /// layer.
    ///
    /// # Errors
    ///
    /// Errors if a layer above is not wired, or keeps no routing information.
    fn num_hops_to_gs(&self) -> Result<u32, LayerError> {
        self.upper().call(|rlc| rlc.num_hops_to_gs())
    }
}

/// ARQ sublayer which protects no link, and forwards everything untouched.
#[derive(Debug)]
pub struct PassThroughArq {
    upper: Binding<dyn Rlc>,
    lower: Binding<dyn Mac>,
}

impl PassThroughArq {
    /// Creates the sublayer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            upper: Binding::new("rlc"),
            lower: Binding::new("mac"),
        }
    }
}

impl Default for PassThroughArq {
    fn default() -> Self {
        Self::new()
    }
}

impl Arq for PassThroughArq {
    fn upper(&self) -> &Binding<dyn Rlc> {
        &self.upper
    }

    fn lower(&self) -> &Binding<dyn Mac> {
        &self.lower
    }

    fn request_segment(&mut self, bits: u32, dest: MacId) -> Result<Packet, LayerError> {
        self.upper.call(|rlc| rlc.request_segment(bits, dest))
    }

    fn request_burst_segment(
        &mut self,
        bits: u32,
        dest: MacId,
        frame_index: u32,
    ) -> Result<Packet, LayerError> {
        self.upper
            .call(|rlc| rlc.request_burst_segment(bits, dest, frame_index))
    }

    fn receive_from_lower(&mut self, packet: Packet) -> Result<(), LayerError> {
        self.upper.call(|rlc| rlc.receive_from_lower(packet))
    }

    fn notify_about_new_link(&mut self, id: MacId) -> Result<(), LayerError> {
        trace!("New link to {id}");
        Ok(())
    }

    fn notify_about_removed_link(&mut self, id: MacId) -> Result<(), LayerError> {
        trace!("Removed link to {id}");
        Ok(())
    }

    fn should_link_be_arq_protected(&self, _id: MacId) -> bool {
        false
    }
}

/// Configuration of a [`SelectiveRepeatArq`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArqConfig {
    /// Maximum number of unacknowledged frames in flight per link, and the
    /// window used for ordering sequence numbers.
    ///
    /// Must be in `1..=`[`SequenceNumber::MAX_WINDOW`].
    pub window_size: u8,
    /// Whether links to stations are ARQ-protected.
    pub protect_unicast: bool,
    /// Slots after which a frame which is still unacknowledged is sent again.
    ///
    /// This recovers frames after which the peer receives nothing it could
    /// report them missing in, such as the last frame of a transfer. 0 is
    /// treated as 1.
    pub resend_after: u64,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            protect_unicast: true,
            resend_after: 16,
        }
    }
}

/// [`ArqConfig::window_size`] is out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("window size {window_size} is out of range")]
pub struct InvalidWindow {
    /// Window size which was configured.
    pub window_size: u8,
}

impl ArqConfig {
    /// Checks that this configuration is usable.
    ///
    /// # Errors
    ///
    /// Errors if the window is 0, or so large that windowed comparisons
    /// become ambiguous.
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_stack::arq::ArqConfig;
    ///
    /// assert!(ArqConfig::default().validate().is_ok());
    ///
    /// let config = ArqConfig {
    ///     window_size: 200,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub const fn validate(&self) -> Result<(), InvalidWindow> {
        if self.window_size == 0 || self.window_size > SequenceNumber::MAX_WINDOW {
            Err(InvalidWindow {
                window_size: self.window_size,
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct Sent {
    seq: SequenceNumber,
    packet: Packet,
    resend_at: u64,
}

#[derive(Debug)]
struct Link {
    protected: bool,
    // send side
    next_seq: SequenceNumber,
    unacked: VecDeque<Sent>,
    retransmit: VecDeque<SequenceNumber>,
    // receive side
    next_expected: SequenceNumber,
    out_of_order: AHashMap<SequenceNumber, Packet>,
    ack_pending: bool,
}

impl Link {
    fn new(protected: bool) -> Self {
        Self {
            protected,
            next_seq: SequenceNumber::FIRST,
            unacked: VecDeque::new(),
            retransmit: VecDeque::new(),
            next_expected: SequenceNumber::FIRST,
            out_of_order: AHashMap::new(),
            ack_pending: false,
        }
    }

    fn srej(&self, window: u8) -> SrejBitmap {
        let Some(furthest) = self
            .out_of_order
            .keys()
            .filter_map(|seq| self.next_expected.forward_distance(*seq))
            .max()
        else {
            return SrejBitmap::default();
        };
        let missing = (0..furthest.min(window))
            .map(|steps| self.next_expected + steps)
            .filter(|seq| !self.out_of_order.contains_key(seq));
        SrejBitmap::from_missing(self.next_expected, missing)
    }

    fn first_due(&self, slot: u64) -> Option<SequenceNumber> {
        self.unacked
            .iter()
            .find(|sent| sent.resend_at <= slot)
            .map(|sent| sent.seq)
    }

    fn stamp(&self, header: &mut UnicastHeader, seq: SequenceNumber, window: u8) {
        header.use_arq = true;
        header.seq = seq;
        header.next_expected = self.next_expected;
        header.srej = self.srej(window);
    }

    fn on_ack(&mut self, next_expected: SequenceNumber, srej: SrejBitmap, window: u8) {
        let before = self.unacked.len();
        self.unacked
            .retain(|sent| !sent.seq.is_lower_than(next_expected, window));
        let acked = before - self.unacked.len();
        if acked > 0 {
            trace!("{acked} frames acknowledged, next expected by peer: {next_expected}");
        }
        let unacked = &self.unacked;
        self.retransmit
            .retain(|seq| unacked.iter().any(|sent| sent.seq == *seq));

        for seq in srej.iter(next_expected) {
            let is_unacked = self.unacked.iter().any(|sent| sent.seq == seq);
            if is_unacked && !self.retransmit.contains(&seq) {
                debug!("Peer is missing frame {seq}, scheduling retransmission");
                self.retransmit.push_back(seq);
            }
        }
    }
}

/// Selective-repeat ARQ sublayer.
///
/// Every packet sent over a protected link is given the next
/// [`SequenceNumber`] of that link, and a copy is kept until the peer
/// acknowledges it. Every such packet also carries the receive state of the
/// link: the next sequence number expected from the peer, and a
/// [`SrejBitmap`] of frames missing before the furthest one received.
///
/// On receive, frames are passed up strictly in order. Frames arriving ahead
/// of a gap are held back until the gap is filled, and frames from before the
/// window (which the peer sent again since our acknowledgement was lost) are
/// dropped as duplicates.
///
/// When the MAC asks for a packet, frames the peer reported missing are
/// retransmitted first. If the window is full without any frame reported
/// missing, the oldest unacknowledged frame is retransmitted instead, so that
/// a lost acknowledgement cannot stall the link. A frame left unacknowledged
/// for [`ArqConfig::resend_after`] slots is retransmitted too, which recovers
/// the last frame of a transfer. When there is nothing to send but an
/// acknowledgement is owed, a header without payload carries it.
#[derive(Debug)]
pub struct SelectiveRepeatArq {
    config: ArqConfig,
    upper: Binding<dyn Rlc>,
    lower: Binding<dyn Mac>,
    slot: u64,
    links: AHashMap<MacId, Link>,
}

impl SelectiveRepeatArq {
    /// Creates the sublayer.
    ///
    /// # Errors
    ///
    /// Errors if `config` is not valid.
    pub fn new(config: ArqConfig) -> Result<Self, InvalidWindow> {
        config.validate()?;
        Ok(Self {
            config,
            upper: Binding::new("rlc"),
            lower: Binding::new("mac"),
            slot: 0,
            links: AHashMap::new(),
        })
    }

    /// Gets the configuration of this sublayer.
    #[must_use]
    pub const fn config(&self) -> &ArqConfig {
        &self.config
    }

    /// Number of frames sent to `id` which have not been acknowledged yet.
    ///
    /// # Errors
    ///
    /// Errors if no link to `id` is known.
    pub fn num_unacked(&self, id: MacId) -> Result<usize, LayerError> {
        self.links
            .get(&id)
            .map(|link| link.unacked.len())
            .ok_or(LayerError::UnknownId { id })
    }

    /// Next sequence number expected from `id`.
    ///
    /// # Errors
    ///
    /// Errors if no link to `id` is known.
    pub fn next_expected(&self, id: MacId) -> Result<SequenceNumber, LayerError> {
        self.links
            .get(&id)
            .map(|link| link.next_expected)
            .ok_or(LayerError::UnknownId { id })
    }

    fn resend_at(&self) -> u64 {
        self.slot.saturating_add(self.config.resend_after.max(1))
    }

    fn link_mut(&mut self, id: MacId) -> &mut Link {
        let protected = self.should_link_be_arq_protected(id);
        self.links.entry(id).or_insert_with(|| Link::new(protected))
    }

    fn retransmission(&mut self, bits: u32, dest: MacId) -> Option<Packet> {
        let window = self.config.window_size;
        let (slot, resend_at) = (self.slot, self.resend_at());
        let link = self.links.get_mut(&dest)?;
        let window_full = link.unacked.len() >= usize::from(window);
        let seq = match link.retransmit.front() {
            Some(seq) => *seq,
            None if window_full => link.unacked.front()?.seq,
            None => link.first_due(slot)?,
        };
        let sent = link.unacked.iter_mut().find(|sent| sent.seq == seq)?;
        if sent.packet.bits() > bits {
            return None;
        }
        sent.resend_at = resend_at;
        let mut packet = sent.packet.clone();
        link.retransmit.retain(|s| *s != seq);
        for header in packet.unicast_headers_mut() {
            link.stamp(header, seq, window);
        }
        link.ack_pending = false;
        debug!("Retransmitting frame {seq} to {dest}");
        Some(packet)
    }

    fn sequence(
        &mut self,
        mut packet: Packet,
        bits: u32,
        dest: MacId,
    ) -> Result<Packet, LayerError> {
        let window = self.config.window_size;
        let resend_at = self.resend_at();
        let link = self.link_mut(dest);
        let carries_data = packet.unicast_headers_mut().next().is_some();
        if carries_data {
            let seq = link.next_seq;
            link.next_seq.increment();
            for header in packet.unicast_headers_mut() {
                link.stamp(header, seq, window);
            }
            trace!("Sending frame {seq} to {dest}");
            link.unacked.push_back(Sent {
                seq,
                packet: packet.clone(),
                resend_at,
            });
            link.ack_pending = false;
        } else if link.ack_pending
            && !packet.is_empty()
            && packet.bits() + UnicastHeader::BITS <= bits
        {
            let mut header = UnicastHeader::new(dest)?;
            link.stamp(&mut header, SequenceNumber::UNSET, window);
            packet.add_message(Some(header.into()), None)?;
            trace!("Sending acknowledgement to {dest}");
            link.ack_pending = false;
        }
        Ok(packet)
    }

    fn receive_protected(
        &mut self,
        origin: MacId,
        header: UnicastHeader,
        packet: Packet,
    ) -> Result<(), LayerError> {
        let window = self.config.window_size;
        let link = self.link_mut(origin);
        link.on_ack(header.next_expected, header.srej, window);

        let seq = header.seq;
        if !seq.is_set() {
            // acknowledgement only
            return Ok(());
        }
        link.ack_pending = true;

        if seq == link.next_expected {
            let mut deliver = vec![packet];
            link.next_expected.increment();
            while let Some(next) = link.out_of_order.remove(&link.next_expected) {
                deliver.push(next);
                link.next_expected.increment();
            }
            trace!(
                "Delivering {} frames from {origin}, next expected: {}",
                deliver.len(),
                link.next_expected
            );
            for packet in deliver {
                self.upper.call(|rlc| rlc.receive_from_lower(packet))?;
            }
        } else if seq.is_higher_than(link.next_expected, window) {
            if link.out_of_order.insert(seq, packet).is_some() {
                warn!("Dropping duplicate frame {seq} from {origin}");
            } else {
                debug!(
                    "Frame {seq} from {origin} arrived early, expected {}",
                    link.next_expected
                );
            }
        } else {
            warn!("Dropping duplicate frame {seq} from {origin}");
        }
        Ok(())
    }
}

impl Arq for SelectiveRepeatArq {
    fn upper(&self) -> &Binding<dyn Rlc> {
        &self.upper
    }

    fn lower(&self) -> &Binding<dyn Mac> {
        &self.lower
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
        if !self.should_link_be_arq_protected(dest) {
            return self
                .upper
                .call(|rlc| rlc.request_burst_segment(bits, dest, frame_index));
        }
        if let Some(packet) = self.retransmission(bits, dest) {
            return Ok(packet);
        }
        let packet = self
            .upper
            .call(|rlc| rlc.request_burst_segment(bits, dest, frame_index))?;
        self.sequence(packet, bits, dest)
    }

    fn receive_from_lower(&mut self, packet: Packet) -> Result<(), LayerError> {
        let origin = packet.origin();
        let arq_header = packet
            .headers()
            .filter_map(|header| header.as_unicast())
            .find(|header| header.use_arq)
            .copied();
        match arq_header {
            Some(header) if origin.is_set() => self.receive_protected(origin, header, packet),
            _ => self.upper.call(|rlc| rlc.receive_from_lower(packet)),
        }
    }

    fn notify_about_new_link(&mut self, id: MacId) -> Result<(), LayerError> {
        let link = self.link_mut(id);
        debug!("New link to {id}, protected: {}", link.protected);
        Ok(())
    }

    fn notify_about_removed_link(&mut self, id: MacId) -> Result<(), LayerError> {
        let link = self
            .links
            .remove(&id)
            .ok_or(LayerError::UnknownId { id })?;
        debug!(
            "Removed link to {id} with {} frames unacknowledged",
            link.unacked.len()
        );
        Ok(())
    }

    fn should_link_be_arq_protected(&self, id: MacId) -> bool {
        self.config.protect_unicast && !id.is_sentinel()
    }

    fn update(&mut self, num_slots: u64) {
        self.slot = self.slot.saturating_add(num_slots);
    }

    fn is_there_more_data(&self, dest: MacId) -> Result<bool, LayerError> {
        let owed = self.links.get(&dest).is_some_and(|link| {
            link.ack_pending
                || !link.retransmit.is_empty()
                || link.unacked.len() >= usize::from(self.config.window_size)
                || link.first_due(self.slot).is_some()
        });
        if owed {
            return Ok(true);
        }
        self.upper.with(|rlc| rlc.is_there_more_data(dest))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        airlink_proto::{Header, header::BaseHeader},
        assert_matches::assert_matches,
    };

    const PEER: MacId = MacId::new(5);

    fn seq(n: u8) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    fn link_with(next_expected: u8, received: &[u8]) -> Link {
        let mut link = Link::new(true);
        link.next_expected = seq(next_expected);
        for n in received {
            link.out_of_order.insert(seq(*n), Packet::new());
        }
        link
    }

    fn sent(n: u8) -> Sent {
        Sent {
            seq: seq(n),
            packet: Packet::new(),
            resend_at: u64::MAX,
        }
    }

    #[test]
    fn config_bounds() {
        let window = |window_size| ArqConfig {
            window_size,
            ..Default::default()
        };
        assert_matches!(
            window(0).validate(),
            Err(InvalidWindow { window_size: 0 })
        );
        assert!(window(1).validate().is_ok());
        assert!(window(SequenceNumber::MAX_WINDOW).validate().is_ok());
        assert!(window(SequenceNumber::MAX_WINDOW + 1).validate().is_err());
        assert!(SelectiveRepeatArq::new(window(0)).is_err());
    }

    #[test]
    fn srej_marks_gaps() {
        assert_eq!(SrejBitmap::default(), link_with(3, &[]).srej(64));
        // received 5 and 7 while waiting for 3
        let link = link_with(3, &[5, 7]);
        let srej = link.srej(64);
        let missing = srej.iter(seq(3)).collect::<Vec<_>>();
        assert_eq!(vec![seq(3), seq(4), seq(6)], missing);
    }

    #[test]
    fn srej_across_wrap() {
        let link = link_with(254, &[1]);
        let missing = link.srej(64).iter(seq(254)).collect::<Vec<_>>();
        assert_eq!(vec![seq(254), seq(255)], missing);
    }

    #[test]
    fn ack_releases_frames() {
        let mut link = Link::new(true);
        link.unacked.extend([sent(1), sent(2), sent(3)]);
        link.on_ack(seq(3), SrejBitmap::default(), 64);
        assert_eq!(1, link.unacked.len());
        assert_eq!(seq(3), link.unacked[0].seq);
    }

    #[test]
    fn srej_schedules_retransmission() {
        let mut link = Link::new(true);
        link.unacked.extend([sent(254), sent(255), sent(1), sent(2)]);
        let srej = SrejBitmap::from_missing(seq(255), [seq(255), seq(2)]);
        link.on_ack(seq(255), srej, 64);
        assert_eq!(3, link.unacked.len());
        assert_eq!(vec![seq(255), seq(2)], Vec::from(link.retransmit.clone()));

        // the same report again schedules nothing new
        link.on_ack(seq(255), srej, 64);
        assert_eq!(2, link.retransmit.len());

        // once acknowledged, pending retransmissions are dropped
        link.on_ack(seq(3), SrejBitmap::default(), 64);
        assert!(link.unacked.is_empty());
        assert!(link.retransmit.is_empty());
    }

    #[test]
    fn sentinels_are_not_protected() {
        let arq = SelectiveRepeatArq::new(ArqConfig::default()).unwrap();
        assert!(arq.should_link_be_arq_protected(PEER));
        assert!(!arq.should_link_be_arq_protected(MacId::BROADCAST));
        assert!(!arq.should_link_be_arq_protected(MacId::BEACON));

        let arq = SelectiveRepeatArq::new(ArqConfig {
            protect_unicast: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!arq.should_link_be_arq_protected(PEER));
    }

    #[test]
    fn link_lifecycle() {
        let mut arq = SelectiveRepeatArq::new(ArqConfig::default()).unwrap();
        assert_matches!(arq.num_unacked(PEER), Err(LayerError::UnknownId { .. }));
        arq.notify_about_new_link(PEER).unwrap();
        assert_eq!(Ok(0), arq.num_unacked(PEER));
        assert_eq!(Ok(SequenceNumber::FIRST), arq.next_expected(PEER));
        arq.notify_about_removed_link(PEER).unwrap();
        assert_matches!(
            arq.notify_about_removed_link(PEER),
            Err(LayerError::UnknownId { id }) if id == PEER
        );
    }

    #[test]
    fn sequences_data_packets() {
        let mut arq = SelectiveRepeatArq::new(ArqConfig::default()).unwrap();
        let mut packet = Packet::new();
        packet
            .add_message(Some(BaseHeader::default().into()), None)
            .unwrap();
        packet
            .add_message(Some(UnicastHeader::new(PEER).unwrap().into()), None)
            .unwrap();

        let first = arq.sequence(packet.clone(), 1000, PEER).unwrap();
        let second = arq.sequence(packet, 1000, PEER).unwrap();
        let seq_of = |packet: &Packet| match &packet.messages()[1].header {
            Some(Header::Unicast(header)) => (header.use_arq, header.seq),
            _ => panic!("no unicast header"),
        };
        assert_eq!((true, seq(1)), seq_of(&first));
        assert_eq!((true, seq(2)), seq_of(&second));
        assert_eq!(Ok(2), arq.num_unacked(PEER));
    }

    #[test]
    fn acknowledgement_only_header() {
        let mut arq = SelectiveRepeatArq::new(ArqConfig::default()).unwrap();
        let mut base_only = Packet::new();
        base_only
            .add_message(Some(BaseHeader::default().into()), None)
            .unwrap();

        // nothing owed
        let packet = arq.sequence(base_only.clone(), 1000, PEER).unwrap();
        assert_eq!(1, packet.len());

        arq.link_mut(PEER).ack_pending = true;
        // does not fit
        let packet = arq
            .sequence(base_only.clone(), BaseHeader::BITS + 10, PEER)
            .unwrap();
        assert_eq!(1, packet.len());

        let packet = arq.sequence(base_only, 1000, PEER).unwrap();
        assert_matches!(
            &packet.messages()[1].header,
            Some(Header::Unicast(header)) if header.use_arq && !header.seq.is_set()
        );
        assert_eq!(Ok(0), arq.num_unacked(PEER));
    }

    #[test]
    fn unacknowledged_frame_is_resent_after_timeout() {
        let mut arq = SelectiveRepeatArq::new(ArqConfig {
            resend_after: 4,
            ..Default::default()
        })
        .unwrap();
        let mut packet = Packet::new();
        packet
            .add_message(Some(BaseHeader::default().into()), None)
            .unwrap();
        packet
            .add_message(Some(UnicastHeader::new(PEER).unwrap().into()), None)
            .unwrap();
        arq.sequence(packet, 1000, PEER).unwrap();

        arq.update(3);
        assert!(arq.retransmission(1000, PEER).is_none());

        arq.update(1);
        assert_eq!(Ok(true), arq.is_there_more_data(PEER));
        // does not fit
        assert!(arq.retransmission(BaseHeader::BITS, PEER).is_none());
        let resent = arq.retransmission(1000, PEER).unwrap();
        assert_matches!(
            &resent.messages()[1].header,
            Some(Header::Unicast(header)) if header.seq == SequenceNumber::FIRST
        );

        // the timer restarts with every retransmission
        assert!(arq.retransmission(1000, PEER).is_none());
        arq.update(4);
        assert!(arq.retransmission(1000, PEER).is_some());

        // acknowledged frames are never resent
        arq.link_mut(PEER)
            .on_ack(seq(2), SrejBitmap::default(), 64);
        arq.update(10);
        assert!(arq.retransmission(1000, PEER).is_none());
        assert_eq!(Ok(0), arq.num_unacked(PEER));
    }
}
