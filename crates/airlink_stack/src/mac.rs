//! Medium access control sublayer contract, and a slot-driven MAC which
//! serves one destination per slot.

use {
    crate::{
        arq::Arq,
        layer::{Binding, LayerError},
        neighbor::NeighborTable,
        phy::Phy,
    },
    ahash::{AHashMap, AHashSet},
    airlink_proto::{
        FrameType, Header, MacId, Packet,
        header::{BaseHeader, BeaconHeader},
        position::{CprPosition, HopCount, PositionQuality},
    },
    derive_more::{Display, Error},
    log::{debug, trace, warn},
    std::{collections::VecDeque, mem},
};

/// MAC sublayer, which sits between the [`Arq`] sublayer and the [`Phy`]
/// layer.
pub trait Mac {
    /// Binding to the ARQ sublayer above.
    fn upper(&self) -> &Binding<dyn Arq>;

    /// Binding to the PHY layer below.
    fn lower(&self) -> &Binding<dyn Phy>;

    /// Tells the MAC that `bits` bits are queued for `dest`.
    ///
    /// This is called while the layers above are mid-call, so implementations
    /// must not call into them. Work which needs the upper layers is deferred
    /// until the next slot.
    ///
    /// # Errors
    ///
    /// Errors if the demand cannot be recorded.
    fn notify_outgoing(&mut self, bits: u32, dest: MacId) -> Result<(), LayerError>;

    /// Receives a packet from the PHY, heard on `center_frequency`.
    ///
    /// # Errors
    ///
    /// Errors if passing the packet up fails.
    fn receive_from_lower(&mut self, packet: Packet, center_frequency: u64)
    -> Result<(), LayerError>;

    /// Notifies the callbacks of `packet`, and hands it to the PHY for
    /// transmission on `center_frequency`.
    ///
    /// # Errors
    ///
    /// Errors if the PHY is not wired, or fails to transmit.
    fn pass_to_lower(
        &mut self,
        mut packet: Packet,
        center_frequency: u64,
    ) -> Result<(), LayerError> {
        packet.notify_callbacks();
        self.lower()
            .call(|phy| phy.receive_from_upper(packet, center_frequency))
    }

    /// Hands a control packet to the upper layers, to be sent ahead of
    /// queued data.
    ///
    /// # Errors
    ///
    /// Errors if the ARQ is not wired, or rejects the packet.
    fn inject_into_upper(&mut self, packet: Packet) -> Result<(), LayerError> {
        self.upper().call(|arq| arq.inject_into_upper(packet))
    }

    /// Number of bits the PHY can transmit in one slot.
    ///
    /// # Errors
    ///
    /// Errors if the PHY is not wired.
    fn current_datarate(&self) -> Result<u64, LayerError> {
        self.lower().with(|phy| phy.current_datarate())
    }
}

/// Slots after which an unanswered link request is sent again.
pub const LINK_REQUEST_TIMEOUT: u64 = 16;

/// Configuration of a [`SlotMac`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacConfig {
    /// Address of this station.
    pub id: MacId,
    /// Frequency every packet is transmitted on.
    pub frequency: u64,
    /// Slots between two beacons, or 0 to never send beacons.
    pub beacon_every: u32,
    /// Slots after which a neighbor which was not heard from is forgotten, or
    /// 0 to never forget neighbors.
    pub neighbor_timeout: u64,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            id: MacId::UNSET,
            frequency: 0,
            beacon_every: 0,
            neighbor_timeout: 0,
        }
    }
}

/// [`MacConfig::id`] is not the address of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("{id} is not a station address")]
pub struct InvalidStationId {
    /// Configured address.
    pub id: MacId,
}

/// Slot-driven MAC, serving one destination per slot.
///
/// The host calls [`SlotMac::update`] once per slot. In each slot the MAC
/// either sends a beacon, if one is due, or asks the ARQ for one packet
/// filling the whole slot, for the next destination with data waiting. The
/// broadcast channel and every established link take turns.
///
/// Before data can be sent to a station, a link to it is set up with a
/// link-establishment request and reply, which travel over the broadcast
/// channel ahead of any queued data.
///
/// On receive, beacons update the [`NeighborTable`] and are reported up as
/// hop counts, link requests addressed to this station are answered, and
/// packets addressed to other stations are dropped.
#[derive(Debug)]
pub struct SlotMac {
    config: MacConfig,
    upper: Binding<dyn Arq>,
    lower: Binding<dyn Phy>,
    slot: u64,
    schedule: VecDeque<MacId>,
    links: AHashSet<MacId>,
    pending_links: Vec<MacId>,
    awaiting_reply: AHashMap<MacId, u64>,
    reported_bits: AHashMap<MacId, u32>,
    neighbors: NeighborTable,
    position: CprPosition,
    position_quality: PositionQuality,
    is_cpr_odd: bool,
}

impl SlotMac {
    /// Creates a MAC with no links.
    ///
    /// # Errors
    ///
    /// Errors if the configured id is not a station address.
    pub fn new(config: MacConfig) -> Result<Self, InvalidStationId> {
        if config.id.is_sentinel() {
            return Err(InvalidStationId { id: config.id });
        }
        Ok(Self {
            config,
            upper: Binding::new("arq"),
            lower: Binding::new("phy"),
            slot: 0,
            schedule: VecDeque::from([MacId::BROADCAST]),
            links: AHashSet::new(),
            pending_links: Vec::new(),
            awaiting_reply: AHashMap::new(),
            reported_bits: AHashMap::new(),
            neighbors: NeighborTable::new(),
            position: CprPosition::default(),
            position_quality: PositionQuality::default(),
            is_cpr_odd: false,
        })
    }

    /// Gets the configuration of this MAC.
    #[must_use]
    pub const fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Number of slots passed.
    #[must_use]
    pub const fn slot(&self) -> u64 {
        self.slot
    }

    /// Stations heard from.
    #[must_use]
    pub const fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Gets if a link to `id` is established.
    #[must_use]
    pub fn has_link(&self, id: MacId) -> bool {
        self.links.contains(&id)
    }

    /// Number of bits the upper layers last reported as queued for `dest`.
    #[must_use]
    pub fn reported_bits(&self, dest: MacId) -> u32 {
        self.reported_bits.get(&dest).copied().unwrap_or_default()
    }

    /// Sets the position announced in the next beacons.
    pub const fn set_position(&mut self, position: CprPosition, quality: PositionQuality) {
        self.position = position;
        self.position_quality = quality;
    }

    /// Advances by one slot, and transmits whatever this slot is used for.
    ///
    /// # Errors
    ///
    /// Errors if a layer is not wired, or fails to build a packet.
    pub fn update(&mut self) -> Result<(), LayerError> {
        self.slot += 1;
        self.upper.with(|arq| arq.update(1))?;
        let timeout = self.config.neighbor_timeout;
        if timeout > 0 && self.slot > timeout {
            self.neighbors.remove_unseen_since(self.slot - timeout);
        }
        self.request_links()?;

        let beacon_every = u64::from(self.config.beacon_every);
        if beacon_every > 0 && self.slot % beacon_every == 0 {
            return self.send_beacon();
        }

        let Some(dest) = self.next_destination()? else {
            return Ok(());
        };
        let bits = u32::try_from(self.current_datarate()?).unwrap_or(u32::MAX);
        let mut packet = self.upper.call(|arq| arq.request_segment(bits, dest))?;
        // a lone base header carries nothing
        if packet.len() <= 1 {
            trace!("Slot {}: nothing to send to {dest}", self.slot);
            return Ok(());
        }
        if let Some(base) = packet.base_mut() {
            base.src_id = self.config.id;
        }
        trace!(
            "Slot {}: sending {} / {bits} bits to {dest}",
            self.slot,
            packet.bits()
        );
        self.pass_to_lower(packet, self.config.frequency)
    }

    /// Tears down the link to `id`.
    ///
    /// # Errors
    ///
    /// Errors if no link to `id` is established, or the ARQ fails to remove
    /// it.
    pub fn remove_link(&mut self, id: MacId) -> Result<(), LayerError> {
        if !self.links.remove(&id) {
            return Err(LayerError::UnknownId { id });
        }
        self.schedule.retain(|dest| *dest != id);
        debug!("Removed link to {id}");
        self.upper.call(|arq| arq.notify_about_removed_link(id))
    }

    fn request_links(&mut self) -> Result<(), LayerError> {
        let slot = self.slot;
        let mut timed_out = self
            .awaiting_reply
            .iter()
            .filter(|(_, sent_slot)| slot - **sent_slot >= LINK_REQUEST_TIMEOUT)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        timed_out.sort_unstable();
        for id in timed_out {
            warn!("No link reply from {id}, requesting again");
            self.awaiting_reply.remove(&id);
            self.pending_links.push(id);
        }

        for dest in mem::take(&mut self.pending_links) {
            debug!("Requesting link to {dest}");
            let packet = self.link_establishment(FrameType::LinkEstablishmentRequest, dest)?;
            self.inject_into_upper(packet)?;
            self.awaiting_reply.insert(dest, slot);
        }
        Ok(())
    }

    fn link_establishment(&self, frame_type: FrameType, dest: MacId) -> Result<Packet, LayerError> {
        let mut packet = Packet::new();
        packet.add_message(Some(BaseHeader::new(self.config.id).into()), None)?;
        packet.add_message(Some(Header::unicast_family(frame_type, dest)?), None)?;
        Ok(packet)
    }

    fn send_beacon(&mut self) -> Result<(), LayerError> {
        let hops_to_gs = match self.upper.call(|arq| arq.num_hops_to_gs()) {
            Ok(hops) => HopCount::saturating(hops),
            Err(LayerError::Unsupported { .. }) => HopCount::MAX,
            Err(err) => return Err(err),
        };
        self.is_cpr_odd = !self.is_cpr_odd;
        let beacon = BeaconHeader {
            position: self.position,
            is_cpr_odd: self.is_cpr_odd,
            hops_to_gs,
            position_quality: self.position_quality,
        };

        let mut packet = Packet::new();
        packet.add_message(Some(BaseHeader::new(self.config.id).into()), None)?;
        packet.add_message(Some(beacon.into()), None)?;
        trace!(
            "Slot {}: sending beacon, {} hops from a ground station",
            self.slot,
            hops_to_gs.get()
        );
        self.pass_to_lower(packet, self.config.frequency)
    }

    fn next_destination(&mut self) -> Result<Option<MacId>, LayerError> {
        for _ in 0..self.schedule.len() {
            let Some(dest) = self.schedule.pop_front() else {
                break;
            };
            self.schedule.push_back(dest);
            if self.upper.call(|arq| arq.is_there_more_data(dest))? {
                return Ok(Some(dest));
            }
        }
        Ok(None)
    }

    fn establish_link(&mut self, id: MacId) -> Result<(), LayerError> {
        self.pending_links.retain(|dest| *dest != id);
        self.awaiting_reply.remove(&id);
        if !self.links.insert(id) {
            return Ok(());
        }
        self.schedule.push_back(id);
        debug!("Established link to {id}");
        self.upper.call(|arq| arq.notify_about_new_link(id))
    }

    fn on_beacon(&mut self, origin: MacId, beacon: &BeaconHeader) -> Result<(), LayerError> {
        self.neighbors.update_from_beacon(origin, beacon, self.slot);
        let hops = beacon.hops_to_gs.get();
        match self
            .upper
            .call(|arq| arq.report_num_hops_to_gs(origin, hops))
        {
            Ok(()) | Err(LayerError::Unsupported { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Mac for SlotMac {
    fn upper(&self) -> &Binding<dyn Arq> {
        &self.upper
    }

    fn lower(&self) -> &Binding<dyn Phy> {
        &self.lower
    }

    fn notify_outgoing(&mut self, bits: u32, dest: MacId) -> Result<(), LayerError> {
        trace!("{bits} bits queued for {dest}");
        self.reported_bits.insert(dest, bits);
        let needs_link = !dest.is_sentinel()
            && !self.links.contains(&dest)
            && !self.awaiting_reply.contains_key(&dest)
            && !self.pending_links.contains(&dest);
        if needs_link {
            debug!("No link to {dest} yet");
            self.pending_links.push(dest);
        }
        Ok(())
    }

    fn receive_from_lower(
        &mut self,
        packet: Packet,
        center_frequency: u64,
    ) -> Result<(), LayerError> {
        let origin = packet.origin();
        if !origin.is_set() {
            warn!("Dropping packet without a base header on {center_frequency}");
            return Ok(());
        }
        if origin == self.config.id {
            return Ok(());
        }
        trace!(
            "Received {} bits from {origin} on {center_frequency}",
            packet.bits()
        );
        self.neighbors.mark_seen(origin, self.slot);

        let own_id = self.config.id;
        let mut beacon = None;
        let mut link_request = false;
        let mut link_reply = false;
        for header in packet.headers() {
            match header {
                Header::Beacon(header) => beacon = Some(*header),
                Header::LinkEstablishmentRequest(header) if header.unicast.dest_id() == own_id => {
                    link_request = true;
                }
                Header::LinkEstablishmentReply(header) if header.unicast.dest_id() == own_id => {
                    link_reply = true;
                }
                _ => {}
            }
        }

        if let Some(beacon) = beacon {
            self.on_beacon(origin, &beacon)?;
        }
        if link_request {
            debug!("Link request from {origin}");
            self.establish_link(origin)?;
            // answered even if the link exists, as the peer may have missed
            // the last reply
            let reply = self.link_establishment(FrameType::LinkEstablishmentReply, origin)?;
            self.inject_into_upper(reply)?;
        }
        if link_reply {
            self.establish_link(origin)?;
        }

        let dest = packet.destination();
        if dest.is_sentinel() || dest == own_id {
            self.upper.call(|arq| arq.receive_from_lower(packet))
        } else {
            trace!("Dropping packet from {origin} addressed to {dest}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            arq::PassThroughArq,
            layer::PRIORITY_DEFAULT,
            net::{Datagram, Net, RoutingNet},
            phy::{OutboxPhy, PhyConfig},
            rlc::{Rlc, SegmentingRlc},
        },
        airlink_proto::header::UnicastHeader,
        assert_matches::assert_matches,
        std::{cell::RefCell, rc::Rc},
    };

    const OWN: MacId = MacId::new(1);
    const PEER: MacId = MacId::new(2);

    struct Layers {
        net: Rc<RefCell<RoutingNet>>,
        mac: Rc<RefCell<SlotMac>>,
        phy: Rc<RefCell<OutboxPhy>>,
        _rlc: Rc<RefCell<SegmentingRlc>>,
        _arq: Rc<RefCell<PassThroughArq>>,
    }

    fn layers(beacon_every: u32) -> Layers {
        layers_with(MacConfig {
            id: OWN,
            frequency: 7,
            beacon_every,
            ..Default::default()
        })
    }

    fn layers_with(config: MacConfig) -> Layers {
        let net = Rc::new(RefCell::new(RoutingNet::new()));
        let rlc = Rc::new(RefCell::new(SegmentingRlc::default()));
        let arq = Rc::new(RefCell::new(PassThroughArq::new()));
        let mac = Rc::new(RefCell::new(SlotMac::new(config).unwrap()));
        let phy = Rc::new(RefCell::new(OutboxPhy::new(PhyConfig {
            datarate: 400,
            num_receivers: 1,
        })));

        let net_dyn: Rc<RefCell<dyn Net>> = net.clone();
        let rlc_dyn: Rc<RefCell<dyn Rlc>> = rlc.clone();
        let arq_dyn: Rc<RefCell<dyn Arq>> = arq.clone();
        let mac_dyn: Rc<RefCell<dyn Mac>> = mac.clone();
        let phy_dyn: Rc<RefCell<dyn Phy>> = phy.clone();
        net.borrow().lower().wire(&rlc_dyn).unwrap();
        rlc.borrow().upper().wire(&net_dyn).unwrap();
        rlc.borrow().lower().wire(&arq_dyn).unwrap();
        arq.borrow().upper().wire(&rlc_dyn).unwrap();
        arq.borrow().lower().wire(&mac_dyn).unwrap();
        mac.borrow().upper().wire(&arq_dyn).unwrap();
        mac.borrow().lower().wire(&phy_dyn).unwrap();
        phy.borrow().upper().wire(&mac_dyn).unwrap();
        Layers {
            net,
            mac,
            phy,
            _rlc: rlc,
            _arq: arq,
        }
    }

    fn sent(layers: &Layers) -> Vec<Packet> {
        layers
            .phy
            .borrow_mut()
            .drain_outbox()
            .map(|tx| tx.packet)
            .collect()
    }

    fn from_peer(header: Header) -> Packet {
        let mut packet = Packet::new();
        packet
            .add_message(Some(BaseHeader::new(PEER).into()), None)
            .unwrap();
        packet.add_message(Some(header), None).unwrap();
        packet
    }

    #[test]
    fn rejects_sentinel_id() {
        assert_matches!(
            SlotMac::new(MacConfig::default()),
            Err(InvalidStationId { id }) if id == MacId::UNSET
        );
    }

    #[test]
    fn idle_without_data() {
        let layers = layers(0);
        layers.mac.borrow_mut().update().unwrap();
        assert!(sent(&layers).is_empty());
        assert_eq!(1, layers.mac.borrow().slot());
    }

    #[test]
    fn broadcast_data_is_stamped() {
        let layers = layers(0);
        layers
            .net
            .borrow_mut()
            .send(Datagram::from(&b"hi"[..]), MacId::BROADCAST, PRIORITY_DEFAULT)
            .unwrap();
        assert_eq!(16, layers.mac.borrow().reported_bits(MacId::BROADCAST));
        layers.mac.borrow_mut().update().unwrap();

        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert_eq!(OWN, packets[0].origin());
        assert_eq!(MacId::BROADCAST, packets[0].destination());
        assert!(packets[0].bits() <= 400);
    }

    #[test]
    fn unicast_data_waits_for_link() {
        let layers = layers(0);
        layers
            .net
            .borrow_mut()
            .send(Datagram::from(&b"hi"[..]), PEER, PRIORITY_DEFAULT)
            .unwrap();

        layers.mac.borrow_mut().update().unwrap();
        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert!(packets[0].contains(FrameType::LinkEstablishmentRequest));
        assert_eq!(PEER, packets[0].destination());

        // no link yet, so nothing else goes out
        layers.mac.borrow_mut().update().unwrap();
        assert!(sent(&layers).is_empty());

        let reply = from_peer(
            Header::unicast_family(FrameType::LinkEstablishmentReply, OWN).unwrap(),
        );
        layers.phy.borrow_mut().on_reception(reply, 7).unwrap();
        assert!(layers.mac.borrow().has_link(PEER));

        layers.mac.borrow_mut().update().unwrap();
        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert!(packets[0].contains(FrameType::Unicast));
    }

    #[test]
    fn link_request_is_retried() {
        let layers = layers(0);
        layers.mac.borrow_mut().notify_outgoing(8, PEER).unwrap();
        layers.mac.borrow_mut().update().unwrap();
        assert_eq!(1, sent(&layers).len());

        for _ in 0..LINK_REQUEST_TIMEOUT {
            layers.mac.borrow_mut().update().unwrap();
        }
        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert!(packets[0].contains(FrameType::LinkEstablishmentRequest));
    }

    #[test]
    fn answers_link_request() {
        let layers = layers(0);
        let request =
            from_peer(Header::unicast_family(FrameType::LinkEstablishmentRequest, OWN).unwrap());
        layers.phy.borrow_mut().on_reception(request, 7).unwrap();
        assert!(layers.mac.borrow().has_link(PEER));

        layers.mac.borrow_mut().update().unwrap();
        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert!(packets[0].contains(FrameType::LinkEstablishmentReply));
        assert_eq!(PEER, packets[0].destination());
        assert_eq!(OWN, packets[0].origin());

        layers.mac.borrow_mut().remove_link(PEER).unwrap();
        assert!(!layers.mac.borrow().has_link(PEER));
        assert_matches!(
            layers.mac.borrow_mut().remove_link(PEER),
            Err(LayerError::UnknownId { .. })
        );
    }

    #[test]
    fn beacons() {
        let layers = layers(2);
        layers.mac.borrow_mut().set_position(
            CprPosition::new(53.5, 10.0, 30_000.0),
            PositionQuality::Medium,
        );
        layers.mac.borrow_mut().update().unwrap();
        assert!(sent(&layers).is_empty());
        layers.mac.borrow_mut().update().unwrap();

        let packets = sent(&layers);
        assert_eq!(1, packets.len());
        assert_eq!(MacId::BEACON, packets[0].destination());
        assert_matches!(
            packets[0].messages()[1].header,
            Some(Header::Beacon(BeaconHeader {
                is_cpr_odd: true,
                position_quality: PositionQuality::Medium,
                ..
            }))
        );
    }

    #[test]
    fn beacon_updates_neighbors_and_routes() {
        let layers = layers(0);
        let beacon = BeaconHeader {
            hops_to_gs: HopCount::saturating(2),
            ..Default::default()
        };
        layers
            .phy
            .borrow_mut()
            .on_reception(from_peer(beacon.into()), 7)
            .unwrap();

        assert_eq!(
            Ok(HopCount::saturating(2)),
            layers.mac.borrow().neighbors().hops_to_gs(PEER)
        );
        assert_eq!(Ok(2), layers.net.borrow().neighbor_hops(PEER));
    }

    #[test]
    fn silent_neighbors_expire() {
        let layers = layers_with(MacConfig {
            id: OWN,
            neighbor_timeout: 3,
            ..Default::default()
        });
        let beacon = from_peer(BeaconHeader::default().into());
        layers.phy.borrow_mut().on_reception(beacon, 0).unwrap();
        for _ in 0..3 {
            layers.mac.borrow_mut().update().unwrap();
        }
        assert!(layers.mac.borrow().neighbors().get(PEER).is_ok());

        // anything heard keeps the neighbor alive
        layers
            .phy
            .borrow_mut()
            .on_reception(from_peer(Header::Broadcast(Default::default())), 0)
            .unwrap();
        for _ in 0..3 {
            layers.mac.borrow_mut().update().unwrap();
        }
        assert!(layers.mac.borrow().neighbors().get(PEER).is_ok());

        layers.mac.borrow_mut().update().unwrap();
        assert!(layers.mac.borrow().neighbors().is_empty());
    }

    #[test]
    fn drops_packets_for_others() {
        let layers = layers(0);
        let mut packet = Packet::new();
        packet
            .add_message(Some(BaseHeader::new(PEER).into()), None)
            .unwrap();
        packet
            .add_message(
                Some(UnicastHeader::new(MacId::new(9)).unwrap().into()),
                Some(Box::new(crate::rlc::SegmentPayload {
                    datagram: Datagram::from(&b"x"[..]),
                    offset: 0,
                    len: 8,
                })),
            )
            .unwrap();
        layers.phy.borrow_mut().on_reception(packet, 7).unwrap();
        assert_eq!(0, layers.net.borrow_mut().drain_inbox().count());
    }

    #[test]
    fn sent_callbacks_fire() {
        let layers = layers(0);
        let fired = Rc::new(RefCell::new(0));
        let mut packet = Packet::new();
        packet
            .add_message(Some(BaseHeader::new(OWN).into()), None)
            .unwrap();
        let counter = fired.clone();
        packet.add_callback(move |_| *counter.borrow_mut() += 1);
        layers.mac.borrow_mut().pass_to_lower(packet, 7).unwrap();
        assert_eq!(1, *fired.borrow());
        assert_eq!(1, sent(&layers).len());
    }
}
