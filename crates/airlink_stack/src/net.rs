//! Network layer contract, sitting on top of the RLC sublayer.

use {
    crate::{
        layer::{Binding, LayerError, Priority},
        rlc::Rlc,
    },
    ahash::AHashMap,
    airlink_proto::{MacId, position::HopCount},
    bytes::Bytes,
    derive_more::{Deref, From},
    log::{debug, trace},
};

/// Upper-layer datagram handed to the link layer for delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deref, From)]
pub struct Datagram(pub Bytes);

impl Datagram {
    /// Gets how many bits this datagram takes up.
    #[must_use]
    pub fn bits(&self) -> u32 {
        u32::try_from(self.0.len())
            .ok()
            .and_then(|len| len.checked_mul(8))
            .unwrap_or(u32::MAX)
    }
}

impl From<&'static [u8]> for Datagram {
    fn from(value: &'static [u8]) -> Self {
        Self(Bytes::from_static(value))
    }
}

/// Network layer, which sends datagrams through and receives reassembled
/// datagrams from the [`Rlc`] sublayer.
pub trait Net {
    /// Binding to the RLC sublayer below.
    fn lower(&self) -> &Binding<dyn Rlc>;

    /// Receives a datagram reassembled by the link layer, sent by `origin`.
    ///
    /// # Errors
    ///
    /// Errors if the datagram could not be handled.
    fn receive_from_lower(&mut self, datagram: Datagram, origin: MacId) -> Result<(), LayerError>;

    /// Gets the number of hops to the nearest ground station according to
    /// current routing information.
    ///
    /// # Errors
    ///
    /// Errors if the layer keeps no routing information.
    fn num_hops_to_gs(&self) -> Result<u32, LayerError> {
        Err(LayerError::Unsupported {
            capability: "ground station hop count",
        })
    }

    /// Records the number of hops from the neighbor `id` to its nearest ground
    /// station, as announced in its beacon.
    ///
    /// # Errors
    ///
    /// Errors if the layer keeps no routing information.
    fn report_num_hops_to_gs(&mut self, id: MacId, hops: u32) -> Result<(), LayerError> {
        _ = (id, hops);
        Err(LayerError::Unsupported {
            capability: "ground station hop reports",
        })
    }

    /// Sends a datagram to `dest` through the layer below.
    ///
    /// # Errors
    ///
    /// Errors if the RLC sublayer is not wired, or rejects the datagram.
    fn send(
        &mut self,
        datagram: Datagram,
        dest: MacId,
        priority: Priority,
    ) -> Result<(), LayerError> {
        trace!("Sending {} bits to {dest}", datagram.bits());
        self.lower()
            .call(|rlc| rlc.receive_from_upper(datagram, dest, priority))
    }
}

/// Network endpoint collecting received datagrams in an inbox, and keeping
/// hop counts to the nearest ground station.
///
/// A ground station is 0 hops away from itself. Any other station is one hop
/// further away than its closest reported neighbor, or [`HopCount::MAX`] if no
/// neighbor has reported a route yet.
#[derive(Debug)]
pub struct RoutingNet {
    lower: Binding<dyn Rlc>,
    is_ground_station: bool,
    inbox: Vec<(MacId, Datagram)>,
    neighbor_hops: AHashMap<MacId, u32>,
}

impl RoutingNet {
    /// Creates a network endpoint for an airborne station.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lower: Binding::new("rlc"),
            is_ground_station: false,
            inbox: Vec::new(),
            neighbor_hops: AHashMap::new(),
        }
    }

    /// Creates a network endpoint for a ground station.
    #[must_use]
    pub fn ground_station() -> Self {
        Self {
            is_ground_station: true,
            ..Self::new()
        }
    }

    /// Takes all datagrams received so far, with the station which sent
    /// them, in order of arrival.
    pub fn drain_inbox(&mut self) -> impl Iterator<Item = (MacId, Datagram)> + '_ {
        self.inbox.drain(..)
    }

    /// Gets the last hop count reported by the neighbor `id`.
    ///
    /// # Errors
    ///
    /// Errors if `id` has never reported a hop count.
    pub fn neighbor_hops(&self, id: MacId) -> Result<u32, LayerError> {
        self.neighbor_hops
            .get(&id)
            .copied()
            .ok_or(LayerError::UnknownId { id })
    }
}

impl Default for RoutingNet {
    fn default() -> Self {
        Self::new()
    }
}

impl Net for RoutingNet {
    fn lower(&self) -> &Binding<dyn Rlc> {
        &self.lower
    }

    fn receive_from_lower(&mut self, datagram: Datagram, origin: MacId) -> Result<(), LayerError> {
        trace!("Received {} bits from {origin}", datagram.bits());
        self.inbox.push((origin, datagram));
        Ok(())
    }

    fn num_hops_to_gs(&self) -> Result<u32, LayerError> {
        if self.is_ground_station {
            return Ok(0);
        }
        let hops = self
            .neighbor_hops
            .values()
            .min()
            .map_or(HopCount::MAX.get(), |hops| {
                hops.saturating_add(1).min(HopCount::MAX.get())
            });
        Ok(hops)
    }

    fn report_num_hops_to_gs(&mut self, id: MacId, hops: u32) -> Result<(), LayerError> {
        if self.neighbor_hops.insert(id, hops) != Some(hops) {
            debug!("Neighbor {id} is now {hops} hops from a ground station");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_bits() {
        assert_eq!(0, Datagram::default().bits());
        assert_eq!(88, Datagram::from(&b"hello world"[..]).bits());
    }

    #[test]
    fn hops_from_neighbors() {
        let mut net = RoutingNet::new();
        assert_eq!(Ok(HopCount::MAX.get()), net.num_hops_to_gs());

        net.report_num_hops_to_gs(MacId::new(1), 4).unwrap();
        net.report_num_hops_to_gs(MacId::new(2), 2).unwrap();
        assert_eq!(Ok(3), net.num_hops_to_gs());

        net.report_num_hops_to_gs(MacId::new(2), 6).unwrap();
        assert_eq!(Ok(5), net.num_hops_to_gs());
        assert_eq!(Ok(6), net.neighbor_hops(MacId::new(2)));
        assert_eq!(
            Err(LayerError::UnknownId { id: MacId::new(3) }),
            net.neighbor_hops(MacId::new(3))
        );
    }

    #[test]
    fn ground_station_is_zero_hops() {
        let mut net = RoutingNet::ground_station();
        net.report_num_hops_to_gs(MacId::new(1), 4).unwrap();
        assert_eq!(Ok(0), net.num_hops_to_gs());
    }

    #[test]
    fn send_unwired() {
        let mut net = RoutingNet::new();
        assert_eq!(
            Err(LayerError::Unwired { layer: "rlc" }),
            net.send(Datagram::default(), MacId::new(1), Priority::default())
        );
    }

    #[test]
    fn inbox_in_order() {
        let mut net = RoutingNet::new();
        net.receive_from_lower(Datagram::from(&b"a"[..]), MacId::new(1))
            .unwrap();
        net.receive_from_lower(Datagram::from(&b"b"[..]), MacId::new(2))
            .unwrap();
        let inbox = net.drain_inbox().collect::<Vec<_>>();
        assert_eq!(MacId::new(1), inbox[0].0);
        assert_eq!(&b"b"[..], &inbox[1].1[..]);
        assert_eq!(0, net.drain_inbox().count());
    }
}
