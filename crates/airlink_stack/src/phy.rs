//! Physical layer contract, and a PHY which hands transmissions to the host.

use {
    crate::{
        layer::{Binding, LayerError},
        mac::Mac,
    },
    airlink_proto::Packet,
    log::trace,
};

/// Physical layer, which sits below the [`Mac`] sublayer.
pub trait Phy {
    /// Binding to the MAC sublayer above.
    fn upper(&self) -> &Binding<dyn Mac>;

    /// Transmits `packet` on `center_frequency`.
    ///
    /// # Errors
    ///
    /// Errors if the packet cannot be transmitted.
    fn receive_from_upper(&mut self, packet: Packet, center_frequency: u64)
    -> Result<(), LayerError>;

    /// Called by the host when `packet` was received on `center_frequency`.
    ///
    /// # Errors
    ///
    /// Errors if the MAC is not wired, or fails to handle the packet.
    fn on_reception(&mut self, packet: Packet, center_frequency: u64) -> Result<(), LayerError> {
        self.upper()
            .call(|mac| mac.receive_from_lower(packet, center_frequency))
    }

    /// Number of bits which can be transmitted in one slot, under the current
    /// modulation and coding.
    fn current_datarate(&self) -> u64;

    /// Gets if the transmitter is free for `num_slots` slots, starting
    /// `slot_offset` slots from now.
    ///
    /// # Errors
    ///
    /// Errors if the PHY does not track its transmitter.
    fn is_transmitter_idle(&self, slot_offset: u32, num_slots: u32) -> Result<bool, LayerError> {
        _ = (slot_offset, num_slots);
        Err(LayerError::Unsupported {
            capability: "transmitter scheduling",
        })
    }

    /// Gets if at least one receiver is free for `num_slots` slots, starting
    /// `slot_offset` slots from now.
    ///
    /// # Errors
    ///
    /// Errors if the PHY does not track its receivers.
    fn is_any_receiver_idle(&self, slot_offset: u32, num_slots: u32) -> Result<bool, LayerError> {
        _ = (slot_offset, num_slots);
        Err(LayerError::Unsupported {
            capability: "receiver scheduling",
        })
    }

    /// Tunes a free receiver to `center_frequency` for the current slot.
    ///
    /// # Errors
    ///
    /// Errors if all receivers are already tuned, or the PHY does not track
    /// its receivers.
    fn tune_receiver(&mut self, center_frequency: u64) -> Result<(), LayerError> {
        _ = center_frequency;
        Err(LayerError::Unsupported {
            capability: "receiver tuning",
        })
    }

    /// Advances time by `num_slots` slots.
    fn update(&mut self, num_slots: u64) {
        _ = num_slots;
    }
}

/// Configuration of an [`OutboxPhy`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyConfig {
    /// Bits per slot.
    pub datarate: u64,
    /// Number of receivers which can be tuned at the same time.
    pub num_receivers: usize,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            datarate: 800,
            num_receivers: 2,
        }
    }
}

/// Packet handed to the radio.
#[derive(Debug, Clone)]
pub struct Transmission {
    /// Packet to transmit.
    pub packet: Packet,
    /// Frequency to transmit on.
    pub center_frequency: u64,
}

/// PHY which collects transmissions in an outbox for the host to deliver.
///
/// Receivers are tuned per slot: [`Phy::update`] releases every receiver and
/// the transmitter.
#[derive(Debug)]
pub struct OutboxPhy {
    config: PhyConfig,
    upper: Binding<dyn Mac>,
    outbox: Vec<Transmission>,
    tuned: Vec<u64>,
    transmitted_this_slot: bool,
}

impl OutboxPhy {
    /// Creates a PHY with an empty outbox and no receiver tuned.
    #[must_use]
    pub fn new(config: PhyConfig) -> Self {
        Self {
            config,
            upper: Binding::new("mac"),
            outbox: Vec::new(),
            tuned: Vec::new(),
            transmitted_this_slot: false,
        }
    }

    /// Gets the configuration of this PHY.
    #[must_use]
    pub const fn config(&self) -> &PhyConfig {
        &self.config
    }

    /// Takes every transmission made so far, in order.
    pub fn drain_outbox(&mut self) -> impl Iterator<Item = Transmission> + '_ {
        self.outbox.drain(..)
    }

    /// Frequencies the receivers are tuned to in the current slot.
    #[must_use]
    pub fn tuned_frequencies(&self) -> &[u64] {
        &self.tuned
    }
}

impl Default for OutboxPhy {
    fn default() -> Self {
        Self::new(PhyConfig::default())
    }
}

impl Phy for OutboxPhy {
    fn upper(&self) -> &Binding<dyn Mac> {
        &self.upper
    }

    fn receive_from_upper(
        &mut self,
        packet: Packet,
        center_frequency: u64,
    ) -> Result<(), LayerError> {
        trace!(
            "Transmitting {} bits on {center_frequency} to {}",
            packet.bits(),
            packet.destination()
        );
        self.transmitted_this_slot = true;
        self.outbox.push(Transmission {
            packet,
            center_frequency,
        });
        Ok(())
    }

    fn current_datarate(&self) -> u64 {
        self.config.datarate
    }

    fn is_transmitter_idle(&self, slot_offset: u32, _num_slots: u32) -> Result<bool, LayerError> {
        // only the current slot is ever booked
        Ok(slot_offset > 0 || !self.transmitted_this_slot)
    }

    fn is_any_receiver_idle(&self, slot_offset: u32, _num_slots: u32) -> Result<bool, LayerError> {
        Ok(slot_offset > 0 || self.tuned.len() < self.config.num_receivers)
    }

    fn tune_receiver(&mut self, center_frequency: u64) -> Result<(), LayerError> {
        if self.tuned.len() >= self.config.num_receivers {
            return Err(LayerError::ReceiversExhausted {
                num_receivers: self.config.num_receivers,
            });
        }
        self.tuned.push(center_frequency);
        Ok(())
    }

    fn update(&mut self, num_slots: u64) {
        if num_slots > 0 {
            self.tuned.clear();
            self.transmitted_this_slot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn receivers_exhaust_until_update() {
        let mut phy = OutboxPhy::new(PhyConfig {
            datarate: 100,
            num_receivers: 2,
        });
        assert_eq!(Ok(true), phy.is_any_receiver_idle(0, 1));
        phy.tune_receiver(10).unwrap();
        phy.tune_receiver(20).unwrap();
        assert_eq!(Ok(false), phy.is_any_receiver_idle(0, 1));
        assert_eq!(Ok(true), phy.is_any_receiver_idle(1, 1));
        assert_matches!(
            phy.tune_receiver(30),
            Err(LayerError::ReceiversExhausted { num_receivers: 2 })
        );
        assert_eq!(&[10, 20], phy.tuned_frequencies());

        phy.update(0);
        assert_eq!(2, phy.tuned_frequencies().len());
        phy.update(1);
        assert!(phy.tuned_frequencies().is_empty());
        phy.tune_receiver(30).unwrap();
    }

    #[test]
    fn outbox_keeps_order() {
        let mut phy = OutboxPhy::default();
        assert_eq!(Ok(true), phy.is_transmitter_idle(0, 1));
        phy.receive_from_upper(Packet::new(), 1).unwrap();
        phy.receive_from_upper(Packet::new(), 2).unwrap();
        assert_eq!(Ok(false), phy.is_transmitter_idle(0, 1));

        let freqs = phy
            .drain_outbox()
            .map(|tx| tx.center_frequency)
            .collect::<Vec<_>>();
        assert_eq!(vec![1, 2], freqs);
        assert_eq!(0, phy.drain_outbox().count());

        phy.update(1);
        assert_eq!(Ok(true), phy.is_transmitter_idle(0, 1));
    }

    #[test]
    fn reception_needs_mac() {
        let mut phy = OutboxPhy::default();
        assert_matches!(
            phy.on_reception(Packet::new(), 0),
            Err(LayerError::Unwired { layer: "mac" })
        );
    }

    struct SilentPhy(Binding<dyn Mac>);

    impl Phy for SilentPhy {
        fn upper(&self) -> &Binding<dyn Mac> {
            &self.0
        }

        fn receive_from_upper(&mut self, _: Packet, _: u64) -> Result<(), LayerError> {
            Ok(())
        }

        fn current_datarate(&self) -> u64 {
            0
        }
    }

    #[test]
    fn optional_capabilities_unsupported() {
        let mut phy = SilentPhy(Binding::new("mac"));
        assert_matches!(
            phy.is_transmitter_idle(0, 1),
            Err(LayerError::Unsupported { .. })
        );
        assert_matches!(
            phy.is_any_receiver_idle(0, 1),
            Err(LayerError::Unsupported { .. })
        );
        assert_matches!(phy.tune_receiver(1), Err(LayerError::Unsupported { .. }));
        phy.update(1);
    }
}
