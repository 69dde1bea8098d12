//! Owner of a complete set of wired layers.

use {
    crate::{
        arq::{Arq, ArqConfig, InvalidWindow, SelectiveRepeatArq},
        layer::{LayerError, Priority},
        mac::{InvalidStationId, Mac, MacConfig, SlotMac},
        net::{Datagram, Net, RoutingNet},
        phy::{OutboxPhy, Phy, PhyConfig, Transmission},
        rlc::{Rlc, RlcConfig, SegmentingRlc},
    },
    airlink_proto::MacId,
    core::cell::{RefCell, RefMut},
    derive_more::{Display, Error, From},
    std::rc::Rc,
};

/// Configuration of a [`Stack`] made of the reference layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackConfig {
    /// Whether this station is a ground station.
    pub is_ground_station: bool,
    /// See [`RlcConfig`].
    pub rlc: RlcConfig,
    /// See [`ArqConfig`].
    pub arq: ArqConfig,
    /// See [`MacConfig`].
    pub mac: MacConfig,
    /// See [`PhyConfig`].
    pub phy: PhyConfig,
}

/// Failed to build a [`Stack`] from a [`StackConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error, From)]
#[non_exhaustive]
pub enum StackError {
    /// See [`InvalidWindow`].
    #[display("invalid ARQ configuration")]
    Arq(InvalidWindow),
    /// See [`InvalidStationId`].
    #[display("invalid MAC configuration")]
    Mac(InvalidStationId),
    /// Failed to wire the layers together.
    #[display("failed to wire layers")]
    Wire(LayerError),
}

/// Layers of one station, wired together from the network layer down to the
/// PHY.
///
/// The stack owns its layers; the layers only point at each other through
/// weak bindings. Dropping the stack drops every layer.
#[derive(Debug)]
pub struct Stack<
    N = RoutingNet,
    R = SegmentingRlc,
    A = SelectiveRepeatArq,
    M = SlotMac,
    P = OutboxPhy,
> {
    /// Network layer.
    pub net: Rc<RefCell<N>>,
    /// RLC sublayer.
    pub rlc: Rc<RefCell<R>>,
    /// ARQ sublayer.
    pub arq: Rc<RefCell<A>>,
    /// MAC sublayer.
    pub mac: Rc<RefCell<M>>,
    /// PHY layer.
    pub phy: Rc<RefCell<P>>,
}

impl<N, R, A, M, P> Stack<N, R, A, M, P>
where
    N: Net + 'static,
    R: Rlc + 'static,
    A: Arq + 'static,
    M: Mac + 'static,
    P: Phy + 'static,
{
    /// Wires the given layers to each other.
    ///
    /// # Errors
    ///
    /// Errors if any of the layers has already been wired.
    pub fn wire(net: N, rlc: R, arq: A, mac: M, phy: P) -> Result<Self, LayerError> {
        let net = Rc::new(RefCell::new(net));
        let rlc = Rc::new(RefCell::new(rlc));
        let arq = Rc::new(RefCell::new(arq));
        let mac = Rc::new(RefCell::new(mac));
        let phy = Rc::new(RefCell::new(phy));

        let net_dyn: Rc<RefCell<dyn Net>> = net.clone();
        let rlc_dyn: Rc<RefCell<dyn Rlc>> = rlc.clone();
        let arq_dyn: Rc<RefCell<dyn Arq>> = arq.clone();
        let mac_dyn: Rc<RefCell<dyn Mac>> = mac.clone();
        let phy_dyn: Rc<RefCell<dyn Phy>> = phy.clone();

        net.borrow().lower().wire(&rlc_dyn)?;
        rlc.borrow().upper().wire(&net_dyn)?;
        rlc.borrow().lower().wire(&arq_dyn)?;
        arq.borrow().upper().wire(&rlc_dyn)?;
        arq.borrow().lower().wire(&mac_dyn)?;
        mac.borrow().upper().wire(&arq_dyn)?;
        mac.borrow().lower().wire(&phy_dyn)?;
        phy.borrow().upper().wire(&mac_dyn)?;

        Ok(Self {
            net,
            rlc,
            arq,
            mac,
            phy,
        })
    }

    /// Sends a datagram to `dest`.
    ///
    /// # Errors
    ///
    /// Errors if a layer is already in use, or rejects the datagram.
    pub fn send(
        &self,
        datagram: Datagram,
        dest: MacId,
        priority: Priority,
    ) -> Result<(), LayerError> {
        borrow(&self.net, "net")?.send(datagram, dest, priority)
    }

    /// Hands a packet heard from the radio to the PHY.
    ///
    /// # Errors
    ///
    /// Errors if a layer is already in use, or fails to handle the packet.
    pub fn receive(&self, transmission: Transmission) -> Result<(), LayerError> {
        borrow(&self.phy, "phy")?.on_reception(transmission.packet, transmission.center_frequency)
    }
}

impl Stack {
    /// Builds a stack out of the reference layers.
    ///
    /// # Errors
    ///
    /// Errors if the configuration is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use airlink_stack::{
    ///     layer::PRIORITY_DEFAULT,
    ///     mac::MacConfig,
    ///     net::Datagram,
    ///     proto::MacId,
    ///     stack::{Stack, StackConfig},
    /// };
    ///
    /// let stack = Stack::from_config(StackConfig {
    ///     mac: MacConfig {
    ///         id: MacId::new(1),
    ///         ..Default::default()
    ///     },
    ///     ..Default::default()
    /// })
    /// .unwrap();
    ///
    /// stack
    ///     .send(Datagram::from(&b"hello"[..]), MacId::BROADCAST, PRIORITY_DEFAULT)
    ///     .unwrap();
    /// stack.update().unwrap();
    /// assert_eq!(1, stack.phy.borrow_mut().drain_outbox().count());
    /// ```
    pub fn from_config(config: StackConfig) -> Result<Self, StackError> {
        let net = if config.is_ground_station {
            RoutingNet::ground_station()
        } else {
            RoutingNet::new()
        };
        let stack = Self::wire(
            net,
            SegmentingRlc::new(config.rlc),
            SelectiveRepeatArq::new(config.arq)?,
            SlotMac::new(config.mac)?,
            OutboxPhy::new(config.phy),
        )?;
        Ok(stack)
    }
}

impl<N, R, A, P> Stack<N, R, A, SlotMac, P>
where
    P: Phy,
{
    /// Advances the PHY and the MAC by one slot.
    ///
    /// # Errors
    ///
    /// Errors if a layer is already in use, or fails while transmitting.
    pub fn update(&self) -> Result<(), LayerError> {
        borrow(&self.phy, "phy")?.update(1);
        borrow(&self.mac, "mac")?.update()
    }
}

fn borrow<'a, T>(layer: &'a RefCell<T>, name: &'static str) -> Result<RefMut<'a, T>, LayerError> {
    layer
        .try_borrow_mut()
        .map_err(|_| LayerError::Reentrant { layer: name })
}
