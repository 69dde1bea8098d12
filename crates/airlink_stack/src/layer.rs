//! Plumbing shared by all layers: bindings between neighboring layers, the
//! error type of layer calls, and datagram priorities.

use {
    airlink_proto::{MacId, PacketError, header::HeaderError},
    core::cell::{OnceCell, RefCell},
    derive_more::{Display, Error, From},
    std::rc::{Rc, Weak},
};

/// Priority of a datagram queued for transmission.
///
/// Higher priorities are served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Priority(pub u8);

/// Priority of ordinary user data.
pub const PRIORITY_DEFAULT: Priority = Priority(0);

/// Priority of link-management control packets, which are served before any
/// user data.
pub const PRIORITY_LINK_MANAGEMENT: Priority = Priority(u8::MAX);

/// Error returned from a call across the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error, From)]
#[non_exhaustive]
pub enum LayerError {
    /// Called through a [`Binding`] which was never wired, or whose target
    /// has been dropped.
    #[display("{layer} layer is not wired")]
    Unwired {
        /// Name of the layer the binding points to.
        layer: &'static str,
    },
    /// Attempted to wire a [`Binding`] a second time.
    #[display("{layer} layer is already wired")]
    AlreadyWired {
        /// Name of the layer the binding points to.
        layer: &'static str,
    },
    /// Called into a layer which is further up the current call chain.
    ///
    /// Layers must not call back into the layer which called them.
    #[display("{layer} layer is already in use")]
    Reentrant {
        /// Name of the layer the binding points to.
        layer: &'static str,
    },
    /// No state is known for the given identifier.
    #[display("unknown id {id}")]
    UnknownId {
        /// Identifier which was looked up.
        id: MacId,
    },
    /// The layer does not implement an optional capability.
    #[display("{capability} is not supported")]
    Unsupported {
        /// Name of the capability.
        capability: &'static str,
    },
    /// Too many datagrams are already queued for a destination.
    #[display("queue for {dest} is full")]
    QueueFull {
        /// Destination of the rejected datagram.
        dest: MacId,
    },
    /// Every receiver is already tuned to a frequency.
    #[display("all {num_receivers} receivers are tuned")]
    ReceiversExhausted {
        /// Number of receivers of the PHY.
        num_receivers: usize,
    },
    /// Failed to build a header.
    #[display("failed to build header")]
    #[from]
    Header(HeaderError),
    /// Failed to assemble a packet.
    #[display("failed to assemble packet")]
    #[from]
    Packet(PacketError),
}

/// Reference from one layer to a neighboring layer.
///
/// A binding is created unwired, wired exactly once, and only queried after
/// that. It holds a [`Weak`] reference, so that two neighboring layers can
/// point at each other without keeping each other alive. Whoever wires the
/// stack (usually a [`Stack`]) keeps the layers alive.
///
/// # Examples
///
/// ```
/// use {
///     airlink_stack::layer::{Binding, LayerError},
///     std::{cell::RefCell, rc::Rc},
/// };
///
/// let binding = Binding::<u32>::new("counter");
/// assert_eq!(Err(LayerError::Unwired { layer: "counter" }), binding.with(|n| *n));
///
/// let counter = Rc::new(RefCell::new(0));
/// binding.wire(&counter).unwrap();
/// binding.with(|n| *n += 1).unwrap();
/// assert_eq!(1, *counter.borrow());
///
/// assert!(binding.wire(&counter).is_err());
/// ```
///
/// [`Stack`]: crate::stack::Stack
pub struct Binding<T: ?Sized> {
    layer: &'static str,
    target: OnceCell<Weak<RefCell<T>>>,
}

impl<T: ?Sized> Binding<T> {
    /// Creates an unwired binding to the layer called `layer`.
    #[must_use]
    pub const fn new(layer: &'static str) -> Self {
        Self {
            layer,
            target: OnceCell::new(),
        }
    }

    /// Points this binding at `target`.
    ///
    /// # Errors
    ///
    /// Errors if this binding is already wired.
    pub fn wire(&self, target: &Rc<RefCell<T>>) -> Result<(), LayerError> {
        self.target
            .set(Rc::downgrade(target))
            .map_err(|_| LayerError::AlreadyWired { layer: self.layer })
    }

    /// Gets if this binding has been wired.
    #[must_use]
    pub fn is_wired(&self) -> bool {
        self.target.get().is_some()
    }

    /// Gets the name of the layer this binding points to.
    #[must_use]
    pub const fn layer(&self) -> &'static str {
        self.layer
    }

    /// Runs `f` on the target layer.
    ///
    /// # Errors
    ///
    /// Errors if this binding is not wired, the target has been dropped, or
    /// the target is already borrowed further up the call chain.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, LayerError> {
        let target = self
            .target
            .get()
            .and_then(Weak::upgrade)
            .ok_or(LayerError::Unwired { layer: self.layer })?;
        let mut target = target
            .try_borrow_mut()
            .map_err(|_| LayerError::Reentrant { layer: self.layer })?;
        Ok(f(&mut target))
    }

    /// Runs a fallible `f` on the target layer, flattening its result.
    ///
    /// # Errors
    ///
    /// Errors if [`Binding::with`] fails, or if `f` fails.
    pub fn call<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, LayerError>,
    ) -> Result<R, LayerError> {
        self.with(f)?
    }
}

impl<T: ?Sized> core::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Binding")
            .field("layer", &self.layer)
            .field("wired", &self.is_wired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn dropped_target_is_unwired() {
        let binding = Binding::<u32>::new("n");
        {
            let target = Rc::new(RefCell::new(1));
            binding.wire(&target).unwrap();
            assert_eq!(Ok(1), binding.with(|n| *n));
        }
        assert!(binding.is_wired());
        assert_matches!(binding.with(|n| *n), Err(LayerError::Unwired { layer: "n" }));
    }

    #[test]
    fn reentrant_call() {
        let target = Rc::new(RefCell::new(0u32));
        let binding = Binding::new("n");
        binding.wire(&target).unwrap();

        let _guard = target.borrow_mut();
        assert_matches!(binding.with(|n| *n), Err(LayerError::Reentrant { layer: "n" }));
    }

    #[test]
    fn call_flattens() {
        let target = Rc::new(RefCell::new(0u32));
        let binding = Binding::new("n");
        binding.wire(&target).unwrap();

        assert_eq!(Ok(0), binding.call(|n| Ok(*n)));
        assert_matches!(
            binding.call(|_| Err::<(), _>(LayerError::UnknownId { id: MacId::new(3) })),
            Err(LayerError::UnknownId { .. })
        );
    }

    #[test]
    fn wires_unsized_targets() {
        trait Counter {
            fn bump(&mut self) -> u32;
        }

        struct Simple(u32);

        impl Counter for Simple {
            fn bump(&mut self) -> u32 {
                self.0 += 1;
                self.0
            }
        }

        let target: Rc<RefCell<dyn Counter>> = Rc::new(RefCell::new(Simple(0)));
        let binding = Binding::<dyn Counter>::new("counter");
        binding.wire(&target).unwrap();
        assert_eq!(Ok(1), binding.with(Counter::bump));
        assert_eq!(Ok(2), binding.with(Counter::bump));
    }

    #[test]
    fn priorities() {
        assert!(PRIORITY_LINK_MANAGEMENT > PRIORITY_DEFAULT);
        assert_eq!(PRIORITY_DEFAULT, Priority::default());
    }
}
