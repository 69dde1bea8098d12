//! See [`Payload`].

use core::{any::Any, fmt};

/// Opaque upper-layer data carried by a message in a [`Packet`].
///
/// The link layer only cares about how many bits a payload occupies, and needs
/// to be able to deep-copy it when a packet is cloned (for example when ARQ
/// keeps a copy for retransmission). Any [`Clone`] type can be a payload;
/// [`Clone`] for `Box<dyn Payload>` is provided on top of it.
///
/// The layer which created a payload can get its concrete type back with
/// `downcast_ref` and `downcast_mut`.
///
/// # Examples
///
/// ```
/// use airlink_proto::payload::{FixedSizePayload, Payload};
///
/// let payload: Box<dyn Payload> = Box::new(FixedSizePayload(12));
/// let copy = payload.clone();
/// assert_eq!(12, copy.bits());
/// assert_eq!(Some(&FixedSizePayload(12)), copy.downcast_ref::<FixedSizePayload>());
/// ```
///
/// [`Packet`]: crate::packet::Packet
pub trait Payload: AsAny + PayloadClone + fmt::Debug {
    /// Gets how many bits this payload takes up on the wire.
    fn bits(&self) -> u32;
}

/// Upcasts to [`Any`], implemented for every `'static` type.
pub trait AsAny: Any {
    /// Gets `self` as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// Gets `self` as [`Any`] mutably.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Deep-copies a payload behind a box, implemented for every [`Clone`]
/// payload.
pub trait PayloadClone {
    /// Clones `self` into a new box.
    fn clone_box(&self) -> Box<dyn Payload>;
}

impl<T: Payload + Clone> PayloadClone for T {
    fn clone_box(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Payload> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

impl dyn Payload {
    /// Gets this payload as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Gets this payload as a `T` mutably, if it is one.
    #[must_use]
    pub fn downcast_mut<T: Payload>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

/// Payload of a fixed number of bits with no content.
///
/// Used to account for data whose contents do not matter to the link layer,
/// such as padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedSizePayload(pub u32);

impl Payload for FixedSizePayload {
    fn bits(&self) -> u32 {
        self.0
    }
}
