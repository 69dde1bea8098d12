#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod header;
pub mod id;
pub mod packet;
pub mod payload;
pub mod position;
pub mod seq;
pub mod srej;

pub use {
    header::{FrameType, Header},
    id::MacId,
    packet::{Packet, PacketError},
    payload::Payload,
    seq::SequenceNumber,
};
