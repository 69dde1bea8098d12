#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub use airlink_proto as proto;

pub mod arq;
pub mod layer;
pub mod mac;
pub mod neighbor;
pub mod net;
pub mod phy;
pub mod rlc;
pub mod stack;
