//! Protocol module: per-atom payload types and the framed packet codec.

pub mod atom;
pub use atom::{AtomData, FixData};
pub mod packet;
pub use packet::Packet;
