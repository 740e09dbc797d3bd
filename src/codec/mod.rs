//! LoRaWAN message codec: byte primitives, region tables, MAC-command
//! registry, the message dissector, and class-B beacons.

pub mod beacon;
pub mod bytes;
pub mod crypto;
pub mod keys;
pub mod mac_commands;
pub mod message;
pub mod mhdr;
pub mod region;

pub use message::{LoRaWANMessage, Payload, ProtocolVersion};
pub use mhdr::MType;
