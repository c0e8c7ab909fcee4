//! Gateway process and control channel.
//!
//! Covers spawning the engine's gateway process, reading the port and
//! secret it advertises, and the control channel used to drive it.

pub mod channel;
pub mod codec;
pub mod conn_info;
pub mod launcher;
