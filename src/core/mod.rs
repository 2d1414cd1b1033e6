//! Core functionality: the bluetooth delivery engine and its session
//! machinery.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{ConnectionSession, PacketWriter};
