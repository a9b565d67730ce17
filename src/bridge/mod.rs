//! The bridge: channel mappings plus the message flow between two piers.
//!
//! ## Module Structure
//!
//! - `mapping`: bidirectional Discord <-> IRC channel table
//! - `orchestrator`: `Bridge`, its lifecycle and builder

pub mod mapping;
pub mod orchestrator;

pub use mapping::ChannelMappingManager;
pub use orchestrator::{Bridge, BridgeBuilder};
