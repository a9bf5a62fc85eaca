//! Liquidity SLA - Core Library
//! Liquidity commitments, shape deployment and SLA penalties for one market
//! of a replicated derivatives exchange. Every operation is deterministic.

// Public modules
pub mod broker;
pub mod core;
pub mod engine;
pub mod events;
pub mod num;
pub mod scores;
pub mod sim;
pub mod sla;
pub mod snapshot;
pub mod supplied;

// Re-exports
pub use core::{EngineConfig, Error, Result, SlaParams};
pub use engine::{Collaborators, Engine};
pub use events::Event;
