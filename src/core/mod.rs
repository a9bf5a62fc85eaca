//! Core module - Common types, collaborator traits, configuration and errors

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, SlaParams};
pub use error::{Error, Result, ShapeError};
pub use traits::*;
pub use types::*;
