//! Meridian Core: shared error type, configuration, component registry.

pub mod config;
pub mod error;
pub mod registry;

pub use config::MeridianConfig;
pub use error::{Error, Result};
pub use registry::{Key, Registry};
