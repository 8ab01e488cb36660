//! Matching engine service
//!
//! Wires one [`matching_engine::Engine`] per configured product to journal
//! and snapshot files under the data directory, with configuration and
//! logging setup for the binary.

pub mod config;
pub mod logging;
pub mod service;

pub use config::{load_config, ServiceConfig};
pub use logging::initialize_logging;
pub use service::{build_engine, ServiceState};
