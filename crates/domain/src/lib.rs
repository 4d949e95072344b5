//! Domain-level building blocks shared by the chain adapters, the monitor,
//! storage and the HTTP surface.
//!
//! Nothing in this crate performs I/O beyond reading the environment; the
//! network-facing pieces live in `donation_watch_chains`.

pub mod config;
pub mod model;
pub mod policy;
pub mod services;
pub mod storage;

pub use config::*;
pub use model::*;
pub use services::*;
pub use storage::*;
