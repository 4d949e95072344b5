//! Library entrypoint for embedding the donation monitor in other binaries.
//! The API process runs it in-process so its HTTP control routes and the
//! scheduler share one `MonitorState`; `main.rs` runs it standalone.

pub mod pipeline;
pub mod state;
pub mod worker;

pub use pipeline::{process_transaction, Disposition, PipelineContext};
pub use state::{CycleReport, MonitorState, MonitoringStatus};
pub use worker::{DonationMonitor, MonitorError, ReconcileReport};
