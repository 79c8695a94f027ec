//! rendezvous-core: tunnel wire format, data model, error taxonomy and
//! configuration. All other rendezvous crates depend on this one.

pub mod config;
pub mod error;
pub mod record;
pub mod wire;

pub use error::RelayError;
pub use record::{PrefixBinding, WorkerEndpoint, WorkerRecord};
