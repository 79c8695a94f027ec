//! CLI command modules.

pub mod bind;
pub mod http;
pub mod query;
pub mod status;
pub mod tunnel;
