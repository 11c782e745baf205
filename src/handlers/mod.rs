//! Operator HTTP endpoints under `/api/v1`.

pub mod config;
pub mod sessions;

pub use config::*;
pub use sessions::*;
