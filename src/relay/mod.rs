//! # Relay Core
//!
//! One [`RelaySession`] per upstream connection, tracked in a process-wide
//! [`SessionRegistry`]. See [`session::run_session`] for the lifecycle.

pub mod registry;
pub mod session;

pub use registry::SessionRegistry;
pub use session::{run_session, EmotionResult, Lifecycle, RelayContext, RelaySession, UpstreamSink};
