//! fixlink: couples a running molecular-dynamics simulation to an external
//! force controller over a message-passing subworld.
//!
//! Each simulator rank hosts a [`Worker`] that, once per selected integration
//! step, ships its locally owned atoms to the controller and folds the
//! returned per-atom force deltas back into the host's force array. The
//! controller is a peer process running a [`Policy`] inside the
//! [`Controller`] event loop. All coupling traffic travels on a dedicated
//! communicator carved out of the shared world so it can never alias the
//! simulator's internal messages.

pub mod comm;
pub mod config;
pub mod controller;
pub mod error;
pub mod plugin;
pub mod protocol;
pub mod worker;

// Re-exports for convenience
pub use comm::*;
pub use config::*;
pub use controller::*;
pub use error::*;
pub use plugin::*;
pub use protocol::*;
pub use worker::*;
