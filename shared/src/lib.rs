//! # Shared Module for the Device Provisioning Gateway
//!
//! Common types, errors, constants and configuration used by the
//! provisioning core and the service front end.
//!
//! ## Lifecycle
//!
//! | Stage | Reached by | Unlocks |
//! |-------|------------|---------|
//! | `unenrolled` | initial | enrollment |
//! | `enrolled` | identity generated, stored, attested | registration |
//! | `registered` | assignment received | messaging |

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
