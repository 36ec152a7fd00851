//! Omni Setup - CI installer for the omni CLI
//!
//! Installs omni on a pipeline runner, restores and saves its data caches,
//! and drives `omni up` and friends with version-gated behavior.

pub mod cache;
pub mod cli;
pub mod error;
pub mod home;
pub mod install;
pub mod omni;
pub mod process;
pub mod retry;
pub mod version;
pub mod workflow;

pub use error::{SetupError, SetupResult};
