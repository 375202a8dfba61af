//! # sdstream Common Library
//!
//! Shared code for the sdstream crates:
//! - Error type
//! - Configuration file and root folder resolution
//! - Player event types broadcast by the streaming engine

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{PlayerEvent, PlayerStateKind};
