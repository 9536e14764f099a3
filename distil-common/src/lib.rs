//! Shared types for the distil model workbench
//!
//! Provides the error set, dataset/variable/filter model, histogram
//! arithmetic and the progress event bus used by all distil crates.

pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};
