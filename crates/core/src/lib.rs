//! Domain types shared by the orchestrator and the capability registry.

pub mod domain;
mod error;

pub use domain::*;
pub use error::*;
