//! Capability registry: a SQLite-backed catalog of reusable tools, searchable
//! by capability, with per-tool usage statistics and gap analysis.

mod cache;
mod config;
mod error;
mod registry;

pub use cache::ToolCache;
pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryValidationError, Result};
pub use registry::CapabilityRegistry;
