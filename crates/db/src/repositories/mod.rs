mod atom_repository;
mod performance_log_repository;
mod tool_repository;

pub use atom_repository::AtomRepository;
pub use performance_log_repository::{AnalyticsFilter, PerformanceLogRepository};
pub use tool_repository::ToolRepository;
