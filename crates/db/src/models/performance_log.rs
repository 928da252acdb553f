use vdw_core::PerformanceLogEntry;

use super::{datetime_to_millis, millis_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PerformanceLogRow {
    pub log_id: String,
    pub tool_id: String,
    pub project_id: String,
    pub execution_start: i64,
    pub execution_end: i64,
    pub duration_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
}

impl PerformanceLogRow {
    pub fn into_domain(self) -> PerformanceLogEntry {
        PerformanceLogEntry {
            log_id: self.log_id,
            tool_id: self.tool_id,
            project_id: self.project_id,
            execution_start: millis_to_datetime(self.execution_start),
            execution_end: millis_to_datetime(self.execution_end),
            duration_ms: self.duration_ms,
            success: self.success,
            error_message: self.error_message,
        }
    }
}

impl From<&PerformanceLogEntry> for PerformanceLogRow {
    fn from(entry: &PerformanceLogEntry) -> Self {
        Self {
            log_id: entry.log_id.clone(),
            tool_id: entry.tool_id.clone(),
            project_id: entry.project_id.clone(),
            execution_start: datetime_to_millis(entry.execution_start),
            execution_end: datetime_to_millis(entry.execution_end),
            duration_ms: entry.duration_ms,
            success: entry.success,
            error_message: entry.error_message.clone(),
        }
    }
}
