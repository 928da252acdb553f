mod atom;
mod performance_log;
mod tool;

pub use atom::*;
pub use performance_log::*;
pub use tool::*;

use chrono::{DateTime, Utc};

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
