pub mod error;
pub mod format;

pub use error::{DoctorError, DoctorResult, ProbeError};
pub use format::{format_bytes, format_duration_ms, format_rate_mbps, format_ratio};
