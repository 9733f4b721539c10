//! Value formatting helpers shared by the report writer and analyzers.

/// Format bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format duration in ms to human-readable string
pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}us", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms < 3_600_000.0 {
        let minutes = (ms / 60_000.0).floor();
        let seconds = (ms % 60_000.0) / 1000.0;
        format!("{:.0}m{:.0}s", minutes, seconds)
    } else {
        format!("{:.1}h", ms / 3_600_000.0)
    }
}

/// Format a ratio with three significant figures (report convention).
pub fn format_ratio(ratio: f64) -> String {
    if ratio == 0.0 {
        return "0".to_string();
    }
    let magnitude = ratio.abs().log10().floor() as i32;
    let decimals = (2 - magnitude).max(0) as usize;
    format!("{:.*}", decimals, ratio)
}

/// Format a throughput value in MB/s with two decimals (report convention).
pub fn format_rate_mbps(bytes_per_sec: f64) -> String {
    format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
}
