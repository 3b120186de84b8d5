//! Human-readable byte/speed formatting.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count as `"<mantissa><unit>"`, e.g. `"12.34MB"`.
///
/// Picks the largest unit in `{B, KB, MB, GB, TB}` for which the mantissa is
/// below `1024`. A negative input (the "size unknown" sentinel) renders as
/// the literal string `"unknown"`.
pub fn format_bytes(bytes: i64) -> String {
    if bytes < 0 {
        return "unknown".to_string();
    }
    let mut mantissa = bytes as f64;
    for unit in &UNITS {
        if mantissa < 1024.0 {
            return format!("{mantissa:.2}{unit}");
        }
        mantissa /= 1024.0;
    }
    format!("{:.2}{}", mantissa, UNITS[UNITS.len() - 1])
}

/// Convenience wrapper for an `Option<u64>` byte count, as used for
/// quantities that may genuinely be unknown (e.g. file size before probing).
pub fn format_bytes_opt(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format_bytes(b as i64),
        None => "unknown".to_string(),
    }
}

/// Formats a byte count as a `"<value>/s"` transfer rate string.
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_is_unknown() {
        assert_eq!(format_bytes(-1), "unknown");
    }

    #[test]
    fn zero_bytes() {
        assert_eq!(format_bytes(0), "0.00B");
    }

    #[test]
    fn picks_largest_unit_under_1024() {
        assert_eq!(format_bytes(1023), "1023.00B");
        assert_eq!(format_bytes(1024), "1.00KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00GB");
    }

    #[test]
    fn format_bytes_opt_none_is_unknown() {
        assert_eq!(format_bytes_opt(None), "unknown");
        assert_eq!(format_bytes_opt(Some(2048)), "2.00KB");
    }

    #[test]
    fn speed_has_per_second_suffix() {
        assert_eq!(format_speed(1024), "1.00KB/s");
    }
}
