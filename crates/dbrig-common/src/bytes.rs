const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte formatting used for `getDatabaseSize` and backup
/// archive sizes: one decimal place above the "B" unit, matching the S3
/// scenario's literal outputs.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }
    if unit_index == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_byte_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes((1.5 * 1024.0 * 1024.0 * 1024.0) as u64), "1.5 GB");
    }
}
