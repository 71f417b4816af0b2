/// Format bytes as human-readable string (using SI decimal units)
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a generation rate, or "n/a" when none was measured
pub fn format_rate(tokens_per_second: Option<f32>) -> String {
    match tokens_per_second {
        Some(rate) => format!("{:.1} tok/s", rate),
        None => "n/a".to_string(),
    }
}

/// Render a printable preview of chat bytes, escaping control characters
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            b'\n' => "\\n".to_string(),
            0x20..=0x7e => (b as char).to_string(),
            _ => format!("\\x{:02x}", b),
        })
        .collect()
}
