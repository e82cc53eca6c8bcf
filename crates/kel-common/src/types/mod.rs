//! Byte-size helpers shared across KEL
//!
//! Thresholds in configuration are expressed in GB (1 GB = 1024³ bytes).

/// Bytes in one configured "GB"
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Convert a GB threshold from configuration into bytes.
///
/// Negative and non-finite values collapse to zero.
pub fn gb_to_bytes(gb: f64) -> u64 {
    if !gb.is_finite() || gb <= 0.0 {
        return 0;
    }
    (gb * BYTES_PER_GB as f64) as u64
}

/// Convert a byte count to GB
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
