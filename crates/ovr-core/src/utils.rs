use chrono::Utc;

use crate::messaging::types::MediaKind;

// ============== Size Helpers ==============

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;

/// Human-readable byte size: `512 B`, `20.0 KB`, `1.5 MB`.
pub fn format_file_size(bytes: usize) -> String {
    if bytes < KIB {
        return format!("{bytes} B");
    }
    if bytes < MIB {
        return format!("{:.1} KB", bytes as f64 / KIB as f64);
    }
    format!("{:.1} MB", bytes as f64 / MIB as f64)
}

// ============== Timestamp Helpers ==============

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// File name used when media is re-sent as a generic document.
pub fn document_file_name(kind: MediaKind, ts_millis: i64) -> String {
    format!("v_{ts_millis}.{}", kind.extension())
}
