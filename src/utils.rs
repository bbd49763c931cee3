//! # Utility Functions
//!
//! Small helpers shared by the driver and the launcher: human-readable byte
//! counts for logs, CPU pinning and unique socket paths.

use crate::error::BenchError;
use std::path::PathBuf;
use uuid::Uuid;

/// Format a byte count with binary units, e.g. "512 B", "1.50 KB"
///
/// ```rust
/// # use p2p_bench::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(67108864), "64.00 MB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Pin the calling thread to CPU core `core`
///
/// The process runs on a single thread, so this pins the whole benchmark.
pub fn pin_current_thread(core: usize) -> Result<(), BenchError> {
    let available = core_affinity::get_core_ids().unwrap_or_default();
    let Some(id) = available.into_iter().find(|id| id.id == core) else {
        return Err(BenchError::InvalidOption(format!(
            "CPU core {} is not available to this process",
            core
        )));
    };

    if !core_affinity::set_for_current(id) {
        return Err(BenchError::InvalidOption(format!(
            "cannot pin to CPU core {}",
            core
        )));
    }
    Ok(())
}

/// A socket path under the temporary directory that no other run uses
pub fn unique_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("p2p_bench_{}.sock", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1), "1 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1572864), "1.50 MB");
        assert_eq!(format_bytes(1610612736), "1.50 GB");
    }

    #[test]
    fn test_socket_paths_are_unique() {
        let a = unique_socket_path();
        let b = unique_socket_path();
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn test_pinning_to_a_missing_core_is_rejected() {
        let err = pin_current_thread(usize::MAX).unwrap_err();
        assert!(matches!(err, BenchError::InvalidOption(_)));
    }
}
