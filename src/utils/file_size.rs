use std::time::Duration;

/// Assumed link speed when the user has not given one.
pub const DEFAULT_SPEED_MBPS: f64 = 10.0;

pub struct FileSizeUtils;

impl FileSizeUtils {
    pub fn format_size(size: u64) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    pub fn transfer_time(size: u64, speed_mbps: f64) -> Duration {
        if speed_mbps <= 0.0 {
            return Duration::ZERO;
        }
        let megabits = size as f64 * 8.0 / (1024.0 * 1024.0);
        Duration::from_secs_f64(megabits / speed_mbps)
    }

    pub fn estimate_upload_time(size: u64, speed_mbps: f64) -> String {
        let seconds = Self::transfer_time(size, speed_mbps).as_secs_f64();
        if seconds < 60.0 {
            format!("~{} seconds", seconds.round() as u64)
        } else if seconds < 3600.0 {
            format!("~{:.1} minutes", seconds / 60.0)
        } else {
            format!("~{:.1} hours", seconds / 3600.0)
        }
    }
}
