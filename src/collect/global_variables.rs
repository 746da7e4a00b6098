use std::path::PathBuf;

pub const TEMP_PATH: &str = "./temp";

/// Street View static API endpoints.
pub const METADATA_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";
pub const IMAGE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/streetview";

/// Canonical geographic frame for panorama coordinates.
pub const WGS84_EPSG: i32 = 4326;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 100;

/// Directional image request parameters.
pub const IMAGE_SIZE: &str = "400x400";
pub const IMAGE_FOV: u32 = 60;
pub const IMAGE_PITCH: i32 = 0;
pub const HEADING_COUNT: usize = 6;

pub fn get_temp_path() -> PathBuf {
    PathBuf::from(TEMP_PATH)
}

/// Evenly spaced compass headings covering the full panorama.
pub fn default_headings() -> Vec<f64> {
    (0..HEADING_COUNT)
        .map(|i| i as f64 * 360.0 / HEADING_COUNT as f64)
        .collect()
}

/// Every month accepted: "01" through "12".
pub fn all_months() -> Vec<String> {
    (1..=12).map(|m| format!("{:02}", m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headings() {
        let headings = default_headings();
        assert_eq!(headings, vec![0.0, 60.0, 120.0, 180.0, 240.0, 300.0]);
    }

    #[test]
    fn test_all_months() {
        let months = all_months();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], "01");
        assert_eq!(months[11], "12");
    }
}
