use anyhow::{Context, Result};
use std::path::Path;

/// Load API credentials from a plain text file, one key per non-empty line.
pub fn load_api_keys<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read API key file: {:?}", path))?;

    let keys: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect();

    if keys.is_empty() {
        anyhow::bail!("No API keys found in {:?}", path);
    }

    Ok(keys)
}

/// Extract the capture month from a panorama date string.
///
/// The API reports dates with the month in the trailing two characters
/// ("2019-07" -> "07"). Returns None when the tail is not two digits.
pub fn pano_month(pano_date: &str) -> Option<&str> {
    if pano_date.len() < 2 {
        return None;
    }
    let tail = pano_date.get(pano_date.len() - 2..)?;
    if tail.chars().all(|c| c.is_ascii_digit()) {
        Some(tail)
    } else {
        None
    }
}
