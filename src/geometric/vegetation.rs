use anyhow::Result;
use image::DynamicImage;

/// Pixels whose Excess Green Index exceeds this empirical threshold count
/// as vegetation.
pub const EXCESS_GREEN_THRESHOLD: f64 = 20.0;

/// Score an image for vegetation coverage with the Excess Green Index.
///
/// Accepts 3-channel RGB and 4-channel RGBA buffers (the alpha channel is
/// discarded); any other channel layout is an error. Per pixel
/// `ExG = 2G - R - B`; the result is the percentage of pixels above the
/// threshold, always in `[0, 100]` on success.
pub fn vegetation_percentage(img: &DynamicImage) -> Result<f64> {
    let (total, green) = match img {
        DynamicImage::ImageRgb8(buffer) => {
            count_green(buffer.pixels().map(|p| (p[0], p[1], p[2])))
        }
        DynamicImage::ImageRgba8(buffer) => {
            count_green(buffer.pixels().map(|p| (p[0], p[1], p[2])))
        }
        other => anyhow::bail!(
            "Expected a 3- or 4-channel image, got {:?}",
            other.color()
        ),
    };
    if total == 0 {
        anyhow::bail!("Cannot classify an empty image");
    }
    Ok(100.0 * green as f64 / total as f64)
}

fn count_green(pixels: impl Iterator<Item = (u8, u8, u8)>) -> (u64, u64) {
    let mut total = 0u64;
    let mut green = 0u64;
    for (r, g, b) in pixels {
        total += 1;
        let excess_green = 2.0 * g as f64 - r as f64 - b as f64;
        if excess_green > EXCESS_GREEN_THRESHOLD {
            green += 1;
        }
    }
    (total, green)
}
