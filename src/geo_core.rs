use anyhow::Result;
use geo::Point;

use crate::collect::global_variables::WGS84_EPSG;

/// Spatial reference handle for point sources.
///
/// Panorama coordinates are canonically WGS84 (EPSG:4326); a source layer in
/// any other frame is reprojected through here before metadata lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoCore {
    /// EPSG code of the frame this handle describes
    pub epsg: i32,
}

impl GeoCore {
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg }
    }

    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    pub fn set_epsg(&mut self, epsg: i32) {
        self.epsg = epsg;
    }

    /// Whether this frame already is the canonical WGS84 frame.
    /// An equality check here is what lets callers skip needless transforms.
    pub fn is_canonical(&self) -> bool {
        self.epsg == WGS84_EPSG
    }

    /// Transform coordinates from one CRS to another
    #[cfg(feature = "proj")]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        use anyhow::Context;
        use proj::Proj;

        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        let proj = Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")?;

        let result = proj
            .convert((x, y))
            .context("Failed to transform coordinates")?;

        Ok(result)
    }

    #[cfg(not(feature = "proj"))]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, _x: f64, _y: f64) -> Result<(f64, f64)> {
        anyhow::bail!(
            "Coordinate transformation EPSG:{} -> EPSG:{} requires the `proj` feature",
            from_epsg,
            to_epsg
        );
    }

    /// Transform a Point from one CRS to another
    pub fn transform_point(from_epsg: i32, to_epsg: i32, point: Point<f64>) -> Result<Point<f64>> {
        let (x, y) = Self::transform_coords(from_epsg, to_epsg, point.x(), point.y())?;
        Ok(Point::new(x, y))
    }

    /// Reproject a coordinate pair into the canonical WGS84 frame.
    pub fn to_canonical(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.is_canonical() {
            return Ok((x, y));
        }
        Self::transform_coords(self.epsg, WGS84_EPSG, x, y)
    }
}

impl Default for GeoCore {
    fn default() -> Self {
        GeoCore::new(WGS84_EPSG)
    }
}
