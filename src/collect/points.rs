use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Value};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::collect::global_variables::WGS84_EPSG;

/// One sample point along the street network. Immutable; produced once by a
/// point source and consumed read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    /// 0-based index, stable across the whole run.
    pub index: usize,
    pub longitude: f64,
    pub latitude: f64,
    pub street_id: Option<String>,
    pub street_name: Option<String>,
    pub point_id: Option<String>,
}

/// Random-access source of sample points.
pub trait PointSource {
    /// Total number of features, geometry-less ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// EPSG code of the source frame.
    fn spatial_ref(&self) -> i32;

    /// Point at `index`; `Ok(None)` for a feature without usable geometry.
    fn get(&self, index: usize) -> Result<Option<SamplePoint>>;
}

/// Attribute names to read from a source layer. Sampled-points layers from
/// different preprocessing runs disagree on attribute naming; the map makes
/// the choice explicit instead of hard-coding one convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub street_id: String,
    pub street_name: String,
    pub point_id: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        FieldMap {
            street_id: "street_id".to_string(),
            street_name: "street_name".to_string(),
            point_id: "point_id".to_string(),
        }
    }
}

/// Entry backing a `MemoryPointSource`. Geometry may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPoint {
    /// (longitude, latitude) in the source frame.
    pub coordinates: Option<(f64, f64)>,
    pub street_id: Option<String>,
    pub street_name: Option<String>,
    pub point_id: Option<String>,
}

/// In-memory point source for programmatic pipelines and tests.
pub struct MemoryPointSource {
    epsg: i32,
    points: Vec<MemoryPoint>,
}

impl MemoryPointSource {
    pub fn new(epsg: i32, points: Vec<MemoryPoint>) -> Self {
        MemoryPointSource { epsg, points }
    }

    /// WGS84 source over bare coordinate pairs.
    pub fn from_coordinates(coordinates: Vec<(f64, f64)>) -> Self {
        let points = coordinates
            .into_iter()
            .map(|pair| MemoryPoint {
                coordinates: Some(pair),
                ..MemoryPoint::default()
            })
            .collect();
        MemoryPointSource::new(WGS84_EPSG, points)
    }
}

impl PointSource for MemoryPointSource {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn spatial_ref(&self) -> i32 {
        self.epsg
    }

    fn get(&self, index: usize) -> Result<Option<SamplePoint>> {
        let point = self
            .points
            .get(index)
            .with_context(|| format!("Point index {} out of range", index))?;
        Ok(point.coordinates.map(|(longitude, latitude)| SamplePoint {
            index,
            longitude,
            latitude,
            street_id: point.street_id.clone(),
            street_name: point.street_name.clone(),
            point_id: point.point_id.clone(),
        }))
    }
}

/// Point source over a GeoJSON feature collection of sampled street points.
pub struct GeoJsonPointSource {
    epsg: i32,
    fields: FieldMap,
    features: Vec<Feature>,
}

impl GeoJsonPointSource {
    pub fn new(collection: FeatureCollection, epsg: i32, fields: FieldMap) -> Self {
        GeoJsonPointSource {
            epsg,
            fields,
            features: collection.features,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, epsg: i32, fields: FieldMap) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read GeoJSON file: {:?}", path))?;
        let geojson: GeoJson = content
            .parse()
            .with_context(|| format!("Failed to parse GeoJSON from {:?}", path))?;
        match geojson {
            GeoJson::FeatureCollection(collection) => {
                Ok(GeoJsonPointSource::new(collection, epsg, fields))
            }
            _ => anyhow::bail!("Expected a FeatureCollection in {:?}", path),
        }
    }

    fn property_string(feature: &Feature, name: &str) -> Option<String> {
        match feature.property(name)? {
            JsonValue::String(value) => Some(value.clone()),
            JsonValue::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

impl PointSource for GeoJsonPointSource {
    fn len(&self) -> usize {
        self.features.len()
    }

    fn spatial_ref(&self) -> i32 {
        self.epsg
    }

    fn get(&self, index: usize) -> Result<Option<SamplePoint>> {
        let feature = self
            .features
            .get(index)
            .with_context(|| format!("Feature index {} out of range", index))?;

        let coordinates = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coordinates)) if coordinates.len() >= 2 => coordinates,
            _ => return Ok(None),
        };

        Ok(Some(SamplePoint {
            index,
            longitude: coordinates[0],
            latitude: coordinates[1],
            street_id: Self::property_string(feature, &self.fields.street_id),
            street_name: Self::property_string(feature, &self.fields.street_name),
            point_id: Self::property_string(feature, &self.fields.point_id),
        }))
    }
}
