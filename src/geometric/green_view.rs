use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use log::{debug, info};
use serde_json::{json, Map};

use crate::collect::global_variables::get_temp_path;
use crate::collect::record::PanoramaRecord;

/// Final green-view point layer assembled from scored batch result files.
///
/// Lines that do not parse and panoramas without a usable score are
/// dropped; the first occurrence of a panorama wins, so overlapping reruns
/// collapse to one record each. Output order is scan order.
pub struct GreenView {
    /// A single result file or a folder of them.
    input: PathBuf,
    /// Output path for the assembled layer.
    output_path: PathBuf,
    records: Vec<PanoramaRecord>,
    geojson: Option<GeoJson>,
}

impl GreenView {
    pub fn new<P: Into<PathBuf>>(input: P, output_path: Option<String>) -> Self {
        let output_path_buf = output_path.map(PathBuf::from).unwrap_or_else(get_temp_path);
        GreenView {
            input: input.into(),
            output_path: output_path_buf,
            records: Vec::new(),
            geojson: None,
        }
    }

    /// Aggregate, deduplicate and build the point layer.
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    pub fn run_internal(&mut self) -> Result<()> {
        let files = if self.input.is_dir() {
            let mut names: Vec<PathBuf> = std::fs::read_dir(&self.input)
                .with_context(|| format!("Failed to list result folder: {:?}", self.input))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
                .collect();
            names.sort();
            names
        } else {
            vec![self.input.clone()]
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for path in &files {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read result file: {:?}", path))?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record = match PanoramaRecord::parse_line(line) {
                    Ok(record) => record,
                    Err(error) => {
                        debug!("Skipping unparsable line in {:?}: {}", path, error);
                        continue;
                    }
                };
                if !record.has_valid_green_view() {
                    debug!("Discarding {} with score {:?}", record.pano_id, record.green_view);
                    continue;
                }
                if !seen.insert(record.pano_id.clone()) {
                    continue;
                }
                records.push(record);
            }
        }

        info!(
            "Aggregated {} unique panoramas from {} file(s)",
            records.len(),
            files.len()
        );
        self.records = records;
        self.geojson = Some(GeoJson::from(self.to_feature_collection()));
        Ok(())
    }

    pub fn records(&self) -> &[PanoramaRecord] {
        &self.records
    }

    /// Point features with fields {pointNumber, panoId, panoDate, greenView}.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut properties = Map::new();
                properties.insert("pointNumber".to_string(), json!(index));
                properties.insert("panoId".to_string(), json!(record.pano_id));
                properties.insert("panoDate".to_string(), json!(record.pano_date));
                properties.insert(
                    "greenView".to_string(),
                    json!(record.green_view.unwrap_or(-999.0)),
                );
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Point(vec![
                        record.longitude,
                        record.latitude,
                    ]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    pub fn get_geojson(&self) -> Option<&GeoJson> {
        self.geojson.as_ref()
    }

    /// Save the layer to `<output_path>/<name>.geojson`.
    pub fn to_geojson(&self, name: Option<&str>) -> Result<()> {
        let geojson = self
            .geojson
            .as_ref()
            .context("No data available. Call run() first.")?;

        let name = name.unwrap_or("green_view");
        std::fs::create_dir_all(&self.output_path)
            .with_context(|| format!("Failed to create output folder: {:?}", self.output_path))?;
        let output_file = self.output_path.join(format!("{}.geojson", name));
        std::fs::write(&output_file, geojson.to_string())
            .with_context(|| format!("Failed to write GeoJSON file: {:?}", output_file))?;

        info!("Green view layer saved to: {:?}", output_file);
        Ok(())
    }
}
