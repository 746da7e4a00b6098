use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::collect::checkpoint::CHECKPOINT_FILE;
use crate::collect::global_variables::{all_months, default_headings};
use crate::collect::gsv::PanoramaService;
use crate::collect::record::{
    PanoramaRecord, CLASSIFY_FAILURE_SCORE, FETCH_FAILURE_SCORE,
};
use crate::collect::SchedulingPolicy;
use crate::commons::basic_functions::pano_month;
use crate::geometric::vegetation::vegetation_percentage;

#[derive(Debug, Clone)]
pub struct GreenViewOptions {
    /// Compass headings imaged per panorama; their count is the averaging
    /// denominator.
    pub headings: Vec<f64>,
    /// Capture months eligible for imaging ("01".."12"). Panoramas outside
    /// the season are never imaged.
    pub green_months: Vec<String>,
    pub policy: SchedulingPolicy,
}

impl Default for GreenViewOptions {
    fn default() -> Self {
        GreenViewOptions {
            headings: default_headings(),
            green_months: all_months(),
            policy: SchedulingPolicy::default(),
        }
    }
}

/// Counters reported by one scoring run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GreenViewSummary {
    pub files: usize,
    pub skipped_files: usize,
    pub scored: usize,
    pub failed: usize,
    pub out_of_season: usize,
    pub malformed_lines: usize,
}

/// Scores collected panoramas for vegetation coverage.
///
/// Reads metadata batch files, fetches one image per configured heading and
/// averages their classification. The policy is all-or-nothing per
/// panorama: a partial average would bias the score toward whichever
/// headings happened to succeed, so any failed heading marks the whole
/// panorama with a failure sentinel instead.
pub struct GreenViewComputer<'a, S: PanoramaService> {
    service: &'a S,
    keys: Vec<String>,
    output_dir: PathBuf,
    options: GreenViewOptions,
}

impl<'a, S: PanoramaService> GreenViewComputer<'a, S> {
    pub fn new<P: Into<PathBuf>>(
        service: &'a S,
        keys: Vec<String>,
        output_dir: P,
        options: GreenViewOptions,
    ) -> Result<Self> {
        anyhow::ensure!(!keys.is_empty(), "At least one API key is required");
        anyhow::ensure!(
            !options.headings.is_empty(),
            "At least one viewing heading is required"
        );
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output folder: {:?}", output_dir))?;
        Ok(GreenViewComputer {
            service,
            keys,
            output_dir,
            options,
        })
    }

    pub fn run(&self, metadata_dir: &Path) -> Result<GreenViewSummary> {
        anyhow::ensure!(
            metadata_dir.is_dir(),
            "Metadata folder not found: {:?}",
            metadata_dir
        );

        let mut names: Vec<String> = std::fs::read_dir(metadata_dir)
            .with_context(|| format!("Failed to list metadata folder: {:?}", metadata_dir))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".txt") && name != CHECKPOINT_FILE)
            .collect();
        names.sort();

        let mut summary = GreenViewSummary::default();
        for name in names {
            let output_name = format!("GV_{}", name);
            let output_path = self.output_dir.join(&output_name);
            // Result files are written atomically whole, so an existing one
            // is always complete and can be skipped.
            if output_path.exists() {
                info!("Skipping {}: {} already present", name, output_name);
                summary.skipped_files += 1;
                continue;
            }

            info!("Scoring panoramas from {}", name);
            let content = std::fs::read_to_string(metadata_dir.join(&name))
                .with_context(|| format!("Failed to read batch file: {}", name))?;

            let mut lines_out = Vec::new();
            let mut counter = 0usize;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let mut record = match PanoramaRecord::parse_line(line) {
                    Ok(record) => record,
                    Err(error) => {
                        warn!("Skipping malformed line in {}: {}", name, error);
                        summary.malformed_lines += 1;
                        continue;
                    }
                };

                let in_season = pano_month(&record.pano_date)
                    .map(|month| self.options.green_months.iter().any(|m| m == month))
                    .unwrap_or(false);
                if !in_season {
                    debug!(
                        "Panorama {} captured {} is out of season",
                        record.pano_id, record.pano_date
                    );
                    summary.out_of_season += 1;
                    continue;
                }

                let key = &self.keys[counter % self.keys.len()];
                counter += 1;

                let score = self.panorama_score(&record.pano_id, key);
                if score >= 0.0 {
                    summary.scored += 1;
                } else {
                    summary.failed += 1;
                }
                debug!("Green view {:.2} for panorama {}", score, record.pano_id);
                record.green_view = Some(score);
                lines_out.push(record.to_line());
            }

            self.write_result_file(&output_path, &lines_out)?;
            summary.files += 1;
        }

        info!(
            "Green view scoring finished: {} files, {} panoramas scored, {} failed",
            summary.files, summary.scored, summary.failed
        );
        Ok(summary)
    }

    /// Mean classification over all headings, or a failure sentinel.
    fn panorama_score(&self, pano_id: &str, key: &str) -> f64 {
        let mut sum = 0.0;
        for &heading in &self.options.headings {
            self.options.policy.throttle();
            let bytes = match self.service.image(pano_id, heading, key) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(
                        "Image fetch failed for {} at heading {}: {:#}",
                        pano_id, heading, error
                    );
                    return FETCH_FAILURE_SCORE;
                }
            };
            let img = match image::load_from_memory(&bytes) {
                Ok(img) => img,
                Err(error) => {
                    warn!(
                        "Image decode failed for {} at heading {}: {}",
                        pano_id, heading, error
                    );
                    return FETCH_FAILURE_SCORE;
                }
            };
            match vegetation_percentage(&img) {
                Ok(percent) => sum += percent,
                Err(error) => {
                    warn!(
                        "Classification failed for {} at heading {}: {:#}",
                        pano_id, heading, error
                    );
                    return CLASSIFY_FAILURE_SCORE;
                }
            }
        }
        sum / self.options.headings.len() as f64
    }

    /// Write the whole result file through a temp file and rename, so a
    /// crash never leaves a partial file behind.
    fn write_result_file(&self, output_path: &Path, lines: &[String]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.output_dir)
            .with_context(|| format!("Failed to create temp file in {:?}", self.output_dir))?;
        for line in lines {
            writeln!(tmp, "{}", line)
                .with_context(|| format!("Failed to write result file: {:?}", output_path))?;
        }
        tmp.flush()
            .with_context(|| format!("Failed to flush result file: {:?}", output_path))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync result file: {:?}", output_path))?;
        tmp.persist(output_path)
            .with_context(|| format!("Failed to persist result file: {:?}", output_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::gsv::PanoLookup;
    use std::collections::{HashMap, HashSet};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([r, g, b]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn gray_png_bytes() -> Vec<u8> {
        let img = image::GrayImage::from_pixel(4, 4, image::Luma([128]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    struct FakeImageService {
        images: HashMap<(String, i64), Vec<u8>>,
        unavailable: HashSet<(String, i64)>,
    }

    impl FakeImageService {
        fn new() -> Self {
            FakeImageService {
                images: HashMap::new(),
                unavailable: HashSet::new(),
            }
        }

        fn with_image(mut self, pano_id: &str, heading: f64, bytes: Vec<u8>) -> Self {
            self.images.insert((pano_id.to_string(), heading as i64), bytes);
            self
        }

        fn with_outage(mut self, pano_id: &str, heading: f64) -> Self {
            self.unavailable.insert((pano_id.to_string(), heading as i64));
            self
        }
    }

    impl PanoramaService for FakeImageService {
        fn metadata(&self, _lat: f64, _lon: f64, _key: &str) -> Result<PanoLookup> {
            anyhow::bail!("not a metadata service")
        }

        fn image(&self, pano_id: &str, heading: f64, _key: &str) -> Result<Vec<u8>> {
            let slot = (pano_id.to_string(), heading as i64);
            if self.unavailable.contains(&slot) {
                anyhow::bail!("simulated outage");
            }
            self.images
                .get(&slot)
                .cloned()
                .with_context(|| format!("no image for {} at {}", pano_id, heading))
        }
    }

    fn metadata_line(pano_id: &str, pano_date: &str) -> String {
        PanoramaRecord {
            pano_id: pano_id.to_string(),
            pano_date: pano_date.to_string(),
            longitude: 79.97,
            latitude: 14.44,
            street_id: None,
            street_name: None,
            point_id: None,
            green_view: None,
        }
        .to_line()
    }

    fn two_heading_options() -> GreenViewOptions {
        GreenViewOptions {
            headings: vec![0.0, 180.0],
            policy: SchedulingPolicy::unthrottled(),
            ..GreenViewOptions::default()
        }
    }

    fn result_records(dir: &TempDir, name: &str) -> Vec<PanoramaRecord> {
        let content = std::fs::read_to_string(dir.path().join(name)).unwrap();
        content
            .lines()
            .map(|line| PanoramaRecord::parse_line(line).unwrap())
            .collect()
    }

    #[test]
    fn test_scores_average_over_headings() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            metadata.path().join("Pnt_start0_end1.txt"),
            metadata_line("pano-a", "2019-07") + "\n",
        )
        .unwrap();

        // One fully green heading, one gray: the mean is 50.
        let service = FakeImageService::new()
            .with_image("pano-a", 0.0, png_bytes(0, 200, 0))
            .with_image("pano-a", 180.0, png_bytes(128, 128, 128));
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            two_heading_options(),
        )
        .unwrap();

        let summary = computer.run(metadata.path()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.scored, 1);

        let records = result_records(&output, "GV_Pnt_start0_end1.txt");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].green_view, Some(50.0));
        assert!(records[0].has_valid_green_view());
    }

    #[test]
    fn test_single_failed_heading_fails_the_panorama() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            metadata.path().join("Pnt_start0_end1.txt"),
            metadata_line("pano-a", "2019-07") + "\n",
        )
        .unwrap();

        let service = FakeImageService::new()
            .with_image("pano-a", 0.0, png_bytes(0, 200, 0))
            .with_outage("pano-a", 180.0);
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            two_heading_options(),
        )
        .unwrap();

        let summary = computer.run(metadata.path()).unwrap();
        assert_eq!(summary.failed, 1);
        let records = result_records(&output, "GV_Pnt_start0_end1.txt");
        assert_eq!(records[0].green_view, Some(FETCH_FAILURE_SCORE));
        assert!(!records[0].has_valid_green_view());
    }

    #[test]
    fn test_unclassifiable_image_marks_classification_failure() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            metadata.path().join("Pnt_start0_end1.txt"),
            metadata_line("pano-a", "2019-07") + "\n",
        )
        .unwrap();

        // A grayscale image decodes fine but has no color channels.
        let service = FakeImageService::new().with_image("pano-a", 0.0, gray_png_bytes());
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            GreenViewOptions {
                headings: vec![0.0],
                policy: SchedulingPolicy::unthrottled(),
                ..GreenViewOptions::default()
            },
        )
        .unwrap();

        computer.run(metadata.path()).unwrap();
        let records = result_records(&output, "GV_Pnt_start0_end1.txt");
        assert_eq!(records[0].green_view, Some(CLASSIFY_FAILURE_SCORE));
    }

    #[test]
    fn test_out_of_season_panorama_is_never_imaged() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            metadata.path().join("Pnt_start0_end1.txt"),
            metadata_line("pano-a", "2020-01") + "\n",
        )
        .unwrap();

        // The service would fail any request; it must never be called.
        let service = FakeImageService::new();
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            GreenViewOptions {
                green_months: vec!["06".to_string(), "07".to_string()],
                ..two_heading_options()
            },
        )
        .unwrap();

        let summary = computer.run(metadata.path()).unwrap();
        assert_eq!(summary.out_of_season, 1);
        assert!(result_records(&output, "GV_Pnt_start0_end1.txt").is_empty());
    }

    #[test]
    fn test_existing_result_file_is_skipped() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            metadata.path().join("Pnt_start0_end1.txt"),
            metadata_line("pano-a", "2019-07") + "\n",
        )
        .unwrap();
        std::fs::write(output.path().join("GV_Pnt_start0_end1.txt"), "existing\n").unwrap();

        let service = FakeImageService::new();
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            two_heading_options(),
        )
        .unwrap();

        let summary = computer.run(metadata.path()).unwrap();
        assert_eq!(summary.skipped_files, 1);
        assert_eq!(summary.files, 0);
        let content =
            std::fs::read_to_string(output.path().join("GV_Pnt_start0_end1.txt")).unwrap();
        assert_eq!(content, "existing\n");
    }

    #[test]
    fn test_malformed_lines_and_checkpoint_file_are_ignored() {
        let metadata = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let content = format!("garbage line\n{}\n", metadata_line("pano-a", "2019-07"));
        std::fs::write(metadata.path().join("Pnt_start0_end1.txt"), content).unwrap();
        std::fs::write(metadata.path().join(CHECKPOINT_FILE), "Pnt_start0_end1.txt,0,1").unwrap();

        let service = FakeImageService::new()
            .with_image("pano-a", 0.0, png_bytes(0, 200, 0))
            .with_image("pano-a", 180.0, png_bytes(0, 200, 0));
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            two_heading_options(),
        )
        .unwrap();

        let summary = computer.run(metadata.path()).unwrap();
        assert_eq!(summary.malformed_lines, 1);
        assert_eq!(summary.files, 1);
        assert!(!output.path().join("GV_resume_log.txt").exists());
        assert_eq!(result_records(&output, "GV_Pnt_start0_end1.txt").len(), 1);
    }

    #[test]
    fn test_missing_metadata_folder_is_an_error() {
        let output = TempDir::new().unwrap();
        let service = FakeImageService::new();
        let computer = GreenViewComputer::new(
            &service,
            vec!["k".to_string()],
            output.path(),
            two_heading_options(),
        )
        .unwrap();
        assert!(computer.run(Path::new("/nonexistent/metadata")).is_err());
    }
}
