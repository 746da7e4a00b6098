use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info, warn};

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::collect::batch::partition;
use crate::collect::checkpoint::{resume_state, CheckpointStore, ResumeState};
use crate::collect::global_variables::DEFAULT_BATCH_SIZE;
use crate::collect::gsv::{PanoLookup, PanoramaService};
use crate::collect::points::PointSource;
use crate::collect::record::PanoramaRecord;
use crate::collect::SchedulingPolicy;
use crate::geo_core::GeoCore;

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent} {msg}")
        .unwrap()
        .progress_chars("##-")
}

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub batch_size: usize,
    /// Resume from the durable checkpoint instead of starting over.
    pub resume: bool,
    /// Compare the source spatial reference against WGS84 and reproject
    /// when it differs. When false the source is trusted to be WGS84.
    pub require_projection_check: bool,
    pub policy: SchedulingPolicy,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        CollectorOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            resume: true,
            require_projection_check: true,
            policy: SchedulingPolicy::default(),
        }
    }
}

/// Counters reported by one collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub batches: usize,
    pub skipped_batches: usize,
    pub attempted: usize,
    pub collected: usize,
    pub no_data: usize,
    pub failed: usize,
}

/// Collects panorama metadata for every sample point, batch by batch.
///
/// Points are processed strictly in ascending index order. Each successful
/// record is flushed and synced to its batch file before the checkpoint
/// advances, so the checkpointed index never runs ahead of the durable
/// output and a killed run resumes without losing or duplicating work.
pub struct MetadataCollector<'a, S: PanoramaService> {
    service: &'a S,
    keys: Vec<String>,
    output_dir: PathBuf,
    store: CheckpointStore,
    options: CollectorOptions,
}

impl<'a, S: PanoramaService> MetadataCollector<'a, S> {
    pub fn new<P: Into<PathBuf>>(
        service: &'a S,
        keys: Vec<String>,
        output_dir: P,
        options: CollectorOptions,
    ) -> Result<Self> {
        anyhow::ensure!(!keys.is_empty(), "At least one API key is required");
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output folder: {:?}", output_dir))?;
        let store = CheckpointStore::in_dir(&output_dir);
        Ok(MetadataCollector {
            service,
            keys,
            output_dir,
            store,
            options,
        })
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn run(&self, source: &dyn PointSource) -> Result<CollectSummary> {
        let total = source.len();
        let batches = partition(total, self.options.batch_size);
        info!(
            "Collecting metadata: {} points, {} keys, {} batches",
            total,
            self.keys.len(),
            batches.len()
        );

        let checkpoint = if self.options.resume {
            self.store.load()?
        } else {
            self.store.reset()?;
            None
        };
        if let Some(checkpoint) = &checkpoint {
            info!(
                "Resuming from {} after index {} (serial {})",
                checkpoint.batch_file, checkpoint.completed_index, checkpoint.serial
            );
        }

        let source_frame = GeoCore::new(source.spatial_ref());
        let needs_transform = self.options.require_projection_check && !source_frame.is_canonical();
        if needs_transform {
            info!(
                "Source frame EPSG:{} will be reprojected to WGS84",
                source_frame.get_epsg()
            );
        }

        let mut summary = CollectSummary {
            batches: batches.len(),
            ..CollectSummary::default()
        };
        let mut serial = checkpoint.as_ref().map(|c| c.serial).unwrap_or(0);

        #[cfg(feature = "indicatif")]
        let progress = {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(progress_style());
            pb
        };

        for batch in &batches {
            let batch_file = batch.file_name();
            let batch_path = self.output_dir.join(&batch_file);

            let (mut output, start_index) = match resume_state(checkpoint.as_ref(), batch) {
                ResumeState::Skip => {
                    debug!("Skipping completed batch {}", batch_file);
                    summary.skipped_batches += 1;
                    #[cfg(feature = "indicatif")]
                    progress.inc(batch.len() as u64);
                    continue;
                }
                ResumeState::Resume { next_index } => {
                    info!("Appending to batch {} from index {}", batch_file, next_index);
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&batch_path)
                        .with_context(|| format!("Failed to open batch file: {:?}", batch_path))?;
                    (file, next_index.max(batch.start_index))
                }
                ResumeState::Fresh => {
                    debug!("Starting batch {}", batch_file);
                    let file = File::create(&batch_path)
                        .with_context(|| format!("Failed to create batch file: {:?}", batch_path))?;
                    (file, batch.start_index)
                }
            };

            #[cfg(feature = "indicatif")]
            progress.inc(start_index.saturating_sub(batch.start_index) as u64);

            for index in start_index..batch.end_index {
                #[cfg(feature = "indicatif")]
                progress.inc(1);
                summary.attempted += 1;

                let point = match source.get(index) {
                    Ok(Some(point)) => point,
                    Ok(None) => {
                        debug!("Point {} has no geometry; skipping", index);
                        continue;
                    }
                    Err(error) => {
                        warn!("Failed to read point {}: {:#}", index, error);
                        continue;
                    }
                };

                let (lon, lat) = if needs_transform {
                    match source_frame.to_canonical(point.longitude, point.latitude) {
                        Ok(coordinates) => coordinates,
                        Err(error) => {
                            warn!("Failed to reproject point {}: {:#}", index, error);
                            continue;
                        }
                    }
                } else {
                    (point.longitude, point.latitude)
                };

                let key = &self.keys[index % self.keys.len()];
                self.options.policy.throttle();

                let lookup = match self.service.metadata(lat, lon, key) {
                    Ok(lookup) => lookup,
                    Err(error) => {
                        // Transient: not checkpointed, so a later run
                        // covering this range retries the point.
                        warn!("Metadata request failed at index {}: {:#}", index, error);
                        summary.failed += 1;
                        continue;
                    }
                };

                match lookup {
                    PanoLookup::NoData => {
                        debug!("No panorama at index {}", index);
                        summary.no_data += 1;
                        // Permanent absence: checkpointed, never retried.
                        self.store.advance(&batch_file, index, serial)?;
                    }
                    PanoLookup::Found(metadata) => {
                        let record = PanoramaRecord {
                            pano_id: metadata.pano_id,
                            pano_date: metadata.date,
                            longitude: metadata.lng,
                            latitude: metadata.lat,
                            street_id: point.street_id,
                            street_name: point.street_name,
                            point_id: point.point_id,
                            green_view: None,
                        };
                        writeln!(output, "{}", record.to_line())
                            .with_context(|| format!("Failed to write record to {}", batch_file))?;
                        // The record must be durable before the checkpoint
                        // moves past it.
                        output
                            .sync_all()
                            .with_context(|| format!("Failed to sync {}", batch_file))?;
                        serial += 1;
                        self.store.advance(&batch_file, index, serial)?;
                        summary.collected += 1;
                    }
                }
            }
        }

        #[cfg(feature = "indicatif")]
        progress.finish();

        info!(
            "Metadata collection finished: {} collected, {} without data, {} failed",
            summary.collected, summary.no_data, summary.failed
        );
        Ok(summary)
    }
}
