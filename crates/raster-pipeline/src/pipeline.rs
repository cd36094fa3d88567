//! End-to-end run: dissolve, rasterize in parallel, assemble.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::assembler::{FeatureStack, FileAssembler, FileAssembly, RowStatus, StackAssembler};
use crate::config::{AssemblerStrategy, PipelineConfig};
use crate::dissolve::{DissolveCache, Dissolver, DroppedGroup};
use crate::error::{PipelineError, Result};
use crate::executor::{CancellationToken, ParallelExecutor, TaskError};
use crate::feature::FeatureSource;
use crate::grid::ReferenceGrid;
use crate::rank::BurnSpec;
use crate::rasterize::Rasterizer;
use crate::sparse::SparseTile;
use crate::writer::ZarrWriter;

/// Directory name of the persisted stack inside the output directory.
pub const STACK_DIR: &str = "stack.zarr";

/// Where a feature was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Group key could not be read; the feature joined no dissolve group.
    Dissolve,
    /// Null, empty or degenerate geometry; dropped before rasterization.
    Geometry,
    /// Output path could not be derived.
    Naming,
    /// Burn value lookup or rasterization returned an error.
    Rasterize,
    /// The rasterization task panicked.
    Panic,
    /// The run was cancelled before the task was dispatched.
    Cancelled,
    /// The output directory or raster could not be written.
    Write,
}

/// A feature that did not make it into the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureFailure {
    /// Position in the input source for `Dissolve` failures, in the
    /// dissolved source otherwise.
    pub index: usize,
    pub key: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Counts and failures of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub input_features: usize,
    /// Features after the dissolve step (equals `input_features` without one).
    pub features: usize,
    pub dropped_groups: Vec<DroppedGroup>,
    pub rasterized: usize,
    pub failures: Vec<FeatureFailure>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    /// Every feature reached the output.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures_at(&self, stage: FailureStage) -> impl Iterator<Item = &FeatureFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    /// Dissolve failures first, then by position.
    fn sort_failures(&mut self) {
        self.failures
            .sort_by_key(|f| (f.stage != FailureStage::Dissolve, f.index));
    }

    /// Failures indexed into the dissolved feature source.
    fn failures_after_dissolve(&self) -> impl Iterator<Item = &FeatureFailure> {
        self.failures.iter().filter(|f| f.stage != FailureStage::Dissolve)
    }
}

/// Assembled result of a run.
#[derive(Debug)]
pub enum PipelineOutput {
    Stack { stack: FeatureStack, path: PathBuf },
    Files(FileAssembly),
}

#[derive(Debug)]
pub struct PipelineRun {
    pub output: PipelineOutput,
    pub report: PipelineReport,
}

/// Drives a full rasterization run for one reference grid.
pub struct RasterPipeline {
    config: PipelineConfig,
    executor: ParallelExecutor,
    cancel: CancellationToken,
}

impl RasterPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::config)?;
        let executor = ParallelExecutor::new(config.executor.clone())?;
        Ok(Self {
            config,
            executor,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that stops dispatch of further rasterization batches.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    /// Run the pipeline over `source` on `grid`.
    pub fn run(&self, grid: &ReferenceGrid, source: FeatureSource) -> Result<PipelineRun> {
        let start = Instant::now();
        let config = &self.config;
        let mut report = PipelineReport {
            input_features: source.len(),
            ..Default::default()
        };

        let source = self.dissolve(source, &mut report)?;
        report.features = source.len();

        let key_columns = self.key_columns();
        let columns = source.select_columns(&config.retain_prefixes, &config.retain_columns);
        let features = source.features();

        let mut candidates = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            match feature.valid_geometry() {
                Ok(_) => candidates.push(index),
                Err(reason) => {
                    let key = feature.describe(&key_columns);
                    warn!(feature = %key, reason, "Dropping feature with unusable geometry");
                    report.failures.push(FeatureFailure {
                        index,
                        key,
                        stage: FailureStage::Geometry,
                        message: reason.to_string(),
                    });
                }
            }
        }

        let writer = ZarrWriter::new(config.zarr.clone());
        let file_plan = match config.assembler {
            AssemblerStrategy::Stack => None,
            AssemblerStrategy::Files => {
                let assembler = FileAssembler::new(
                    &config.output_dir,
                    config.naming.clone(),
                    columns.clone(),
                    writer.clone(),
                );
                let catalog = assembler.plan(candidates.iter().map(|&i| (i, &features[i])))?;
                for row in catalog.rows.iter().filter(|r| r.path.is_none()) {
                    report.failures.push(FeatureFailure {
                        index: row.source_index,
                        key: row.key.clone(),
                        stage: FailureStage::Naming,
                        message: row.status_message(),
                    });
                }
                let planned: HashSet<usize> = catalog.planned().map(|r| r.source_index).collect();
                candidates.retain(|i| planned.contains(i));
                Some((assembler, catalog))
            }
        };

        let rasterizer = Rasterizer::new(grid, config.rasterize_options())?;
        let mask = grid.validity_mask.as_deref();
        info!(
            features = candidates.len(),
            workers = self.executor.workers(),
            touch = %config.touch,
            burn_mode = %config.burn_mode,
            "Rasterizing features"
        );

        let batch = self.executor.run(
            &candidates,
            |_, &index| -> Result<SparseTile> {
                let feature = &features[index];
                let spec = BurnSpec::from_feature(
                    feature,
                    config.burn_mode,
                    &config.rank_column,
                    &key_columns,
                )?;
                let tile = rasterizer.rasterize(&spec.geometry, spec.burn_value)?;
                Ok(SparseTile::from_dense(&tile, mask))
            },
            &self.cancel,
        );

        let mut tiles: Vec<(usize, SparseTile)> = Vec::with_capacity(batch.completed);
        for (slot, outcome) in batch.slots.into_iter().enumerate() {
            let index = candidates[slot];
            match outcome {
                Ok(tile) => tiles.push((index, tile)),
                Err(err) => {
                    let key = features[index].describe(&key_columns);
                    let (stage, message) = match &err {
                        TaskError::Failed { message, .. } => (FailureStage::Rasterize, message.clone()),
                        TaskError::Panicked { message, .. } => (FailureStage::Panic, message.clone()),
                        TaskError::Cancelled { .. } => (FailureStage::Cancelled, err.to_string()),
                    };
                    if stage != FailureStage::Cancelled {
                        warn!(feature = %key, error = %message, "Feature failed");
                    }
                    report.failures.push(FeatureFailure {
                        index,
                        key,
                        stage,
                        message,
                    });
                }
            }
        }
        report.rasterized = tiles.len();
        report.sort_failures();

        if !config.allow_partial {
            if let Some(first) = report.failures.first() {
                return Err(PipelineError::IncompleteBatch {
                    failed: report.failures.len(),
                    total: report.input_features,
                    first: format!("[{}] {}", first.key, first.message),
                });
            }
        }

        let output = match file_plan {
            None => {
                let stack = StackAssembler::new(columns).assemble(
                    grid,
                    config.nodata,
                    tiles.into_iter().map(|(index, tile)| (index, &features[index], tile)),
                )?;
                let path = config.output_dir.join(STACK_DIR);
                writer.write_stack(&path, &stack)?;
                info!(path = %path.display(), features = stack.len(), "Persisted feature stack");
                PipelineOutput::Stack { stack, path }
            }
            Some((assembler, mut catalog)) => {
                for failure in report.failures_after_dissolve() {
                    FileAssembler::mark_failed(&mut catalog, failure.index, failure.message.clone());
                }
                let assembly = assembler.write(
                    grid,
                    config.nodata,
                    catalog,
                    tiles.iter().map(|(index, tile)| (*index, &features[*index], tile)),
                )?;

                let rasterized: HashSet<usize> = tiles.iter().map(|(index, _)| *index).collect();
                for row in assembly.catalog.rows.iter() {
                    if let RowStatus::Failed(message) = &row.status {
                        if rasterized.contains(&row.source_index) {
                            report.failures.push(FeatureFailure {
                                index: row.source_index,
                                key: row.key.clone(),
                                stage: FailureStage::Write,
                                message: message.clone(),
                            });
                        }
                    }
                }
                report.sort_failures();
                PipelineOutput::Files(assembly)
            }
        };

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            input = report.input_features,
            features = report.features,
            rasterized = report.rasterized,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "Pipeline run finished"
        );

        Ok(PipelineRun { output, report })
    }

    fn dissolve(&self, source: FeatureSource, report: &mut PipelineReport) -> Result<FeatureSource> {
        if self.config.group_by.is_empty() {
            return Ok(source);
        }

        let dissolver = Dissolver::new(self.config.group_by.clone())?;
        let output = match &self.config.dissolve_cache_dir {
            Some(dir) => DissolveCache::new(dir).dissolve(&dissolver, &source)?,
            None => dissolver.dissolve(&source)?,
        };

        report.dropped_groups = output.dropped;
        report
            .failures
            .extend(output.rejected.into_iter().map(|r| FeatureFailure {
                index: r.index,
                key: r.key,
                stage: FailureStage::Dissolve,
                message: r.reason,
            }));
        Ok(output.features)
    }

    /// Columns used to identify features in logs and errors.
    fn key_columns(&self) -> Vec<String> {
        if self.config.group_by.is_empty() {
            self.config.naming.columns()
        } else {
            self.config.group_by.clone()
        }
    }
}
