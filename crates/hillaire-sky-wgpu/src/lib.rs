//! Precomputed atmospheric-scattering LUTs for a Hillaire-style sky
//!
//! This crate schedules and caches the lookup tables a sky renderer samples
//! at draw time: transmittance → multi-scattering → sky-view →
//! aerial-perspective. It owns the GPU-resident tables, runs the compute
//! stages in dependency order on a single queue, and persists each table as
//! a lossless EXR so later sessions can import instead of recompute.
//!
//! The scattering math inside the kernels and the final sky compositing are
//! external collaborators; the built-in kernels in [`presets`] exist so the
//! pipeline is runnable out of the box, and hosts can swap in their own WGSL
//! as long as it follows the binding convention documented in [`stage`].
//!
//! ```no_run
//! # fn demo(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), Box<dyn std::error::Error>> {
//! use hillaire_sky_wgpu::{LutId, PrecomputeConfig, SkyLuts};
//!
//! let mut sky = SkyLuts::new(device, PrecomputeConfig::hillaire("lut-cache"))?;
//! if sky.requires_precompute() {
//!     let report = sky.precompute(device, queue)?;
//!     println!("imported {} tables, exported {}", report.imported.len(), report.exported.len());
//!     sky.mark_clean();
//! }
//! let sky_view = sky.table(LutId::SkyView)?;
//! # let _ = sky_view;
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod lut;
mod scheduler;
pub mod stage;
mod staleness;

pub mod presets;

pub use cache::{DEFAULT_READBACK_TIMEOUT, ExportOutcome, LutCache};
pub use error::{ExportError, PipelineError, RunError};
pub use lut::{LutId, LutTable, TableDesc, TableFormat, TableStore};
pub use scheduler::{CancelFlag, PipelineScheduler, PipelineState, RunOptions};
pub use stage::StageDesc;
pub use staleness::Staleness;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`SkyLuts`] instance.
#[derive(Debug)]
pub struct PrecomputeConfig {
    /// Every table the pipeline reads or writes; allocated up front.
    pub tables: Vec<TableDesc>,
    /// The stage list, in dependency order.
    pub stages: Vec<StageDesc>,
    /// Flat directory holding one artifact per table.
    pub export_dir: PathBuf,
    /// When true, a stage whose output has a valid artifact is not
    /// dispatched; the artifact is imported into the table instead. When
    /// false every stage is recomputed every run, matching the original
    /// design, and the cache only gates the export step.
    pub use_cached: bool,
    /// Upper bound on the blocking GPU→host read-back during export.
    pub readback_timeout: Duration,
}

impl PrecomputeConfig {
    /// The standard Hillaire pipeline, persisting artifacts under
    /// `export_dir`.
    pub fn hillaire(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            tables: presets::tables(),
            stages: presets::stages(),
            export_dir: export_dir.into(),
            use_cached: true,
            readback_timeout: DEFAULT_READBACK_TIMEOUT,
        }
    }
}

/// Summary of one [`SkyLuts::precompute`] call.
#[derive(Debug, Default)]
pub struct PrecomputeReport {
    /// Tables imported from persisted artifacts instead of being computed.
    pub imported: Vec<LutId>,
    /// Tables freshly exported after the run.
    pub exported: Vec<LutId>,
    /// Export failures. Non-fatal: the in-memory tables stay valid, only
    /// the on-disk cache is stale.
    pub export_errors: Vec<ExportError>,
}

/// The host-facing owner of the precompute pipeline.
///
/// Holds the table store, the scheduler, the persistence cache and the
/// staleness switch. The intended per-frame flow is: query
/// [`SkyLuts::requires_precompute`], run [`SkyLuts::precompute`] when it is
/// true, call [`SkyLuts::mark_clean`] after a satisfactory run, and sample
/// the tables via [`SkyLuts::table`]. The tables are read-only to the host
/// outside of a `precompute` call.
pub struct SkyLuts {
    store: TableStore,
    scheduler: PipelineScheduler,
    cache: LutCache,
    staleness: Staleness,
    table_descs: Vec<TableDesc>,
    use_cached: bool,
}

impl SkyLuts {
    /// Allocates every table and binds every stage.
    ///
    /// Fails without exposing a partial pipeline: allocation, structural and
    /// kernel-binding errors all surface here (see [`PipelineError`]).
    pub fn new(device: &wgpu::Device, config: PrecomputeConfig) -> Result<Self, PipelineError> {
        let mut store = TableStore::new();
        for desc in &config.tables {
            store.allocate(device, *desc)?;
        }

        let scheduler = PipelineScheduler::build(device, &store, &config.stages)?;
        let cache = LutCache::new(config.export_dir).with_readback_timeout(config.readback_timeout);

        Ok(Self {
            store,
            scheduler,
            cache,
            staleness: Staleness::new(),
            table_descs: config.tables,
            use_cached: config.use_cached,
        })
    }

    /// Whether the host should run [`SkyLuts::precompute`] before sampling
    /// the tables. True until the host calls [`SkyLuts::mark_clean`].
    pub fn requires_precompute(&self) -> bool {
        self.staleness.needs_update()
    }

    /// Host acknowledgement of a satisfactory run.
    pub fn mark_clean(&mut self) {
        self.staleness.mark_clean();
    }

    /// Marks the tables stale, e.g. after an atmosphere parameter change.
    pub fn invalidate(&mut self) {
        self.staleness.invalidate();
    }

    /// Current scheduler lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.scheduler.state()
    }

    /// The persistence cache, e.g. for artifact paths.
    pub fn cache(&self) -> &LutCache {
        &self.cache
    }

    /// Runs the pipeline and refreshes the persisted artifacts.
    pub fn precompute(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<PrecomputeReport, RunError> {
        self.precompute_with(device, queue, None)
    }

    /// Like [`SkyLuts::precompute`], checking `cancel` between stages.
    ///
    /// The call runs unconditionally; staleness is the host's decision and
    /// is queried separately via [`SkyLuts::requires_precompute`]. Tables
    /// with a valid persisted artifact are imported instead of computed
    /// (unless the config disables cache use), then the remaining stages run
    /// in order, then every table without an artifact is exported. Export
    /// failures are logged and collected in the report, never propagated:
    /// compute success stands even when the disk is full.
    pub fn precompute_with(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, cancel: Option<&CancelFlag>) -> Result<PrecomputeReport, RunError> {
        let mut report = PrecomputeReport::default();
        let mut satisfied = HashSet::new();

        if self.use_cached {
            for desc in &self.table_descs {
                if !self.cache.is_cached(desc) {
                    continue;
                }
                let Ok(table) = self.store.get(desc.id) else { continue };
                match self.cache.import(queue, table) {
                    Ok(()) => {
                        satisfied.insert(desc.id);
                        report.imported.push(desc.id);
                    }
                    Err(error) => {
                        tracing::warn!(table = %desc.id, %error, "failed to import cached artifact, recomputing");
                    }
                }
            }
        }

        self.scheduler.run(
            device,
            queue,
            &RunOptions {
                skip: satisfied.clone(),
                cancel,
            },
        )?;

        for desc in &self.table_descs {
            if satisfied.contains(&desc.id) {
                continue;
            }
            let Ok(table) = self.store.get(desc.id) else { continue };
            match self.cache.export(device, queue, table) {
                Ok(ExportOutcome::Written) => report.exported.push(desc.id),
                Ok(ExportOutcome::AlreadyCached) => {}
                Err(error) => {
                    tracing::warn!(table = %desc.id, %error, "table export failed; the in-memory table remains valid");
                    report.export_errors.push(error);
                }
            }
        }

        Ok(report)
    }

    /// Read access to a table for the rendering stage.
    pub fn table(&self, id: LutId) -> Result<&LutTable, PipelineError> {
        self.store.get(id)
    }

    /// Frees every table. The instance is done afterwards; [`SkyLuts::table`]
    /// returns [`PipelineError::TableNotFound`].
    pub fn release_all(&mut self) {
        self.store.release_all();
    }
}
