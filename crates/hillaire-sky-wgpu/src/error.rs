//! Error taxonomy for the precompute pipeline
//!
//! Construction errors ([`PipelineError`]) never expose a partial pipeline to
//! the host; run errors ([`RunError`]) abort the current run while keeping the
//! tables of already-completed stages valid; export errors ([`ExportError`])
//! are recoverable and never invalidate in-memory tables. Nothing in this
//! crate retries on its own; retry decisions belong to the host.

use crate::lut::LutId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort pipeline construction or a table store lookup.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Backing storage for a table could not be created.
    #[error("failed to allocate table {id} ({width}x{height}x{depth}): {reason}")]
    Allocation {
        /// Table that failed to allocate
        id: LutId,
        /// Requested width in texels
        width: u32,
        /// Requested height in texels
        height: u32,
        /// Requested depth in texels (1 for 2D tables)
        depth: u32,
        /// Device- or descriptor-level failure reason
        reason: String,
    },

    /// A kernel's interface does not match the bindings its stage declares.
    ///
    /// Detected while binding the stage, so a misauthored stage fails
    /// construction instead of corrupting a run. Stage indices are 0-based.
    #[error("stage {stage} ({name}): kernel rejected the declared bindings: {reason}")]
    KernelBinding {
        /// 0-based ordinal of the offending stage
        stage: usize,
        /// Stage name for diagnostics
        name: String,
        /// Validation failure reason reported by the device
        reason: String,
    },

    /// A stage reads a table that no earlier stage writes.
    #[error("stage {stage} ({name}): input {input} is not written by any earlier stage")]
    InvalidPipeline {
        /// 0-based ordinal of the offending stage
        stage: usize,
        /// Stage name for diagnostics
        name: String,
        /// The dangling input table
        input: LutId,
    },

    /// Two stages declare the same output table.
    #[error("stage {stage} ({name}): output {output} is already written by stage {earlier}")]
    DuplicateOutput {
        /// 0-based ordinal of the offending stage
        stage: usize,
        /// Stage name for diagnostics
        name: String,
        /// The doubly-written table
        output: LutId,
        /// 0-based ordinal of the stage that writes it first
        earlier: usize,
    },

    /// Lookup of a table that was never allocated, or has been released.
    #[error("table {id} has not been allocated")]
    TableNotFound {
        /// The missing table
        id: LutId,
    },

    /// A table was allocated twice without an intervening release.
    #[error("table {id} is already allocated")]
    AlreadyAllocated {
        /// The doubly-allocated table
        id: LutId,
    },
}

/// Errors that abort a pipeline run.
///
/// Tables written by stages before the failing one remain valid. The failing
/// stage's table and every later one are indeterminate and must not be
/// sampled until the next successful run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A stage's dispatch was rejected by the device.
    #[error("stage {stage} ({name}) failed: {reason}")]
    Stage {
        /// 0-based ordinal of the failed stage
        stage: usize,
        /// Stage name for diagnostics
        name: String,
        /// Failure reason reported by the device
        reason: String,
    },

    /// Cooperative cancellation observed before the named stage dispatched.
    #[error("run cancelled before stage {stage}")]
    Cancelled {
        /// 0-based ordinal of the first stage that did not run
        stage: usize,
    },
}

/// Errors from exporting or importing a persisted table artifact.
///
/// These are recoverable: the in-memory table stays valid, only the on-disk
/// cache is stale.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The GPU→host copy of a table failed.
    #[error("read-back of table {id} failed: {reason}")]
    Readback {
        /// Table whose read-back failed
        id: LutId,
        /// Failure reason
        reason: String,
    },

    /// The GPU→host copy did not complete within the configured timeout.
    #[error("read-back of table {id} timed out after {timeout:?}")]
    Timeout {
        /// Table whose read-back timed out
        id: LutId,
        /// The configured timeout
        timeout: Duration,
    },

    /// A persisted artifact does not match the shape of its table.
    #[error("artifact {path:?} is {found_width}x{found_height}, expected {expected_width}x{expected_height}")]
    ShapeMismatch {
        /// Path of the offending artifact
        path: PathBuf,
        /// Decoded artifact width
        found_width: u32,
        /// Decoded artifact height (depth slices stacked vertically)
        found_height: u32,
        /// Expected width
        expected_width: u32,
        /// Expected height × depth
        expected_height: u32,
    },

    /// Encoding or decoding the image container failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Filesystem failure (disk full, permission denied, ...).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
