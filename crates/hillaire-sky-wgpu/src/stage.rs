//! Stage descriptors, the fixed kernel binding convention and dispatch math
//!
//! A stage is one unit of pipeline work: a single compute kernel bound to one
//! output table and zero or more input tables. The stage list is statically
//! ordered; whoever adds a stage places it after every stage it reads from,
//! and [`validate_stages`] rejects lists that break that rule.
//!
//! Kernel binding convention (group 0):
//! - binding 0: the output table as a write-only storage texture, named
//!   `result` in the kernel
//! - bindings 1..=N: the declared inputs, in order, as sampled textures
//! - binding N+1: a linear clamp-to-edge sampler, present only when the stage
//!   has inputs
//!
//! The kernel entry point is always `main`.

use crate::error::PipelineError;
use crate::lut::LutId;
use std::collections::HashMap;

/// Compute workgroup size in X, fixed for every kernel.
pub const WORKGROUP_SIZE_X: u32 = 8;
/// Compute workgroup size in Y, fixed for every kernel.
pub const WORKGROUP_SIZE_Y: u32 = 8;
/// Compute workgroup size in Z, fixed for every kernel.
pub const WORKGROUP_SIZE_Z: u32 = 1;

/// One unit of pipeline work.
#[derive(Debug, Clone)]
pub struct StageDesc {
    /// Debug label; also the label of the compute pipeline and its passes.
    pub name: String,
    /// WGSL source of the kernel. Entry point must be `main` and the
    /// declared bindings must follow the module-level convention.
    pub shader: String,
    /// Table this stage writes (binding 0).
    pub output: LutId,
    /// Tables this stage reads, bound at 1..=N in order. Each must be the
    /// output of a stage with a strictly smaller ordinal.
    pub inputs: Vec<LutId>,
}

impl StageDesc {
    /// Creates a stage descriptor.
    pub fn new(name: impl Into<String>, shader: impl Into<String>, output: LutId, inputs: Vec<LutId>) -> Self {
        Self {
            name: name.into(),
            shader: shader.into(),
            output,
            inputs,
        }
    }
}

/// Dispatch grid for an output table shape: ceiling division per axis by the
/// fixed workgroup size.
pub fn dispatch_grid(width: u32, height: u32, depth: u32) -> (u32, u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE_X),
        height.div_ceil(WORKGROUP_SIZE_Y),
        depth.div_ceil(WORKGROUP_SIZE_Z),
    )
}

/// Validates the acyclic-by-construction invariant of an ordered stage list.
///
/// Every input of a stage must be the output of a stage with a strictly
/// smaller ordinal, and no two stages may write the same table. The first
/// violation is reported with its 0-based stage index.
pub fn validate_stages(stages: &[StageDesc]) -> Result<(), PipelineError> {
    let mut written: HashMap<LutId, usize> = HashMap::new();

    for (index, stage) in stages.iter().enumerate() {
        for &input in &stage.inputs {
            if !written.contains_key(&input) {
                return Err(PipelineError::InvalidPipeline {
                    stage: index,
                    name: stage.name.clone(),
                    input,
                });
            }
        }
        if let Some(&earlier) = written.get(&stage.output) {
            return Err(PipelineError::DuplicateOutput {
                stage: index,
                name: stage.name.clone(),
                output: stage.output,
                earlier,
            });
        }
        written.insert(stage.output, index);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, output: LutId, inputs: Vec<LutId>) -> StageDesc {
        StageDesc::new(name, "", output, inputs)
    }

    #[test]
    fn grid_is_exact_for_aligned_tables() {
        assert_eq!(dispatch_grid(256, 64, 1), (32, 8, 1));
    }

    #[test]
    fn grid_rounds_up_for_unaligned_tables() {
        // 100 / 8 = 12.5, so the Y axis needs a 13th workgroup.
        assert_eq!(dispatch_grid(200, 100, 1), (25, 13, 1));
    }

    #[test]
    fn grid_covers_depth_per_slice() {
        assert_eq!(dispatch_grid(32, 32, 32), (4, 4, 32));
    }

    #[test]
    fn valid_ordering_is_accepted() {
        let stages = [
            stage("transmittance", LutId::Transmittance, vec![]),
            stage("multi_scattering", LutId::MultiScattering, vec![LutId::Transmittance]),
            stage("sky_view", LutId::SkyView, vec![LutId::Transmittance, LutId::MultiScattering]),
        ];
        assert!(validate_stages(&stages).is_ok());
    }

    #[test]
    fn dangling_input_is_rejected_with_stage_index() {
        let stages = [
            stage("transmittance", LutId::Transmittance, vec![]),
            stage("sky_view", LutId::SkyView, vec![LutId::MultiScattering]),
        ];
        match validate_stages(&stages) {
            Err(PipelineError::InvalidPipeline { stage: 1, input: LutId::MultiScattering, .. }) => {}
            other => panic!("expected InvalidPipeline for stage 1, got {other:?}"),
        }
    }

    #[test]
    fn input_produced_later_is_rejected() {
        // Correct set of stages, wrong order: the burden of ordering is on
        // whoever authors the list.
        let stages = [
            stage("sky_view", LutId::SkyView, vec![LutId::Transmittance]),
            stage("transmittance", LutId::Transmittance, vec![]),
        ];
        assert!(matches!(validate_stages(&stages), Err(PipelineError::InvalidPipeline { stage: 0, .. })));
    }

    #[test]
    fn duplicate_output_is_rejected() {
        let stages = [
            stage("transmittance_a", LutId::Transmittance, vec![]),
            stage("transmittance_b", LutId::Transmittance, vec![]),
        ];
        assert!(matches!(
            validate_stages(&stages),
            Err(PipelineError::DuplicateOutput { stage: 1, earlier: 0, .. })
        ));
    }

    #[test]
    fn stage_reading_its_own_output_is_rejected() {
        let stages = [stage("in_place", LutId::Transmittance, vec![LutId::Transmittance])];
        assert!(matches!(validate_stages(&stages), Err(PipelineError::InvalidPipeline { stage: 0, .. })));
    }
}
