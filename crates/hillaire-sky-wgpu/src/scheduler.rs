//! Dependency-ordered execution of the precompute stages
//!
//! [`PipelineScheduler::build`] validates the stage list, compiles every
//! kernel and binds it to the tables it reads and writes. Binding problems
//! surface here, per stage, so a misauthored pipeline never reaches
//! dispatch. [`PipelineScheduler::run`] then walks the stages in ordinal
//! order on a single queue; in-order submission is the only synchronization
//! between a stage's writes and the next stage's reads. A multi-queue or
//! multi-threaded port must add explicit barriers between dependent stages.

use crate::error::{PipelineError, RunError};
use crate::lut::{LutId, LutTable, TableStore};
use crate::stage::{self, StageDesc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag.
///
/// Checked between stages only; a dispatch already recorded is never
/// interrupted, since kernel execution is not preemptible at this layer.
/// Clones share the same flag and may be moved to another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The current run stops before its next stage.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`CancelFlag::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scheduler lifecycle.
///
/// `Built → Running → Ready | Failed`. From `Failed` (or `Ready`) a new run
/// restarts from the first stage; a run never resumes mid-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Stages are bound, nothing has run yet
    Built,
    /// A run is in flight
    Running,
    /// The last run completed; every table is valid
    Ready,
    /// The last run aborted; tables from the failed stage onwards are
    /// indeterminate
    Failed,
}

/// Per-run options.
#[derive(Debug, Default)]
pub struct RunOptions<'a> {
    /// Outputs already satisfied from the persistence cache; their stages
    /// are not dispatched.
    pub skip: HashSet<LutId>,
    /// Optional cooperative cancellation, checked between stages.
    pub cancel: Option<&'a CancelFlag>,
}

/// A stage bound to its compute pipeline and table bindings.
#[derive(Debug)]
struct BoundStage {
    name: String,
    output: LutId,
    grid: (u32, u32, u32),
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

/// Runs the ordered stage list over the table store.
///
/// Exactly one run may be in flight per table store: tables are mutated in
/// place with no versioning, so `run` takes `&mut self` and completes (Ready
/// or Failed) before another run can start.
#[derive(Debug)]
pub struct PipelineScheduler {
    stages: Vec<BoundStage>,
    state: PipelineState,
}

impl PipelineScheduler {
    /// Validates `stages` and binds each one to the tables in `store`.
    ///
    /// Fails with [`PipelineError::InvalidPipeline`] or
    /// [`PipelineError::DuplicateOutput`] on a structurally broken list,
    /// [`PipelineError::TableNotFound`] when a stage references a table the
    /// store never allocated, and [`PipelineError::KernelBinding`] when a
    /// kernel's interface does not match its stage's declared bindings. No
    /// partial scheduler is ever returned.
    pub fn build(device: &wgpu::Device, store: &TableStore, stages: &[StageDesc]) -> Result<Self, PipelineError> {
        stage::validate_stages(stages)?;

        // One linear clamp-to-edge sampler is shared by every stage that
        // reads a table.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("LUT Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });

        let mut bound = Vec::with_capacity(stages.len());
        for (index, desc) in stages.iter().enumerate() {
            bound.push(Self::bind_stage(device, store, &sampler, index, desc)?);
        }

        Ok(Self {
            stages: bound,
            state: PipelineState::Built,
        })
    }

    /// Compiles one stage's kernel and creates its bind group.
    ///
    /// The whole creation sequence runs inside a validation error scope so a
    /// kernel/binding mismatch is reported as [`PipelineError::KernelBinding`]
    /// with the stage's 0-based index instead of failing later at dispatch.
    fn bind_stage(
        device: &wgpu::Device,
        store: &TableStore,
        sampler: &wgpu::Sampler,
        index: usize,
        desc: &StageDesc,
    ) -> Result<BoundStage, PipelineError> {
        let output = store.get(desc.output)?;
        let output_desc = *output.desc();
        let grid = stage::dispatch_grid(output_desc.width, output_desc.height, output_desc.depth);

        let inputs = desc
            .inputs
            .iter()
            .map(|&id| store.get(id))
            .collect::<Result<Vec<&LutTable>, PipelineError>>()?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
        });

        // Layout follows the fixed convention: output at 0, inputs at 1..=N,
        // sampler last when inputs exist.
        let mut layout_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: output_desc.format.wgpu_format(),
                view_dimension: output_desc.view_dimension(),
            },
            count: None,
        }];
        for (slot, input) in inputs.iter().enumerate() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: input.desc().view_dimension(),
                    multisampled: false,
                },
                count: None,
            });
        }
        if !inputs.is_empty() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: inputs.len() as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&desc.name),
            entries: &layout_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&desc.name),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&desc.name),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let mut bind_group_entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(output.view()),
        }];
        for (slot, input) in inputs.iter().enumerate() {
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 + 1,
                resource: wgpu::BindingResource::TextureView(input.view()),
            });
        }
        if !inputs.is_empty() {
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: inputs.len() as u32 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&desc.name),
            layout: &bind_group_layout,
            entries: &bind_group_entries,
        });

        let _ = device.poll(wgpu::PollType::Poll);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(PipelineError::KernelBinding {
                stage: index,
                name: desc.name.clone(),
                reason: error.to_string(),
            });
        }

        Ok(BoundStage {
            name: desc.name.clone(),
            output: desc.output,
            grid,
            pipeline,
            bind_group,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of bound stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Runs every stage in ordinal order.
    ///
    /// Stops at the first failing stage and surfaces its 0-based index.
    /// Tables written by earlier stages remain valid; the failed stage's
    /// table and every later one are indeterminate until the next successful
    /// run. Re-running with unchanged inputs reproduces bit-identical table
    /// contents: each kernel is a pure function of its bound inputs and its
    /// fixed dispatch geometry.
    pub fn run(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, options: &RunOptions<'_>) -> Result<(), RunError> {
        self.state = PipelineState::Running;

        for (index, stage) in self.stages.iter().enumerate() {
            if let Some(cancel) = options.cancel {
                if cancel.is_cancelled() {
                    self.state = PipelineState::Failed;
                    return Err(RunError::Cancelled { stage: index });
                }
            }

            if options.skip.contains(&stage.output) {
                tracing::debug!(stage = index, name = %stage.name, "output already satisfied, skipping dispatch");
                continue;
            }

            if let Err(reason) = Self::dispatch(device, queue, stage) {
                tracing::error!(stage = index, name = %stage.name, %reason, "stage dispatch failed, aborting run");
                self.state = PipelineState::Failed;
                return Err(RunError::Stage {
                    stage: index,
                    name: stage.name.clone(),
                    reason,
                });
            }

            tracing::debug!(stage = index, name = %stage.name, "stage dispatched");
        }

        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Records and submits one stage.
    ///
    /// Each stage is submitted on its own so a failure never leaves later
    /// dispatches queued behind it; the single ordered queue still makes
    /// stage N's writes visible to stage N+1's reads.
    fn dispatch(device: &wgpu::Device, queue: &wgpu::Queue, stage: &BoundStage) -> Result<(), String> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(&stage.name) });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&stage.name),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&stage.pipeline);
            compute_pass.set_bind_group(0, &stage.bind_group, &[]);

            let (x, y, z) = stage.grid;
            compute_pass.dispatch_workgroups(x, y, z);
        }
        queue.submit(std::iter::once(encoder.finish()));

        let _ = device.poll(wgpu::PollType::Poll);
        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(()),
        }
    }
}
