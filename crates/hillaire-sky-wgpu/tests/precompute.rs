//! GPU integration tests for the precompute pipeline
//!
//! These need a real adapter; on machines without one every test skips
//! instead of failing, mirroring how the pipeline degrades in CI.

use hillaire_sky_wgpu::{CancelFlag, LutId, PipelineError, PipelineState, PrecomputeConfig, RunError, SkyLuts, StageDesc, presets};
use std::path::PathBuf;

fn create_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok()?;

    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: wgpu::Features::FLOAT32_FILTERABLE,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))
    .ok()
}

macro_rules! device_or_skip {
    () => {
        match create_device() {
            Some(pair) => pair,
            None => {
                eprintln!("no suitable GPU adapter, skipping");
                return;
            }
        }
    };
}

fn temp_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hillaire-sky-it-{}-{test}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

const ALL_TABLES: [LutId; 4] = [LutId::Transmittance, LutId::MultiScattering, LutId::SkyView, LutId::AerialPerspective];

fn read_all(sky: &SkyLuts, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<Vec<f32>> {
    ALL_TABLES
        .iter()
        .map(|&id| sky.cache().read_back(device, queue, sky.table(id).unwrap()).unwrap())
        .collect()
}

#[test]
fn precompute_fills_every_table_and_is_idempotent() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("idempotent");

    let mut config = PrecomputeConfig::hillaire(&dir);
    config.use_cached = false;
    let mut sky = SkyLuts::new(&device, config).unwrap();

    let report = sky.precompute(&device, &queue).unwrap();
    assert_eq!(sky.state(), PipelineState::Ready);
    assert_eq!(report.imported, vec![]);
    assert_eq!(report.exported.len(), ALL_TABLES.len());
    assert!(report.export_errors.is_empty());

    let first = read_all(&sky, &device, &queue);
    // The transmittance of a zenith ray near the top of the atmosphere is
    // close to 1; a kernel that never ran would leave zeros.
    assert!(first[0].iter().any(|&texel| texel > 0.5));

    let second_report = sky.precompute(&device, &queue).unwrap();
    assert!(second_report.export_errors.is_empty());
    let second = read_all(&sky, &device, &queue);

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(bytemuck::cast_slice::<f32, u8>(a), bytemuck::cast_slice::<f32, u8>(b), "re-run must be bit-identical");
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn exported_tables_round_trip_through_the_cache() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("roundtrip");

    let mut sky = SkyLuts::new(&device, PrecomputeConfig::hillaire(&dir)).unwrap();
    let report = sky.precompute(&device, &queue).unwrap();
    assert_eq!(report.exported.len(), ALL_TABLES.len());
    for &id in &ALL_TABLES {
        assert!(sky.cache().path_for(id).is_file());
    }
    let computed = read_all(&sky, &device, &queue);

    // A second session finds the artifacts and imports instead of running
    // the kernels.
    let mut restored = SkyLuts::new(&device, PrecomputeConfig::hillaire(&dir)).unwrap();
    let report = restored.precompute(&device, &queue).unwrap();
    assert_eq!(report.imported.len(), ALL_TABLES.len());
    assert_eq!(report.exported, vec![]);

    let imported = read_all(&restored, &device, &queue);
    for (a, b) in computed.iter().zip(&imported) {
        assert_eq!(bytemuck::cast_slice::<f32, u8>(a), bytemuck::cast_slice::<f32, u8>(b), "EXR round trip must be lossless");
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cached_artifact_is_never_overwritten() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("no-overwrite");

    let mut config = PrecomputeConfig::hillaire(&dir);
    config.use_cached = false;
    let mut sky = SkyLuts::new(&device, config).unwrap();

    sky.precompute(&device, &queue).unwrap();
    let path = sky.cache().path_for(LutId::Transmittance);
    let before = std::fs::read(&path).unwrap();

    // Recomputes everything, but the export step no-ops on cached tables.
    let report = sky.precompute(&device, &queue).unwrap();
    assert_eq!(report.exported, vec![]);
    assert_eq!(std::fs::read(&path).unwrap(), before);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn kernel_binding_mismatch_fails_construction_with_stage_index() {
    let (device, _queue) = device_or_skip!();
    let dir = temp_dir("binding");

    // Same bindings as the sky-view stage but with the wrong storage format,
    // so the kernel interface no longer matches the table.
    const BROKEN_KERNEL: &str = r#"
@group(0) @binding(0) var result: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var transmittance_lut: texture_2d<f32>;
@group(0) @binding(2) var multi_scattering_lut: texture_2d<f32>;
@group(0) @binding(3) var lut_sampler: sampler;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let color = textureSampleLevel(transmittance_lut, lut_sampler, vec2<f32>(0.5), 0.0)
        + textureSampleLevel(multi_scattering_lut, lut_sampler, vec2<f32>(0.5), 0.0);
    textureStore(result, gid.xy, color);
}
"#;

    let mut config = PrecomputeConfig::hillaire(&dir);
    config.stages[2] = StageDesc::new(
        "sky_view_lut",
        BROKEN_KERNEL,
        LutId::SkyView,
        vec![LutId::Transmittance, LutId::MultiScattering],
    );

    match SkyLuts::new(&device, config) {
        Err(PipelineError::KernelBinding { stage: 2, .. }) => {}
        other => panic!("expected KernelBinding at stage 2, got {:?}", other.err()),
    }
}

#[test]
fn dangling_input_fails_construction() {
    let (device, _queue) = device_or_skip!();
    let dir = temp_dir("dangling");

    let mut config = PrecomputeConfig::hillaire(&dir);
    // Drop the transmittance stage; the next stage now reads a table no
    // earlier stage writes.
    config.stages.remove(0);

    match SkyLuts::new(&device, config) {
        Err(PipelineError::InvalidPipeline { stage: 0, input: LutId::Transmittance, .. }) => {}
        other => panic!("expected InvalidPipeline at stage 0, got {:?}", other.err()),
    }
}

#[test]
fn cancellation_stops_before_the_first_stage() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("cancel");

    let mut sky = SkyLuts::new(&device, PrecomputeConfig::hillaire(&dir)).unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    match sky.precompute_with(&device, &queue, Some(&cancel)) {
        Err(RunError::Cancelled { stage: 0 }) => {}
        other => panic!("expected Cancelled at stage 0, got {other:?}"),
    }
    assert_eq!(sky.state(), PipelineState::Failed);

    // A fresh run starts over from the first stage.
    sky.precompute(&device, &queue).unwrap();
    assert_eq!(sky.state(), PipelineState::Ready);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn staleness_is_host_controlled() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("staleness");

    let mut sky = SkyLuts::new(&device, PrecomputeConfig::hillaire(&dir)).unwrap();
    assert!(sky.requires_precompute(), "a fresh session starts stale");

    sky.precompute(&device, &queue).unwrap();
    sky.mark_clean();
    assert!(!sky.requires_precompute());

    sky.invalidate();
    assert!(sky.requires_precompute());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn release_all_tears_down_the_store() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("release");

    let mut config = PrecomputeConfig::hillaire(&dir);
    config.use_cached = false;
    let mut sky = SkyLuts::new(&device, config).unwrap();
    sky.precompute(&device, &queue).unwrap();

    sky.release_all();
    for &id in &ALL_TABLES {
        assert!(matches!(sky.table(id), Err(PipelineError::TableNotFound { .. })));
    }
    // Double release stays a no-op.
    sky.release_all();

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn custom_pipeline_with_preset_tables_builds() {
    let (device, queue) = device_or_skip!();
    let dir = temp_dir("custom");

    // Transmittance only: a pipeline is a data choice, not a type.
    let mut config = PrecomputeConfig::hillaire(&dir);
    config.tables.truncate(1);
    config.stages = presets::stages().into_iter().take(1).collect();

    let mut sky = SkyLuts::new(&device, config).unwrap();
    let report = sky.precompute(&device, &queue).unwrap();
    assert_eq!(report.exported, vec![LutId::Transmittance]);
    assert!(matches!(sky.table(LutId::SkyView), Err(PipelineError::TableNotFound { .. })));

    let _ = std::fs::remove_dir_all(&dir);
}
