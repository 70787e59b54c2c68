//! The standard Hillaire pipeline: table shapes and built-in kernels
//!
//! Everything here is data. Adding a LUT means adding a descriptor and a
//! stage entry, placed after every stage it reads from.

use crate::lut::{LutId, TableDesc, TableFormat};
use crate::stage::StageDesc;

/// Transmittance LUT shape: sun zenith cosine × altitude.
pub const TRANSMITTANCE_SIZE: (u32, u32) = (256, 64);
/// Multi-scattering LUT shape: sun zenith cosine × altitude.
pub const MULTI_SCATTERING_SIZE: (u32, u32) = (32, 32);
/// Sky-view LUT shape: azimuth × elevation.
pub const SKY_VIEW_SIZE: (u32, u32) = (192, 108);
/// Aerial-perspective froxel volume shape.
pub const AERIAL_PERSPECTIVE_SIZE: (u32, u32, u32) = (32, 32, 32);

/// Table descriptors for the standard pipeline.
///
/// All tables use 4×f32 so the persisted artifacts are lossless; an earlier
/// iteration of this design used 4×f16 and lost precision on export.
pub fn tables() -> Vec<TableDesc> {
    vec![
        TableDesc::d2(LutId::Transmittance, TRANSMITTANCE_SIZE.0, TRANSMITTANCE_SIZE.1, TableFormat::Rgba32Float),
        TableDesc::d2(LutId::MultiScattering, MULTI_SCATTERING_SIZE.0, MULTI_SCATTERING_SIZE.1, TableFormat::Rgba32Float),
        TableDesc::d2(LutId::SkyView, SKY_VIEW_SIZE.0, SKY_VIEW_SIZE.1, TableFormat::Rgba32Float),
        TableDesc::d3(
            LutId::AerialPerspective,
            AERIAL_PERSPECTIVE_SIZE.0,
            AERIAL_PERSPECTIVE_SIZE.1,
            AERIAL_PERSPECTIVE_SIZE.2,
            TableFormat::Rgba32Float,
        ),
    ]
}

/// The four stages in dependency order: transmittance feeds
/// multi-scattering, both feed sky-view and aerial perspective.
pub fn stages() -> Vec<StageDesc> {
    vec![
        StageDesc::new(
            "transmittance_lut",
            include_str!("shaders/transmittance.wgsl"),
            LutId::Transmittance,
            vec![],
        ),
        StageDesc::new(
            "multi_scattering_lut",
            include_str!("shaders/multi_scattering.wgsl"),
            LutId::MultiScattering,
            vec![LutId::Transmittance],
        ),
        StageDesc::new(
            "sky_view_lut",
            include_str!("shaders/sky_view.wgsl"),
            LutId::SkyView,
            vec![LutId::Transmittance, LutId::MultiScattering],
        ),
        StageDesc::new(
            "aerial_perspective_lut",
            include_str!("shaders/aerial_perspective.wgsl"),
            LutId::AerialPerspective,
            vec![LutId::Transmittance, LutId::MultiScattering],
        ),
    ]
}
