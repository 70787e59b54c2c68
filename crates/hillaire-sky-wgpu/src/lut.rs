//! Table store: the named GPU-resident lookup tables
//!
//! Every LUT of the atmosphere pipeline is a fixed-shape 2D or 3D float
//! texture, allocated once when the pipeline is built and released at
//! teardown. The [`TableStore`] is their sole owner; the scheduler and the
//! persistence cache only borrow them.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::fmt;

/// Identifies one lookup table of the atmosphere pipeline.
///
/// Adding a LUT is a data change: a new variant here plus a stage entry in
/// the pipeline description, not a new renderer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LutId {
    /// Sun-to-point transmittance through the atmosphere
    Transmittance,
    /// Isotropic multiple-scattering contribution
    MultiScattering,
    /// Far-field sky radiance for the current view point
    SkyView,
    /// Froxel volume of in-scattering between camera and scene
    AerialPerspective,
}

impl LutId {
    /// Stable name, used for resource labels and the artifact file stem.
    pub fn name(&self) -> &'static str {
        match self {
            LutId::Transmittance => "Transmittance",
            LutId::MultiScattering => "MultiScattering",
            LutId::SkyView => "SkyView",
            LutId::AerialPerspective => "AerialPerspective",
        }
    }
}

impl fmt::Display for LutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Texel formats a table may use.
///
/// Restricted to 4-channel float formats that are both storage-writable and
/// filterable: every table is written by a compute kernel through a storage
/// binding and sampled by the renderer afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// 4×f16. The format an earlier iteration of this design used.
    Rgba16Float,
    /// 4×f32. The default; keeps the persisted artifact lossless.
    Rgba32Float,
}

impl TableFormat {
    /// The corresponding wgpu texture format.
    pub fn wgpu_format(&self) -> wgpu::TextureFormat {
        match self {
            TableFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TableFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    /// Bytes per texel (4 channels).
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            TableFormat::Rgba16Float => 8,
            TableFormat::Rgba32Float => 16,
        }
    }
}

/// Fixed shape and format of one table.
///
/// Shapes are a config-time decision; a table is never reallocated
/// mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDesc {
    /// Which table this describes
    pub id: LutId,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Depth in texels; 1 for 2D tables
    pub depth: u32,
    /// Texel format
    pub format: TableFormat,
}

impl TableDesc {
    /// Descriptor for a 2D table.
    pub fn d2(id: LutId, width: u32, height: u32, format: TableFormat) -> Self {
        Self { id, width, height, depth: 1, format }
    }

    /// Descriptor for a 3D table.
    pub fn d3(id: LutId, width: u32, height: u32, depth: u32, format: TableFormat) -> Self {
        Self { id, width, height, depth, format }
    }

    /// GPU memory the backing storage reserves.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64 * self.format.bytes_per_texel() as u64
    }

    /// View dimension the kernels bind this table with.
    pub fn view_dimension(&self) -> wgpu::TextureViewDimension {
        if self.depth == 1 { wgpu::TextureViewDimension::D2 } else { wgpu::TextureViewDimension::D3 }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(PipelineError::Allocation {
                id: self.id,
                width: self.width,
                height: self.height,
                depth: self.depth,
                reason: "table dimensions must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// A GPU-resident table together with its descriptor.
#[derive(Debug)]
pub struct LutTable {
    desc: TableDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl LutTable {
    /// Shape and format of this table.
    pub fn desc(&self) -> &TableDesc {
        &self.desc
    }

    /// The backing texture.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// A full view of the backing texture, used for every binding.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Owns every allocated table, keyed by [`LutId`].
#[derive(Debug, Default)]
pub struct TableStore {
    tables: HashMap<LutId, LutTable>,
}

impl TableStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates backing storage for `desc`.
    ///
    /// Fails with [`PipelineError::Allocation`] when the descriptor is
    /// invalid (zero dimension) or the device rejects it (out of memory,
    /// unsupported size), and with [`PipelineError::AlreadyAllocated`] when
    /// the table already exists; releasing first is required to reshape.
    pub fn allocate(&mut self, device: &wgpu::Device, desc: TableDesc) -> Result<(), PipelineError> {
        desc.validate()?;
        if self.tables.contains_key(&desc.id) {
            return Err(PipelineError::AlreadyAllocated { id: desc.id });
        }

        // An error scope turns device-side rejection into a Result instead
        // of an uncaught error callback.
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.id.name()),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: if desc.depth == 1 { wgpu::TextureDimension::D2 } else { wgpu::TextureDimension::D3 },
            format: desc.format.wgpu_format(),
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let _ = device.poll(wgpu::PollType::Poll);
        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(oom) {
            return Err(PipelineError::Allocation {
                id: desc.id,
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
                reason: error.to_string(),
            });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.tables.insert(desc.id, LutTable { desc, texture, view });
        Ok(())
    }

    /// Looks up an allocated table.
    pub fn get(&self, id: LutId) -> Result<&LutTable, PipelineError> {
        self.tables.get(&id).ok_or(PipelineError::TableNotFound { id })
    }

    /// True when `id` is currently allocated.
    pub fn contains(&self, id: LutId) -> bool {
        self.tables.contains_key(&id)
    }

    /// Frees a table's backing storage. No-op when the table was never
    /// allocated or is already released; double-release is safe.
    pub fn release(&mut self, id: LutId) {
        self.tables.remove(&id);
    }

    /// Frees every table. Subsequent [`TableStore::get`] calls fail with
    /// [`PipelineError::TableNotFound`].
    pub fn release_all(&mut self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_rejected() {
        let desc = TableDesc::d2(LutId::Transmittance, 0, 64, TableFormat::Rgba32Float);
        assert!(desc.validate().is_err());

        let desc = TableDesc::d3(LutId::AerialPerspective, 32, 32, 0, TableFormat::Rgba32Float);
        assert!(matches!(desc.validate(), Err(PipelineError::Allocation { id: LutId::AerialPerspective, .. })));
    }

    #[test]
    fn byte_size_accounts_for_depth_and_format() {
        let d2 = TableDesc::d2(LutId::Transmittance, 256, 64, TableFormat::Rgba32Float);
        assert_eq!(d2.byte_size(), 256 * 64 * 16);

        let d3 = TableDesc::d3(LutId::AerialPerspective, 32, 32, 32, TableFormat::Rgba16Float);
        assert_eq!(d3.byte_size(), 32 * 32 * 32 * 8);
    }

    #[test]
    fn view_dimension_follows_depth() {
        let d2 = TableDesc::d2(LutId::SkyView, 192, 108, TableFormat::Rgba32Float);
        assert_eq!(d2.view_dimension(), wgpu::TextureViewDimension::D2);

        let d3 = TableDesc::d3(LutId::AerialPerspective, 32, 32, 32, TableFormat::Rgba32Float);
        assert_eq!(d3.view_dimension(), wgpu::TextureViewDimension::D3);
    }
}
