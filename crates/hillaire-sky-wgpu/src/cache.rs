//! Persisted table artifacts: one lossless EXR per table
//!
//! The cache keys on file existence plus shape: an artifact whose decoded
//! dimensions do not match the table's descriptor counts as uncached, so a
//! config-time shape change invalidates the entry and the next export
//! overwrites it. There is no kernel-content hashing; deleting the file is
//! the other invalidation path.
//!
//! The export read-back is the single blocking point of the pipeline. It is
//! bounded by a configurable timeout instead of waiting on the device
//! indefinitely, and it is plain host I/O, not part of the GPU command
//! stream.

use crate::error::ExportError;
use crate::lut::{LutId, LutTable, TableDesc, TableFormat};
use half::f16;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Artifact file extension. EXR keeps full 32-bit float channels, so the
/// round trip through disk is lossless for `Rgba32Float` tables.
const ARTIFACT_EXT: &str = "exr";

/// How long a read-back may block before it is abandoned.
pub const DEFAULT_READBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of an export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The artifact was written.
    Written,
    /// A valid artifact already existed; nothing was touched. An already
    /// shared or manually curated artifact is never clobbered.
    AlreadyCached,
}

/// Decides which persisted artifacts exist and moves table contents between
/// GPU memory and disk.
#[derive(Debug, Clone)]
pub struct LutCache {
    dir: PathBuf,
    readback_timeout: Duration,
}

impl LutCache {
    /// A cache rooted at `dir`. The directory is created lazily on the first
    /// export.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            readback_timeout: DEFAULT_READBACK_TIMEOUT,
        }
    }

    /// Overrides the read-back timeout.
    pub fn with_readback_timeout(mut self, timeout: Duration) -> Self {
        self.readback_timeout = timeout;
        self
    }

    /// The export directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<Name>.exr` — flat, one file per table, no manifest.
    pub fn path_for(&self, id: LutId) -> PathBuf {
        self.dir.join(format!("{}.{ARTIFACT_EXT}", id.name()))
    }

    /// True when an artifact exists for `desc` and its dimensions match the
    /// table shape. 3D tables are persisted with their depth slices stacked
    /// vertically, so the artifact height is `height * depth`.
    pub fn is_cached(&self, desc: &TableDesc) -> bool {
        match image::image_dimensions(self.path_for(desc.id)) {
            Ok((width, height)) => width == desc.width && height == desc.height * desc.depth,
            Err(_) => false,
        }
    }

    /// Reads `table` back from the GPU and writes its artifact.
    ///
    /// Returns [`ExportOutcome::AlreadyCached`] without touching disk when a
    /// valid artifact is already present. A failure here never invalidates
    /// the in-memory table; only the on-disk cache is stale.
    pub fn export(&self, device: &wgpu::Device, queue: &wgpu::Queue, table: &LutTable) -> Result<ExportOutcome, ExportError> {
        let desc = *table.desc();
        if self.is_cached(&desc) {
            tracing::debug!(table = %desc.id, "artifact already cached, skipping export");
            return Ok(ExportOutcome::AlreadyCached);
        }

        let texels = self.read_back(device, queue, table)?;
        let image = image::Rgba32FImage::from_raw(desc.width, desc.height * desc.depth, texels).ok_or_else(|| ExportError::Readback {
            id: desc.id,
            reason: "read-back size does not match the table shape".to_owned(),
        })?;

        std::fs::create_dir_all(&self.dir)?;
        image.save(self.path_for(desc.id))?;
        tracing::info!(table = %desc.id, path = %self.path_for(desc.id).display(), "table exported");
        Ok(ExportOutcome::Written)
    }

    /// Decodes the artifact for `table` and uploads it into the backing
    /// texture, replacing whatever the table held.
    pub fn import(&self, queue: &wgpu::Queue, table: &LutTable) -> Result<(), ExportError> {
        let desc = *table.desc();
        let path = self.path_for(desc.id);
        let decoded = image::open(&path)?.into_rgba32f();

        let (width, height) = decoded.dimensions();
        if width != desc.width || height != desc.height * desc.depth {
            return Err(ExportError::ShapeMismatch {
                path,
                found_width: width,
                found_height: height,
                expected_width: desc.width,
                expected_height: desc.height * desc.depth,
            });
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: table.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels_to_bytes(desc.format, decoded.as_raw()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_texel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
        );

        tracing::info!(table = %desc.id, path = %path.display(), "table imported from cache");
        Ok(())
    }

    /// Copies the table into a mapped staging buffer and returns its texels
    /// as RGBA f32, depth slices in order.
    ///
    /// Blocks the calling thread while polling the device; gives up with
    /// [`ExportError::Timeout`] once the configured deadline passes.
    pub fn read_back(&self, device: &wgpu::Device, queue: &wgpu::Queue, table: &LutTable) -> Result<Vec<f32>, ExportError> {
        let desc = *table.desc();
        let bytes_per_texel = desc.format.bytes_per_texel();
        let unpadded_bytes_per_row = desc.width * bytes_per_texel;
        // Texture-to-buffer copies require 256-byte row alignment.
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let row_count = desc.height * desc.depth;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("LUT Readback Buffer"),
            size: padded_bytes_per_row as u64 * row_count as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("LUT Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: table.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        // Map the buffer and poll until the callback fires or the deadline
        // passes. The channel doubles as the completion signal.
        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let deadline = Instant::now() + self.readback_timeout;
        loop {
            let _ = device.poll(wgpu::PollType::Poll);
            match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(Ok(())) => break,
                Ok(Err(error)) => {
                    return Err(ExportError::Readback {
                        id: desc.id,
                        reason: error.to_string(),
                    });
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(ExportError::Timeout {
                            id: desc.id,
                            timeout: self.readback_timeout,
                        });
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(ExportError::Readback {
                        id: desc.id,
                        reason: "map callback dropped without a result".to_owned(),
                    });
                }
            }
        }

        let data = buffer_slice.get_mapped_range();
        let mut texels = Vec::with_capacity(desc.width as usize * row_count as usize * 4);
        for row in 0..row_count {
            let offset = row as usize * padded_bytes_per_row as usize;
            let row_bytes = &data[offset..offset + unpadded_bytes_per_row as usize];
            match desc.format {
                TableFormat::Rgba32Float => texels.extend_from_slice(bytemuck::cast_slice::<u8, f32>(row_bytes)),
                TableFormat::Rgba16Float => texels.extend(bytemuck::cast_slice::<u8, f16>(row_bytes).iter().map(|half| half.to_f32())),
            }
        }

        Ok(texels)
    }
}

/// Encodes RGBA f32 texels into the byte layout of `format`.
fn texels_to_bytes(format: TableFormat, texels: &[f32]) -> Vec<u8> {
    match format {
        TableFormat::Rgba32Float => texels.iter().flat_map(|value| value.to_le_bytes()).collect(),
        TableFormat::Rgba16Float => texels.iter().flat_map(|&value| f16::from_f32(value).to_le_bytes()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(test: &str) -> LutCache {
        let dir = std::env::temp_dir().join(format!("hillaire-sky-{}-{test}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        LutCache::new(dir)
    }

    #[test]
    fn artifact_paths_are_flat_and_named_after_the_table() {
        let cache = LutCache::new("luts");
        assert_eq!(cache.path_for(LutId::Transmittance), Path::new("luts").join("Transmittance.exr"));
        assert_eq!(cache.path_for(LutId::AerialPerspective), Path::new("luts").join("AerialPerspective.exr"));
    }

    #[test]
    fn missing_artifact_is_not_cached() {
        let cache = temp_cache("missing");
        let desc = TableDesc::d2(LutId::Transmittance, 256, 64, TableFormat::Rgba32Float);
        assert!(!cache.is_cached(&desc));
    }

    #[test]
    fn shape_mismatch_counts_as_uncached() {
        let cache = temp_cache("shape");
        std::fs::create_dir_all(cache.dir()).unwrap();

        let image = image::Rgba32FImage::from_pixel(128, 64, image::Rgba([0.5, 0.5, 0.5, 1.0]));
        image.save(cache.path_for(LutId::Transmittance)).unwrap();

        let expected = TableDesc::d2(LutId::Transmittance, 256, 64, TableFormat::Rgba32Float);
        assert!(!cache.is_cached(&expected));

        let matching = TableDesc::d2(LutId::Transmittance, 128, 64, TableFormat::Rgba32Float);
        assert!(cache.is_cached(&matching));

        std::fs::remove_dir_all(cache.dir()).unwrap();
    }

    #[test]
    fn depth_slices_stack_vertically_in_the_artifact() {
        let cache = temp_cache("depth");
        std::fs::create_dir_all(cache.dir()).unwrap();

        let image = image::Rgba32FImage::from_pixel(32, 32 * 32, image::Rgba([0.0, 0.0, 0.0, 1.0]));
        image.save(cache.path_for(LutId::AerialPerspective)).unwrap();

        let desc = TableDesc::d3(LutId::AerialPerspective, 32, 32, 32, TableFormat::Rgba32Float);
        assert!(cache.is_cached(&desc));

        std::fs::remove_dir_all(cache.dir()).unwrap();
    }

    #[test]
    fn f16_texel_encoding_round_trips() {
        let texels = [0.0_f32, 0.25, 0.5, 1.0];
        let bytes = texels_to_bytes(TableFormat::Rgba16Float, &texels);
        assert_eq!(bytes.len(), 8);

        let decoded: Vec<f32> = bytes.chunks(2).map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32()).collect();
        assert_eq!(decoded, texels);
    }

    #[test]
    fn f32_texel_encoding_is_little_endian() {
        let bytes = texels_to_bytes(TableFormat::Rgba32Float, &[1.0_f32]);
        assert_eq!(bytes, 1.0_f32.to_le_bytes());
    }
}
