//! Scene data handed to the engine before the first swapchain exists.
//!
//! Parsing meshes and packing textures happens elsewhere; the engine only
//! consumes flat vertex/index lists, one packed RGBA8 texture and precompiled
//! SPIR-V for the two shader stages.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::error::EngineError;

/// Tightly packed vertex: position, color, texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }
}

pub type Matrix4 = [[f32; 4]; 4];

pub const IDENTITY: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Per-frame transforms, each matrix stored row by row.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Matrix4,
    pub view: Matrix4,
    pub proj: Matrix4,
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self {
            model: IDENTITY,
            view: IDENTITY,
            proj: IDENTITY,
        }
    }
}

impl UniformBufferObject {
    pub const SIZE: usize = size_of::<Self>();
}

/// Raw RGBA8 pixels, row-major from the top-left corner.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TextureData {
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Precompiled SPIR-V for the vertex and fragment stages.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub texture: Option<TextureData>,
    pub shaders: ShaderSet,
}

impl SceneAssets {
    /// Checks everything the GPU upload relies on.
    pub fn validate(&self, texture_sampling: bool) -> Result<(), EngineError> {
        validate_geometry(&self.vertices, &self.indices)?;

        if self.shaders.vertex.is_empty() || self.shaders.fragment.is_empty() {
            return Err(EngineError::InvalidAssets(
                "both shader stages need bytecode".to_string(),
            ));
        }

        match (&self.texture, texture_sampling) {
            (None, true) => Err(EngineError::InvalidAssets(
                "texture sampling is enabled but no texture was supplied".to_string(),
            )),
            (Some(texture), true) => {
                if texture.width == 0 || texture.height == 0 {
                    return Err(EngineError::InvalidAssets(format!(
                        "texture has zero extent {}x{}",
                        texture.width, texture.height
                    )));
                }
                if texture.pixels.len() != texture.byte_size() {
                    return Err(EngineError::InvalidAssets(format!(
                        "texture {}x{} needs {} bytes, got {}",
                        texture.width,
                        texture.height,
                        texture.byte_size(),
                        texture.pixels.len()
                    )));
                }
                Ok(())
            }
            (_, false) => Ok(()),
        }
    }
}

pub fn validate_geometry(vertices: &[Vertex], indices: &[u32]) -> Result<(), EngineError> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(EngineError::InvalidAssets(
            "vertex and index lists must not be empty".to_string(),
        ));
    }
    if indices.len() % 3 != 0 {
        return Err(EngineError::InvalidAssets(format!(
            "triangle list needs a multiple of 3 indices, got {}",
            indices.len()
        )));
    }
    if let Some(index) = indices.iter().find(|i| **i as usize >= vertices.len()) {
        return Err(EngineError::InvalidAssets(format!(
            "index {} out of range for {} vertices",
            index,
            vertices.len()
        )));
    }
    Ok(())
}

/// Serializes `data` into the front of a mapped staging region.
pub fn write_pod<T: Pod>(dst: &mut [u8], data: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    dst[..bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        let vertices = vec![
            Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ];
        (vertices, vec![0, 1, 2, 2, 3, 0])
    }

    fn read_back<T: Pod>(bytes: &[u8]) -> Vec<T> {
        bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect()
    }

    fn assets() -> SceneAssets {
        let (vertices, indices) = quad();
        SceneAssets {
            vertices,
            indices,
            texture: Some(TextureData {
                pixels: vec![255; 2 * 2 * 4],
                width: 2,
                height: 2,
            }),
            shaders: ShaderSet {
                vertex: vec![0; 4],
                fragment: vec![0; 4],
            },
        }
    }

    #[test]
    fn vertex_layout_matches_stage_inputs() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, color), 12);
        assert_eq!(offset_of!(Vertex, tex_coord), 24);
    }

    #[test]
    fn uniform_object_is_three_packed_matrices() {
        assert_eq!(UniformBufferObject::SIZE, 3 * 16 * 4);
        assert_eq!(offset_of!(UniformBufferObject, view), 64);
        assert_eq!(offset_of!(UniformBufferObject, proj), 128);
    }

    #[test]
    fn uniform_rows_are_written_in_order() {
        let mut ubo = UniformBufferObject::default();
        ubo.model[0][3] = 7.0;

        let mut mapped = vec![0u8; UniformBufferObject::SIZE];
        write_pod(&mut mapped, std::slice::from_ref(&ubo));

        let floats = read_back::<f32>(&mapped);
        assert_eq!(&floats[0..4], &[1.0, 0.0, 0.0, 7.0]);
        assert_eq!(floats[16], 1.0);
    }

    #[test]
    fn pod_bytes_keep_field_order() {
        let (vertices, indices) = quad();
        let mut shadow = vec![0u8; vertices.len() * size_of::<Vertex>()];
        write_pod(&mut shadow, &vertices);
        assert_eq!(read_back::<Vertex>(&shadow), vertices);

        let mut shadow = vec![0u8; indices.len() * 4];
        write_pod(&mut shadow, &indices);
        assert_eq!(read_back::<u32>(&shadow), indices);
    }

    #[test]
    fn accepts_complete_assets() {
        assert!(assets().validate(true).is_ok());
    }

    #[test]
    fn rejects_out_of_range_index() {
        let mut assets = assets();
        assets.indices[5] = 4;
        assert!(matches!(
            assets.validate(true),
            Err(EngineError::InvalidAssets(_))
        ));
    }

    #[test]
    fn rejects_partial_triangle() {
        let (vertices, mut indices) = quad();
        indices.pop();
        assert!(validate_geometry(&vertices, &indices).is_err());
    }

    #[test]
    fn texture_only_required_when_sampling() {
        let mut assets = assets();
        assets.texture = None;
        assert!(assets.validate(true).is_err());
        assert!(assets.validate(false).is_ok());
    }

    #[test]
    fn rejects_short_pixel_buffer() {
        let mut assets = assets();
        if let Some(texture) = assets.texture.as_mut() {
            texture.pixels.truncate(3);
        }
        assert!(assets.validate(true).is_err());
    }
}
