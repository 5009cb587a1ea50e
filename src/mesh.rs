// Quad geometry
//
// Interleaved vertices: position (2) + color (3) + texcoord (2) floats.
// Vulkan clip space has +y pointing down.

use bytemuck::{Pod, Zeroable};

use crate::backend::GpuBuffer;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Bytes per vertex
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

    /// Declare the attribute layout on a vertex buffer, in location order.
    pub fn describe(buffer: &mut GpuBuffer) {
        buffer.set_attribute(0, 0, 2);
        buffer.set_attribute(0, 1, 3);
        buffer.set_attribute(0, 2, 2);
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        position: [-0.5, 0.5],
        color: [1.0, 0.0, 0.0],
        tex_coord: [0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
        tex_coord: [1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5],
        color: [0.0, 0.0, 1.0],
        tex_coord: [1.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5],
        color: [1.0, 1.0, 1.0],
        tex_coord: [0.0, 1.0],
    },
];

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_stride_is_seven_floats() {
        assert_eq!(Vertex::STRIDE, 28);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&QUAD_VERTICES).len(), 112);
    }

    #[test]
    fn test_indices_stay_in_range() {
        assert!(QUAD_INDICES
            .iter()
            .all(|&i| (i as usize) < QUAD_VERTICES.len()));
        assert_eq!(bytemuck::cast_slice::<u32, u8>(&QUAD_INDICES).len(), 24);
    }
}
