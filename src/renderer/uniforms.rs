// Per-frame uniform block
//
// Matches the std140 block at binding 0 of quad.vert: three column-major
// 4x4 matrices, 192 bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Uniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Uniforms {
    pub const SIZE: u64 = std::mem::size_of::<Uniforms>() as u64;

    /// Quad offset along x and spun about z by `elapsed` seconds. The
    /// projection keeps it square on non-square surfaces.
    pub fn at(elapsed: f32, aspect: f32) -> Self {
        let model = Mat4::from_translation(Vec3::new(0.25, 0.0, 0.0))
            * Mat4::from_rotation_z(elapsed * 0.5);
        let projection = if aspect >= 1.0 {
            Mat4::from_scale(Vec3::new(1.0 / aspect, 1.0, 1.0))
        } else {
            Mat4::from_scale(Vec3::new(1.0, aspect, 1.0))
        };

        Self {
            model,
            view: Mat4::IDENTITY,
            projection,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_block_is_three_matrices() {
        assert_eq!(Uniforms::SIZE, 192);
        assert_eq!(Uniforms::at(0.0, 1.0).as_bytes().len(), 192);
    }

    #[test]
    fn test_square_surface_only_translates_at_start() {
        let u = Uniforms::at(0.0, 1.0);
        let p = u.projection * u.view * u.model * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x - 0.25).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
    }

    #[test]
    fn test_wide_surface_compresses_x() {
        let u = Uniforms::at(0.0, 2.0);
        let p = u.projection * Vec4::new(1.0, 1.0, 0.0, 1.0);
        assert!((p.x - 0.5).abs() < 1e-6);
        assert!((p.y - 1.0).abs() < 1e-6);
    }
}
