//! Camera description consumed by the forward/backward rasterization
//! pipeline. Loading a camera from a JSON/COLMAP file is an external
//! collaborator's job (spec §6); this type is the stable handoff point.

use glam::{Mat4, UVec2, Vec2};

/// A single calibrated view: world-to-view matrix, view-to-clip projection,
/// focal length in pixels, and the viewport the reference image was
/// captured at.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub view: Mat4,
    pub proj: Mat4,
    pub focal: Vec2,
    pub viewport: UVec2,
}

impl Camera {
    pub fn new(view: Mat4, proj: Mat4, focal: Vec2, viewport: UVec2) -> Self {
        Self {
            view,
            proj,
            focal,
            viewport,
        }
    }

    /// Principal point, assumed to be the image center.
    pub fn pixel_center(&self) -> Vec2 {
        Vec2::new(self.viewport.x as f32, self.viewport.y as f32) * 0.5
    }

    /// World-to-view rotation+translation packed row-major as the 12 floats
    /// the forward/backward kernels expect (3 rows of the 3x4 affine part
    /// of `view`).
    pub fn view_affine_rows(&self) -> [f32; 12] {
        let m = self.view.transpose();
        [
            m.x_axis.x, m.y_axis.x, m.z_axis.x, m.w_axis.x, m.x_axis.y, m.y_axis.y, m.z_axis.y,
            m.w_axis.y, m.x_axis.z, m.y_axis.z, m.z_axis.z, m.w_axis.z,
        ]
    }

    pub fn tile_bounds(&self) -> UVec2 {
        UVec2::new(
            self.viewport.x.div_ceil(crate::cubecl::helpers::TILE_WIDTH),
            self.viewport.y.div_ceil(crate::cubecl::helpers::TILE_WIDTH),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_bounds_rounds_up() {
        let cam = Camera::new(
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Vec2::new(100.0, 100.0),
            UVec2::new(64, 64),
        );
        assert_eq!(cam.tile_bounds(), UVec2::new(4, 4));
    }
}
