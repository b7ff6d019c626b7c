//! Scalar-tuple math helpers shared by the forward projection and
//! rasterization kernels.
//!
//! Structs are deliberately avoided here (kept as plain scalars/tuples):
//! WGSL codegen through CubeCL has been observed to mis-vectorize
//! `vec3`-typed struct fields into invalid `vec4` casts, so every matrix and
//! vector below is passed around as individual `f32`s, exactly as the
//! forward kernels expect.

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

pub const TILE_WIDTH: u32 = 16;
pub const TILE_SIZE: u32 = TILE_WIDTH * TILE_WIDTH;
/// Added to the diagonal of the projected 2D covariance for numerical
/// stability (spec §4.4 step 4).
pub const COV_BLUR: f32 = 0.3;
/// Tan-angle clamp factor applied to the perspective projection Jacobian
/// (spec §4.4 step 4: "clamped to 1.3*fov on tan-angles"), symmetric about 0.
pub const FOV_CLAMP_FACTOR: f32 = 1.3;
/// `alpha < 1/255` contributors are skipped entirely (spec §4.6).
pub const MIN_ALPHA: f32 = 1.0 / 255.0;
/// Transmittance early-out threshold, shared verbatim by the forward and
/// backward rasterizers (spec §9: "C8 must adopt the identical threshold").
pub const EPS_STOP: f32 = 1e-4;

#[cube]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + f32::exp(-x))
}

#[cube]
pub fn quat_to_mat(
    quat_w: f32,
    quat_x: f32,
    quat_y: f32,
    quat_z: f32,
) -> (f32, f32, f32, f32, f32, f32, f32, f32, f32) {
    let w = quat_w;
    let x = quat_x;
    let y = quat_y;
    let z = quat_z;

    let x2 = x * x;
    let y2 = y * y;
    let z2 = z * z;
    let xy = x * y;
    let xz = x * z;
    let yz = y * z;
    let wx = w * x;
    let wy = w * y;
    let wz = w * z;

    let m00 = 1.0 - 2.0 * (y2 + z2);
    let m01 = 2.0 * (xy - wz);
    let m02 = 2.0 * (xz + wy);
    let m10 = 2.0 * (xy + wz);
    let m11 = 1.0 - 2.0 * (x2 + z2);
    let m12 = 2.0 * (yz - wx);
    let m20 = 2.0 * (xz - wy);
    let m21 = 2.0 * (yz + wx);
    let m22 = 1.0 - 2.0 * (x2 + y2);

    (m00, m01, m02, m10, m11, m12, m20, m21, m22)
}

#[cube]
#[allow(clippy::too_many_arguments)]
pub fn mat3_mul(
    a00: f32,
    a01: f32,
    a02: f32,
    a10: f32,
    a11: f32,
    a12: f32,
    a20: f32,
    a21: f32,
    a22: f32,
    b00: f32,
    b01: f32,
    b02: f32,
    b10: f32,
    b11: f32,
    b12: f32,
    b20: f32,
    b21: f32,
    b22: f32,
) -> (f32, f32, f32, f32, f32, f32, f32, f32, f32) {
    let c00 = a00 * b00 + a01 * b10 + a02 * b20;
    let c01 = a00 * b01 + a01 * b11 + a02 * b21;
    let c02 = a00 * b02 + a01 * b12 + a02 * b22;
    let c10 = a10 * b00 + a11 * b10 + a12 * b20;
    let c11 = a10 * b01 + a11 * b11 + a12 * b21;
    let c12 = a10 * b02 + a11 * b12 + a12 * b22;
    let c20 = a20 * b00 + a21 * b10 + a22 * b20;
    let c21 = a20 * b01 + a21 * b11 + a22 * b21;
    let c22 = a20 * b02 + a21 * b12 + a22 * b22;
    (c00, c01, c02, c10, c11, c12, c20, c21, c22)
}

#[cube]
pub fn mat3_transpose(
    m00: f32,
    m01: f32,
    m02: f32,
    m10: f32,
    m11: f32,
    m12: f32,
    m20: f32,
    m21: f32,
    m22: f32,
) -> (f32, f32, f32, f32, f32, f32, f32, f32, f32) {
    (m00, m10, m20, m01, m11, m21, m02, m12, m22)
}

/// 3D covariance `Sigma = R^T S^T S R` (spec §4.4 step 3).
#[cube]
pub fn calc_cov3d(
    scale_x: f32,
    scale_y: f32,
    scale_z: f32,
    quat_w: f32,
    quat_x: f32,
    quat_y: f32,
    quat_z: f32,
) -> (f32, f32, f32, f32, f32, f32, f32, f32, f32) {
    let r = quat_to_mat(quat_w, quat_x, quat_y, quat_z);
    let m00 = scale_x * r.0;
    let m01 = scale_x * r.1;
    let m02 = scale_x * r.2;
    let m10 = scale_y * r.3;
    let m11 = scale_y * r.4;
    let m12 = scale_y * r.5;
    let m20 = scale_z * r.6;
    let m21 = scale_z * r.7;
    let m22 = scale_z * r.8;
    let mt = mat3_transpose(m00, m01, m02, m10, m11, m12, m20, m21, m22);
    mat3_mul(
        mt.0, mt.1, mt.2, mt.3, mt.4, mt.5, mt.6, mt.7, mt.8, m00, m01, m02, m10, m11, m12, m20,
        m21, m22,
    )
}

/// Jacobian of the perspective projection at camera-space point `mean_c`,
/// with tan-angle clamping at `FOV_CLAMP_FACTOR * fov` (spec §4.4 step 4).
#[cube]
#[allow(clippy::too_many_arguments)]
pub fn calc_proj_jacobian(
    mean_c_x: f32,
    mean_c_y: f32,
    mean_c_z: f32,
    focal_x: f32,
    focal_y: f32,
    img_size_x: u32,
    img_size_y: u32,
    pixel_center_x: f32,
    pixel_center_y: f32,
) -> (f32, f32, f32, f32, f32, f32) {
    let lim_x = (FOV_CLAMP_FACTOR * pixel_center_x) / focal_x;
    let lim_y = (FOV_CLAMP_FACTOR * pixel_center_y) / focal_y;
    let _ = img_size_x;
    let _ = img_size_y;

    let rz = 1.0 / mean_c_z;
    let uv_x = f32::clamp(mean_c_x * rz, -lim_x, lim_x);
    let uv_y = f32::clamp(mean_c_y * rz, -lim_y, lim_y);

    let duv_x = focal_x * rz;
    let duv_y = focal_y * rz;

    (duv_x, 0.0, -duv_x * uv_x, 0.0, duv_y, -duv_y * uv_y)
}

/// 2D covariance `Sigma2 = (W*J)^T Sigma3 (W*J) + COV_BLUR*I` (spec §4.4
/// step 4), where `W` is the view-space rotation and `J` the projection
/// Jacobian above.
#[cube]
#[allow(clippy::too_many_arguments)]
pub fn calc_cov2d(
    cov3d: (f32, f32, f32, f32, f32, f32, f32, f32, f32),
    mean_c_x: f32,
    mean_c_y: f32,
    mean_c_z: f32,
    focal_x: f32,
    focal_y: f32,
    img_size_x: u32,
    img_size_y: u32,
    pixel_center_x: f32,
    pixel_center_y: f32,
    view_rot: (f32, f32, f32, f32, f32, f32, f32, f32, f32),
) -> (f32, f32, f32, f32) {
    let r = view_rot;
    let rc = mat3_mul(
        r.0, r.1, r.2, r.3, r.4, r.5, r.6, r.7, r.8, cov3d.0, cov3d.1, cov3d.2, cov3d.3, cov3d.4,
        cov3d.5, cov3d.6, cov3d.7, cov3d.8,
    );
    let rt = mat3_transpose(r.0, r.1, r.2, r.3, r.4, r.5, r.6, r.7, r.8);
    let covar_cam = mat3_mul(
        rc.0, rc.1, rc.2, rc.3, rc.4, rc.5, rc.6, rc.7, rc.8, rt.0, rt.1, rt.2, rt.3, rt.4, rt.5,
        rt.6, rt.7, rt.8,
    );

    let j = calc_proj_jacobian(
        mean_c_x,
        mean_c_y,
        mean_c_z,
        focal_x,
        focal_y,
        img_size_x,
        img_size_y,
        pixel_center_x,
        pixel_center_y,
    );

    let jc00 = j.0 * covar_cam.0 + j.1 * covar_cam.3 + j.2 * covar_cam.6;
    let jc01 = j.0 * covar_cam.1 + j.1 * covar_cam.4 + j.2 * covar_cam.7;
    let jc02 = j.0 * covar_cam.2 + j.1 * covar_cam.5 + j.2 * covar_cam.8;
    let jc10 = j.3 * covar_cam.0 + j.4 * covar_cam.3 + j.5 * covar_cam.6;
    let jc11 = j.3 * covar_cam.1 + j.4 * covar_cam.4 + j.5 * covar_cam.7;
    let jc12 = j.3 * covar_cam.2 + j.4 * covar_cam.5 + j.5 * covar_cam.8;

    let c00 = jc00 * j.0 + jc01 * j.1 + jc02 * j.2;
    let c01 = jc00 * j.3 + jc01 * j.4 + jc02 * j.5;
    let c10 = jc10 * j.0 + jc11 * j.1 + jc12 * j.2;
    let c11 = jc10 * j.3 + jc11 * j.4 + jc12 * j.5;

    (c00 + COV_BLUR, c01, c10, c11 + COV_BLUR)
}

#[cube]
pub fn mat2_determinant(m00: f32, m01: f32, m10: f32, m11: f32) -> f32 {
    m00 * m11 - m01 * m10
}

/// Conic = inverse of the 2D covariance. Returns a zero conic (caller must
/// check `det`) when the covariance is singular or not positive-definite.
#[cube]
pub fn mat2_inverse(m00: f32, m01: f32, m10: f32, m11: f32) -> (f32, f32, f32, f32) {
    let det = mat2_determinant(m00, m01, m10, m11);
    let mut inv00 = 0.0;
    let mut inv01 = 0.0;
    let mut inv10 = 0.0;
    let mut inv11 = 0.0;
    if det > 0.0 {
        let inv_det = 1.0 / det;
        inv00 = m11 * inv_det;
        inv01 = -m01 * inv_det;
        inv10 = -m10 * inv_det;
        inv11 = m00 * inv_det;
    }
    (inv00, inv01, inv10, inv11)
}

/// `alpha(Delta) = sigma * exp(-0.5 * Delta^T * conic * Delta)` exponent
/// term, i.e. the quadratic form `Delta^T * conic * Delta`.
#[cube]
pub fn calc_sigma(
    pixel_x: f32,
    pixel_y: f32,
    conic_a: f32,
    conic_b: f32,
    conic_c: f32,
    mean_x: f32,
    mean_y: f32,
) -> f32 {
    let dx = mean_x - pixel_x;
    let dy = mean_y - pixel_y;
    0.5 * (conic_a * dx * dx + 2.0 * conic_b * dx * dy + conic_c * dy * dy)
}

/// Opacity-bounded ellipse half-extent in pixels: the radius at which
/// `sigma*exp(-t) = 1/128` (spec §4.4 step 5: `t = 2*ln(sigma*128)`).
#[cube]
pub fn compute_bbox_extent(
    cov00: f32,
    cov01: f32,
    cov11: f32,
    power_threshold: f32,
) -> (f32, f32) {
    let extent_x = f32::sqrt(f32::max(0.0, cov00 * power_threshold));
    let extent_y = f32::sqrt(f32::max(0.0, cov11 * power_threshold));
    let _ = cov01;
    (extent_x, extent_y)
}

#[cube]
pub fn map_1d_to_2d(id: u32, tiles_per_row: u32) -> (u32, u32) {
    let tile_id = id / TILE_SIZE;
    let within_tile_id = id % TILE_SIZE;
    let tile_x = tile_id % tiles_per_row;
    let tile_y = tile_id / tiles_per_row;
    let local_x = within_tile_id % TILE_WIDTH;
    let local_y = within_tile_id / TILE_WIDTH;
    (tile_x * TILE_WIDTH + local_x, tile_y * TILE_WIDTH + local_y)
}
