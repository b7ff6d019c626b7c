//! Backward geometry (C9): per visible Gaussian, reverses the forward
//! projection chain (spec §4.4) to turn the screen-space gradients
//! accumulated by C8 into gradients on the raw optimizer parameters
//! (mean, quaternion, log-scale, raw opacity, SH coefficients).
//!
//! The forward conic/color/opacity already live in `projected` (C4's
//! output), so this only has to recompute what C4 did *not* keep around:
//! camera-space mean, the 3D covariance, the view-space covariance and the
//! projection Jacobian, all of which feed the covariance/quaternion chain
//! rule below.

use crate::fixed_point::decode_fixed;
use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;
use splat_render::cubecl::helpers::{
    FOV_CLAMP_FACTOR, calc_cov3d, compute_bbox_extent, mat2_inverse, mat3_mul, mat3_transpose,
    quat_to_mat,
};

/// Must match `splat_render::cubecl::project::PROJECTED_STRIDE`.
const PROJECTED_STRIDE: u32 = 9;

/// Quaternion gradient from a rotation-matrix gradient, for `R = quat_to_mat`
/// (helpers.rs). Derived directly from that function's partials; skips the
/// unit-norm re-projection Jacobian and treats the (already-normalized)
/// quaternion read from the buffer as the point of linearization.
#[cube]
#[allow(clippy::too_many_arguments)]
fn quat_grad_from_rotmat(
    w: f32,
    x: f32,
    y: f32,
    z: f32,
    v_r00: f32,
    v_r01: f32,
    v_r02: f32,
    v_r10: f32,
    v_r11: f32,
    v_r12: f32,
    v_r20: f32,
    v_r21: f32,
    v_r22: f32,
) -> (f32, f32, f32, f32) {
    let v_w = 2.0 * (x * (v_r21 - v_r12) + y * (v_r02 - v_r20) + z * (v_r10 - v_r01));
    let v_x = 2.0 * y * (v_r01 + v_r10) + 2.0 * z * (v_r02 + v_r20) + 2.0 * w * (v_r21 - v_r12)
        - 4.0 * x * (v_r11 + v_r22);
    let v_y = 2.0 * x * (v_r01 + v_r10) + 2.0 * w * (v_r02 - v_r20) + 2.0 * z * (v_r12 + v_r21)
        - 4.0 * y * (v_r00 + v_r22);
    let v_z = 2.0 * x * (v_r02 + v_r20) + 2.0 * y * (v_r12 + v_r21) + 2.0 * w * (v_r10 - v_r01)
        - 4.0 * z * (v_r00 + v_r11);
    (v_w, v_x, v_y, v_z)
}

/// VJP of `sh_coeffs_to_color` (sh.rs): scatters `v_color_{r,g,b}` onto the
/// coefficients that produced them, weighted by the same basis values.
#[cube]
#[allow(clippy::too_many_arguments)]
fn sh_coeffs_vjp(
    degree: u32,
    viewdir_x: f32,
    viewdir_y: f32,
    viewdir_z: f32,
    v_color_r: f32,
    v_color_g: f32,
    v_color_b: f32,
    v_coeffs: &mut Tensor<f32>,
    base_idx: u32,
) {
    const SH_C0: f32 = 0.2820947917738781;
    v_coeffs[base_idx] += SH_C0 * v_color_r;
    v_coeffs[base_idx + 1] += SH_C0 * v_color_g;
    v_coeffs[base_idx + 2] += SH_C0 * v_color_b;

    if degree >= 1 {
        let x = viewdir_x;
        let y = viewdir_y;
        let z = viewdir_z;
        let f1 = 0.48860251190292;

        let i0 = base_idx + 3;
        let i1 = i0 + 3;
        let i2 = i1 + 3;

        v_coeffs[i0] += f1 * -y * v_color_r;
        v_coeffs[i1] += f1 * z * v_color_r;
        v_coeffs[i2] += f1 * -x * v_color_r;
        v_coeffs[i0 + 1] += f1 * -y * v_color_g;
        v_coeffs[i1 + 1] += f1 * z * v_color_g;
        v_coeffs[i2 + 1] += f1 * -x * v_color_g;
        v_coeffs[i0 + 2] += f1 * -y * v_color_b;
        v_coeffs[i1 + 2] += f1 * z * v_color_b;
        v_coeffs[i2 + 2] += f1 * -x * v_color_b;
    }

    if degree >= 2 {
        let x = viewdir_x;
        let y = viewdir_y;
        let z = viewdir_z;
        let z2 = z * z;
        let fc1 = x * x - y * y;
        let fs1 = 2.0 * x * y;

        let psh6 = 0.9461746957575601 * z2 - 0.3153915652525201;
        let psh7 = -1.092548430592079 * z * x;
        let psh5 = -1.092548430592079 * z * y;
        let psh8 = 0.5462742152960395 * fc1;
        let psh4 = 0.5462742152960395 * fs1;

        let i0 = base_idx + 12;
        let i1 = i0 + 3;
        let i2 = i1 + 3;
        let i3 = i2 + 3;
        let i4 = i3 + 3;

        v_coeffs[i0] += psh4 * v_color_r;
        v_coeffs[i1] += psh5 * v_color_r;
        v_coeffs[i2] += psh6 * v_color_r;
        v_coeffs[i3] += psh7 * v_color_r;
        v_coeffs[i4] += psh8 * v_color_r;
        v_coeffs[i0 + 1] += psh4 * v_color_g;
        v_coeffs[i1 + 1] += psh5 * v_color_g;
        v_coeffs[i2 + 1] += psh6 * v_color_g;
        v_coeffs[i3 + 1] += psh7 * v_color_g;
        v_coeffs[i4 + 1] += psh8 * v_color_g;
        v_coeffs[i0 + 2] += psh4 * v_color_b;
        v_coeffs[i1 + 2] += psh5 * v_color_b;
        v_coeffs[i2 + 2] += psh6 * v_color_b;
        v_coeffs[i3 + 2] += psh7 * v_color_b;
        v_coeffs[i4 + 2] += psh8 * v_color_b;
    }

    if degree >= 3 {
        let x = viewdir_x;
        let y = viewdir_y;
        let z = viewdir_z;
        let z2 = z * z;
        let fc1 = x * x - y * y;
        let fs1 = 2.0 * x * y;
        let fc2 = x * fc1 - y * fs1;
        let fs2 = x * fs1 + y * fc1;

        let ftmp0c = -2.285228997322329 * z2 + 0.4570457994644658;
        let ftmp1b = 1.445305721320277 * z;

        let psh12 = z * (1.865881662950577 * z2 - 1.119528997770346);
        let psh13 = ftmp0c * x;
        let psh11 = ftmp0c * y;
        let psh14 = ftmp1b * fc1;
        let psh10 = ftmp1b * fs1;
        let psh15 = -0.5900435899266435 * fc2;
        let psh9 = -0.5900435899266435 * fs2;

        let i0 = base_idx + 27;
        let i1 = i0 + 3;
        let i2 = i1 + 3;
        let i3 = i2 + 3;
        let i4 = i3 + 3;
        let i5 = i4 + 3;
        let i6 = i5 + 3;

        v_coeffs[i0] += psh9 * v_color_r;
        v_coeffs[i1] += psh10 * v_color_r;
        v_coeffs[i2] += psh11 * v_color_r;
        v_coeffs[i3] += psh12 * v_color_r;
        v_coeffs[i4] += psh13 * v_color_r;
        v_coeffs[i5] += psh14 * v_color_r;
        v_coeffs[i6] += psh15 * v_color_r;
        v_coeffs[i0 + 1] += psh9 * v_color_g;
        v_coeffs[i1 + 1] += psh10 * v_color_g;
        v_coeffs[i2 + 1] += psh11 * v_color_g;
        v_coeffs[i3 + 1] += psh12 * v_color_g;
        v_coeffs[i4 + 1] += psh13 * v_color_g;
        v_coeffs[i5 + 1] += psh14 * v_color_g;
        v_coeffs[i6 + 1] += psh15 * v_color_g;
        v_coeffs[i0 + 2] += psh9 * v_color_b;
        v_coeffs[i1 + 2] += psh10 * v_color_b;
        v_coeffs[i2 + 2] += psh11 * v_color_b;
        v_coeffs[i3 + 2] += psh12 * v_color_b;
        v_coeffs[i4 + 2] += psh13 * v_color_b;
        v_coeffs[i5 + 2] += psh14 * v_color_b;
        v_coeffs[i6 + 2] += psh15 * v_color_b;
    }
}

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn project_backward(
    global_from_compact_gid: &Tensor<u32>,
    num_visible: &Tensor<u32>,
    means: &Tensor<f32>,
    quats: &Tensor<f32>,
    log_scales: &Tensor<f32>,
    sh_degree: u32,
    projected: &Tensor<f32>,
    v_projected: &Tensor<Atomic<i32>>,
    view_rows: &Tensor<f32>,
    uniforms: &Tensor<f32>, // [focal_x, focal_y, pixel_cx, pixel_cy, img_w, img_h, max_radius_px]
    v_means: &mut Tensor<f32>,
    v_quats: &mut Tensor<f32>,
    v_log_scales: &mut Tensor<f32>,
    v_raw_opacities: &mut Tensor<f32>,
    v_sh_coeffs: &mut Tensor<f32>,
) {
    let compact_gid = ABSOLUTE_POS;
    if compact_gid >= num_visible[0] {
        terminate!();
    }
    let global_gid = global_from_compact_gid[compact_gid];

    let r00 = view_rows[0];
    let r01 = view_rows[1];
    let r02 = view_rows[2];
    let t_x = view_rows[3];
    let r10 = view_rows[4];
    let r11 = view_rows[5];
    let r12 = view_rows[6];
    let t_y = view_rows[7];
    let r20 = view_rows[8];
    let r21 = view_rows[9];
    let r22 = view_rows[10];
    let t_z = view_rows[11];

    let focal_x = uniforms[0];
    let focal_y = uniforms[1];
    let pixel_center_x = uniforms[2];
    let pixel_center_y = uniforms[3];
    let max_radius_px = uniforms[6];

    let mean_x = means[global_gid * 3];
    let mean_y = means[global_gid * 3 + 1];
    let mean_z = means[global_gid * 3 + 2];

    let mean_c_x = r00 * mean_x + r01 * mean_y + r02 * mean_z + t_x;
    let mean_c_y = r10 * mean_x + r11 * mean_y + r12 * mean_z + t_y;
    let mean_c_z = r20 * mean_x + r21 * mean_y + r22 * mean_z + t_z;
    let rz = 1.0 / mean_c_z;

    let log_scale_x = log_scales[global_gid * 3];
    let log_scale_y = log_scales[global_gid * 3 + 1];
    let log_scale_z = log_scales[global_gid * 3 + 2];
    let scale_x = f32::exp(log_scale_x);
    let scale_y = f32::exp(log_scale_y);
    let scale_z = f32::exp(log_scale_z);

    let mut qw = quats[global_gid * 4];
    let mut qx = quats[global_gid * 4 + 1];
    let mut qy = quats[global_gid * 4 + 2];
    let mut qz = quats[global_gid * 4 + 3];
    let qn2 = qw * qw + qx * qx + qy * qy + qz * qz;
    let inv_n = 1.0 / f32::sqrt(f32::max(qn2, 1.0e-12));
    qw *= inv_n;
    qx *= inv_n;
    qy *= inv_n;
    qz *= inv_n;

    let base = compact_gid * PROJECTED_STRIDE;
    let conic_a = projected[base + 2];
    let conic_b = projected[base + 3];
    let conic_c = projected[base + 4];
    let color_r = projected[base + 5];
    let color_g = projected[base + 6];
    let color_b = projected[base + 7];
    let opac = projected[base + 8];

    let v_mean2d_x = decode_fixed(Atomic::load(&v_projected[base]));
    let v_mean2d_y = decode_fixed(Atomic::load(&v_projected[base + 1]));
    let v_conic_a = decode_fixed(Atomic::load(&v_projected[base + 2]));
    let v_conic_b = decode_fixed(Atomic::load(&v_projected[base + 3]));
    let v_conic_c = decode_fixed(Atomic::load(&v_projected[base + 4]));
    let v_color_r = decode_fixed(Atomic::load(&v_projected[base + 5]));
    let v_color_g = decode_fixed(Atomic::load(&v_projected[base + 6]));
    let v_color_b = decode_fixed(Atomic::load(&v_projected[base + 7]));
    let v_opac = decode_fixed(Atomic::load(&v_projected[base + 8]));

    // --- opacity: sigmoid chain ---
    v_raw_opacities[global_gid] = v_opac * opac * (1.0 - opac);

    // --- SH coefficients: view direction is camera -> Gaussian, world space ---
    let cam_origin_x = -(r00 * t_x + r10 * t_y + r20 * t_z);
    let cam_origin_y = -(r01 * t_x + r11 * t_y + r21 * t_z);
    let cam_origin_z = -(r02 * t_x + r12 * t_y + r22 * t_z);
    let view_dir_x = mean_x - cam_origin_x;
    let view_dir_y = mean_y - cam_origin_y;
    let view_dir_z = mean_z - cam_origin_z;
    let dir_len =
        f32::sqrt(view_dir_x * view_dir_x + view_dir_y * view_dir_y + view_dir_z * view_dir_z)
            + 1.0e-12;

    let gate_r = if color_r > 0.0 { 1.0 } else { 0.0 };
    let gate_g = if color_g > 0.0 { 1.0 } else { 0.0 };
    let gate_b = if color_b > 0.0 { 1.0 } else { 0.0 };
    sh_coeffs_vjp(
        sh_degree,
        view_dir_x / dir_len,
        view_dir_y / dir_len,
        view_dir_z / dir_len,
        v_color_r * gate_r,
        v_color_g * gate_g,
        v_color_b * gate_b,
        v_sh_coeffs,
        global_gid * 48,
    );

    // --- conic -> cov2d (recovered by inverting conic back) ---
    let cov2d = mat2_inverse(conic_a, conic_b, conic_b, conic_c);
    let cov_a = cov2d.0;
    let cov_b = cov2d.1;
    let cov_c = cov2d.3;
    let det = cov_a * cov_c - cov_b * cov_b;
    let det2 = f32::max(det * det, 1.0e-20);

    let v_cov_a = v_conic_a * (-cov_c * cov_c / det2)
        + v_conic_b * (cov_b * cov_c / det2)
        + v_conic_c * (-cov_b * cov_b / det2);
    let v_cov_b = v_conic_a * (2.0 * cov_b * cov_c / det2)
        + v_conic_b * ((-cov_a * cov_c - cov_b * cov_b) / det2)
        + v_conic_c * (2.0 * cov_a * cov_b / det2);
    let v_cov_c = v_conic_a * (-cov_b * cov_b / det2)
        + v_conic_b * (cov_a * cov_b / det2)
        + v_conic_c * (-cov_a * cov_a / det2);

    // --- recompute cov3d, view-space covariance and projection Jacobian ---
    let cov3d = calc_cov3d(scale_x, scale_y, scale_z, qw, qx, qy, qz);
    let rc = mat3_mul(
        r00, r01, r02, r10, r11, r12, r20, r21, r22, cov3d.0, cov3d.1, cov3d.2, cov3d.3, cov3d.4,
        cov3d.5, cov3d.6, cov3d.7, cov3d.8,
    );
    let rt = mat3_transpose(r00, r01, r02, r10, r11, r12, r20, r21, r22);
    let covar_cam = mat3_mul(
        rc.0, rc.1, rc.2, rc.3, rc.4, rc.5, rc.6, rc.7, rc.8, rt.0, rt.1, rt.2, rt.3, rt.4, rt.5,
        rt.6, rt.7, rt.8,
    );

    let lim_x = (FOV_CLAMP_FACTOR * pixel_center_x) / focal_x;
    let lim_y = (FOV_CLAMP_FACTOR * pixel_center_y) / focal_y;
    let raw_ux = mean_c_x * rz;
    let raw_uy = mean_c_y * rz;
    let clamped_x = raw_ux < -lim_x || raw_ux > lim_x;
    let clamped_y = raw_uy < -lim_y || raw_uy > lim_y;
    let uv_x = f32::clamp(raw_ux, -lim_x, lim_x);
    let uv_y = f32::clamp(raw_uy, -lim_y, lim_y);
    let duv_x = focal_x * rz;
    let duv_y = focal_y * rz;
    let j0 = duv_x;
    let j2 = -duv_x * uv_x;
    let j4 = duv_y;
    let j5 = -duv_y * uv_y;

    // W = v_cov2d * J (2x3); J's [0][1] and [1][0] entries are structurally 0.
    let w0_0 = v_cov_a * j0;
    let w0_1 = 0.0;
    let w0_2 = v_cov_a * j2 + v_cov_b * j5;
    let w1_0 = v_cov_b * j0;
    let w1_1 = v_cov_c * j4;
    let w1_2 = v_cov_b * j2 + v_cov_c * j5;

    // dL/dJ (2x3) = 2 * W * covar_cam, only the 4 free slots matter.
    let dj00 = 2.0 * (w0_0 * covar_cam.0 + w0_1 * covar_cam.3 + w0_2 * covar_cam.6);
    let dj02 = 2.0 * (w0_0 * covar_cam.2 + w0_1 * covar_cam.5 + w0_2 * covar_cam.8);
    let dj11 = 2.0 * (w1_0 * covar_cam.1 + w1_1 * covar_cam.4 + w1_2 * covar_cam.7);
    let dj12 = 2.0 * (w1_0 * covar_cam.2 + w1_1 * covar_cam.5 + w1_2 * covar_cam.8);

    // dL/dcovar_cam (3x3) = J^T * v_cov2d * J.
    let dcc00 = j0 * w0_0;
    let dcc01 = j0 * w0_1;
    let dcc02 = j0 * w0_2;
    let dcc10 = j4 * w1_0;
    let dcc11 = j4 * w1_1;
    let dcc12 = j4 * w1_2;
    let dcc20 = j2 * w0_0 + j5 * w1_0;
    let dcc21 = j2 * w0_1 + j5 * w1_1;
    let dcc22 = j2 * w0_2 + j5 * w1_2;

    // --- J -> camera-space mean (clamp-gated) ---
    let v_uv_x = if clamped_x { 0.0 } else { -dj02 * duv_x };
    let v_uv_y = if clamped_y { 0.0 } else { -dj12 * duv_y };
    let v_duv_x = dj00 - dj02 * uv_x;
    let v_duv_y = dj11 - dj12 * uv_y;

    let mut v_mean_c_x = v_uv_x * rz;
    let mut v_mean_c_y = v_uv_y * rz;
    let mut v_mean_c_z = v_duv_x * (-focal_x * rz * rz)
        + v_uv_x * (-mean_c_x * rz * rz)
        + v_duv_y * (-focal_y * rz * rz)
        + v_uv_y * (-mean_c_y * rz * rz);

    // --- direct pinhole mean2d -> camera-space mean ---
    v_mean_c_x += v_mean2d_x * focal_x * rz;
    v_mean_c_y += v_mean2d_y * focal_y * rz;
    v_mean_c_z += v_mean2d_x * (-focal_x * mean_c_x * rz * rz)
        + v_mean2d_y * (-focal_y * mean_c_y * rz * rz);

    v_means[global_gid * 3] = r00 * v_mean_c_x + r10 * v_mean_c_y + r20 * v_mean_c_z;
    v_means[global_gid * 3 + 1] = r01 * v_mean_c_x + r11 * v_mean_c_y + r21 * v_mean_c_z;
    v_means[global_gid * 3 + 2] = r02 * v_mean_c_x + r12 * v_mean_c_y + r22 * v_mean_c_z;

    // --- covar_cam -> cov3d ---
    let dcc_s01 = 0.5 * (dcc01 + dcc10);
    let dcc_s02 = 0.5 * (dcc02 + dcc20);
    let dcc_s12 = 0.5 * (dcc12 + dcc21);
    let tmp = mat3_mul(
        rt.0, rt.1, rt.2, rt.3, rt.4, rt.5, rt.6, rt.7, rt.8, dcc00, dcc_s01, dcc_s02, dcc_s01,
        dcc11, dcc_s12, dcc_s02, dcc_s12, dcc22,
    );
    let dcov3d = mat3_mul(
        tmp.0, tmp.1, tmp.2, tmp.3, tmp.4, tmp.5, tmp.6, tmp.7, tmp.8, r00, r01, r02, r10, r11,
        r12, r20, r21, r22,
    );

    // --- cov3d = M^T M, M = diag(scale) * quat_to_mat(q) ---
    let rq = quat_to_mat(qw, qx, qy, qz);
    let m00 = scale_x * rq.0;
    let m01 = scale_x * rq.1;
    let m02 = scale_x * rq.2;
    let m10 = scale_y * rq.3;
    let m11 = scale_y * rq.4;
    let m12 = scale_y * rq.5;
    let m20 = scale_z * rq.6;
    let m21 = scale_z * rq.7;
    let m22 = scale_z * rq.8;

    let dcov3d_s01 = 0.5 * (dcov3d.1 + dcov3d.3);
    let dcov3d_s02 = 0.5 * (dcov3d.2 + dcov3d.6);
    let dcov3d_s12 = 0.5 * (dcov3d.5 + dcov3d.7);

    let dlm = mat3_mul(
        m00,
        m01,
        m02,
        m10,
        m11,
        m12,
        m20,
        m21,
        m22,
        dcov3d.0,
        dcov3d_s01,
        dcov3d_s02,
        dcov3d_s01,
        dcov3d.4,
        dcov3d_s12,
        dcov3d_s02,
        dcov3d_s12,
        dcov3d.8,
    );
    let dlm00 = 2.0 * dlm.0;
    let dlm01 = 2.0 * dlm.1;
    let dlm02 = 2.0 * dlm.2;
    let dlm10 = 2.0 * dlm.3;
    let dlm11 = 2.0 * dlm.4;
    let dlm12 = 2.0 * dlm.5;
    let dlm20 = 2.0 * dlm.6;
    let dlm21 = 2.0 * dlm.7;
    let dlm22 = 2.0 * dlm.8;

    let v_scale_x = rq.0 * dlm00 + rq.1 * dlm01 + rq.2 * dlm02;
    let v_scale_y = rq.3 * dlm10 + rq.4 * dlm11 + rq.5 * dlm12;
    let v_scale_z = rq.6 * dlm20 + rq.7 * dlm21 + rq.8 * dlm22;

    let mut v_log_scale_x = v_scale_x * scale_x;
    let mut v_log_scale_y = v_scale_y * scale_y;
    let mut v_log_scale_z = v_scale_z * scale_z;

    // Radius-cap gradient clamp: once a splat's screen footprint exceeds the
    // allowed radius, forbid gradients that would grow it further (spec §4.9).
    let t_radius = 2.0 * f32::log(opac * 128.0);
    let extent = compute_bbox_extent(cov_a, cov_b, cov_c, t_radius);
    let radius_px = f32::max(extent.0, extent.1);
    if radius_px >= max_radius_px {
        v_log_scale_x = f32::max(v_log_scale_x, 0.0);
        v_log_scale_y = f32::max(v_log_scale_y, 0.0);
        v_log_scale_z = f32::max(v_log_scale_z, 0.0);
    }

    v_log_scales[global_gid * 3] = v_log_scale_x;
    v_log_scales[global_gid * 3 + 1] = v_log_scale_y;
    v_log_scales[global_gid * 3 + 2] = v_log_scale_z;

    let v_r00 = scale_x * dlm00;
    let v_r01 = scale_x * dlm01;
    let v_r02 = scale_x * dlm02;
    let v_r10 = scale_y * dlm10;
    let v_r11 = scale_y * dlm11;
    let v_r12 = scale_y * dlm12;
    let v_r20 = scale_z * dlm20;
    let v_r21 = scale_z * dlm21;
    let v_r22 = scale_z * dlm22;

    let v_quat = quat_grad_from_rotmat(
        qw, qx, qy, qz, v_r00, v_r01, v_r02, v_r10, v_r11, v_r12, v_r20, v_r21, v_r22,
    );
    v_quats[global_gid * 4] = v_quat.0;
    v_quats[global_gid * 4 + 1] = v_quat.1;
    v_quats[global_gid * 4 + 2] = v_quat.2;
    v_quats[global_gid * 4 + 3] = v_quat.3;
}
