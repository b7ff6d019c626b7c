//! Forward preprocess (C4): projects each Gaussian to screen space, culls
//! invisible ones, and compacts the survivors into a dense
//! `[xy(2), conic(3), color(4)]` per-splat record consumed by the
//! rasterizer (spec §4.4).

use super::helpers::*;
use super::sh::sh_coeffs_to_color;
use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

/// Number of f32 words per compacted projected splat: xy(2) + conic(3) +
/// color_rgb(3) + opacity(1).
pub const PROJECTED_STRIDE: u32 = 9;

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn project_forward(
    means: &Tensor<f32>,
    quats: &Tensor<f32>,
    log_scales: &Tensor<f32>,
    raw_opacities: &Tensor<f32>,
    sh_coeffs: &Tensor<f32>,
    sh_degree: u32,
    global_from_compact_gid: &mut Tensor<u32>,
    depths: &mut Tensor<f32>,
    projected: &mut Tensor<f32>,
    num_visible: &mut Tensor<Atomic<u32>>,
    total_splats: u32,
    view_rows: &Tensor<f32>, // 12 floats: row-major 3x4 [R | t]
    uniforms: &Tensor<f32>,  // [focal_x, focal_y, pixel_cx, pixel_cy, img_w, img_h]
) {
    let global_gid = ABSOLUTE_POS;
    if global_gid >= total_splats {
        terminate!();
    }

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
    let img_width = u32::cast_from(uniforms[4]);
    let img_height = u32::cast_from(uniforms[5]);

    let mean_x = means[global_gid * 3];
    let mean_y = means[global_gid * 3 + 1];
    let mean_z = means[global_gid * 3 + 2];

    let mean_c_x = r00 * mean_x + r01 * mean_y + r02 * mean_z + t_x;
    let mean_c_y = r10 * mean_x + r11 * mean_y + r12 * mean_z + t_y;
    let mean_c_z = r20 * mean_x + r21 * mean_y + r22 * mean_z + t_z;

    // p.w == 0 / behind-camera cull (spec §4.4 step 2).
    if mean_c_z < 0.01 || mean_c_z > 1.0e10 {
        terminate!();
    }

    // NDC cull: reproject through the full projection to get NDC.xy/.z.
    let clip_x = focal_x * mean_c_x + pixel_center_x * mean_c_z;
    let clip_y = focal_y * mean_c_y + pixel_center_y * mean_c_z;
    let ndc_x = (clip_x / mean_c_z - pixel_center_x) / pixel_center_x;
    let ndc_y = (clip_y / mean_c_z - pixel_center_y) / pixel_center_y;
    if f32::abs(ndc_x) > 1.2 || f32::abs(ndc_y) > 1.2 {
        terminate!();
    }

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
    if qn2 < 1.0e-12 {
        terminate!();
    }
    let inv_n = 1.0 / f32::sqrt(qn2);
    qw *= inv_n;
    qx *= inv_n;
    qy *= inv_n;
    qz *= inv_n;

    let cov3d = calc_cov3d(scale_x, scale_y, scale_z, qw, qx, qy, qz);
    let view_rot = (r00, r01, r02, r10, r11, r12, r20, r21, r22);
    let cov2d = calc_cov2d(
        cov3d,
        mean_c_x,
        mean_c_y,
        mean_c_z,
        focal_x,
        focal_y,
        img_width,
        img_height,
        pixel_center_x,
        pixel_center_y,
        view_rot,
    );

    let det = mat2_determinant(cov2d.0, cov2d.1, cov2d.2, cov2d.3);
    if det <= 0.0 {
        terminate!();
    }

    let conic = mat2_inverse(cov2d.0, cov2d.1, cov2d.2, cov2d.3);

    let raw_opacity = raw_opacities[global_gid];
    let opac = sigmoid(raw_opacity);
    if opac < MIN_ALPHA {
        terminate!();
    }

    // Opacity-bounded ellipse radius: t = 2*ln(sigma*128); reject if <= 0.
    let t_radius = 2.0 * f32::log(opac * 128.0);
    if t_radius <= 0.0 {
        terminate!();
    }
    let extent = compute_bbox_extent(cov2d.0, cov2d.1, cov2d.3, t_radius);
    let extent_x = extent.0 + 2.0;
    let extent_y = extent.1 + 2.0;

    let mean2d_x = focal_x * mean_c_x / mean_c_z + pixel_center_x;
    let mean2d_y = focal_y * mean_c_y / mean_c_z + pixel_center_y;

    let img_w_f = f32::cast_from(img_width);
    let img_h_f = f32::cast_from(img_height);
    if mean2d_x + extent_x <= 0.0
        || mean2d_x - extent_x >= img_w_f
        || mean2d_y + extent_y <= 0.0
        || mean2d_y - extent_y >= img_h_f
    {
        terminate!();
    }

    // View direction for SH evaluation is camera -> Gaussian, in world space.
    let view_dir_x = mean_x - (-(r00 * t_x + r10 * t_y + r20 * t_z));
    let view_dir_y = mean_y - (-(r01 * t_x + r11 * t_y + r21 * t_z));
    let view_dir_z = mean_z - (-(r02 * t_x + r12 * t_y + r22 * t_z));
    let dir_len = f32::sqrt(
        view_dir_x * view_dir_x + view_dir_y * view_dir_y + view_dir_z * view_dir_z,
    ) + 1.0e-12;

    let mut color_r = 0.0f32;
    let mut color_g = 0.0f32;
    let mut color_b = 0.0f32;
    sh_coeffs_to_color(
        sh_degree,
        view_dir_x / dir_len,
        view_dir_y / dir_len,
        view_dir_z / dir_len,
        sh_coeffs,
        global_gid * 48,
        &mut color_r,
        &mut color_g,
        &mut color_b,
    );
    color_r = f32::max(0.0, color_r);
    color_g = f32::max(0.0, color_g);
    color_b = f32::max(0.0, color_b);

    let write_id = Atomic::add(&num_visible[0], 1u32);

    global_from_compact_gid[write_id] = global_gid;
    depths[write_id] = mean_c_z;

    let base = write_id * PROJECTED_STRIDE;
    projected[base] = mean2d_x;
    projected[base + 1] = mean2d_y;
    projected[base + 2] = conic.0;
    projected[base + 3] = conic.1;
    projected[base + 4] = conic.3;
    projected[base + 5] = color_r;
    projected[base + 6] = color_g;
    projected[base + 7] = color_b;
    projected[base + 8] = opac;
}
