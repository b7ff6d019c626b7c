//! Loss kernel (C7): per-pixel analytic gradient of
//! `lambda_l1*|p-t| + lambda_l2*(p-t)^2 + lambda_dssim*DSSIM(p,t)`,
//! written to an rgba32float gradient image (spec §4.7).
//!
//! DSSIM uses a 5x5 box window. The windowed SSIM gradient is computed
//! treating each pixel's own window statistics as a function of its own
//! intensity only (the standard per-pixel approximation: it ignores the
//! center pixel's smaller contribution to its neighbors' windows), which
//! keeps this a single read-only pass with no neighbor atomics.

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

const WINDOW_RADIUS: i32 = 2;

#[cube]
fn window_stats(
    pred: &Tensor<f32>,
    target: &Tensor<f32>,
    px: u32,
    py: u32,
    ch: u32,
    img_w: u32,
    img_h: u32,
) -> (f32, f32, f32, f32, f32) {
    let mut sum_p = 0.0f32;
    let mut sum_t = 0.0f32;
    let mut sum_pp = 0.0f32;
    let mut sum_tt = 0.0f32;
    let mut sum_pt = 0.0f32;
    let mut n = 0.0f32;

    let mut dy = -WINDOW_RADIUS;
    while dy <= WINDOW_RADIUS {
        let sy = i32::cast_from(py) + dy;
        if sy >= 0 && sy < i32::cast_from(img_h) {
            let mut dx = -WINDOW_RADIUS;
            while dx <= WINDOW_RADIUS {
                let sx = i32::cast_from(px) + dx;
                if sx >= 0 && sx < i32::cast_from(img_w) {
                    let idx = (u32::cast_from(sy) * img_w + u32::cast_from(sx)) * 4 + ch;
                    let p = pred[idx];
                    let t = target[idx];
                    sum_p += p;
                    sum_t += t;
                    sum_pp += p * p;
                    sum_tt += t * t;
                    sum_pt += p * t;
                    n += 1.0;
                }
                dx += 1;
            }
        }
        dy += 1;
    }

    let mu_p = sum_p / n;
    let mu_t = sum_t / n;
    let var_p = sum_pp / n - mu_p * mu_p;
    let var_t = sum_tt / n - mu_t * mu_t;
    let cov_pt = sum_pt / n - mu_p * mu_t;
    (mu_p, mu_t, var_p, var_t, cov_pt)
}

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn loss_grad(
    pred: &Tensor<f32>,
    target: &Tensor<f32>,
    grad_out: &mut Tensor<f32>,
    uniforms: &Tensor<f32>, // [img_w, img_h, lambda_l1, lambda_l2, lambda_dssim, c1, c2]
) {
    let pix_id = ABSOLUTE_POS;
    let img_w = u32::cast_from(uniforms[0]);
    let img_h = u32::cast_from(uniforms[1]);
    let num_pixels = img_w * img_h;
    if pix_id >= num_pixels {
        terminate!();
    }

    let lambda_l1 = uniforms[2];
    let lambda_l2 = uniforms[3];
    let lambda_dssim = uniforms[4];
    let c1 = uniforms[5];
    let c2 = uniforms[6];

    let px = pix_id % img_w;
    let py = pix_id / img_w;

    let mut ch = 0u32;
    while ch < 3u32 {
        let idx = pix_id * 4 + ch;
        let p = pred[idx];
        let t = target[idx];
        let diff = p - t;

        let l1_grad = if diff > 0.0 {
            1.0f32
        } else if diff < 0.0 {
            -1.0f32
        } else {
            0.0f32
        };
        let l2_grad = 2.0 * diff;

        let stats = window_stats(pred, target, px, py, ch, img_w, img_h);
        let mu_p = stats.0;
        let mu_t = stats.1;
        let var_p = stats.2;
        let var_t = stats.3;
        let cov_pt = stats.4;
        let n = f32::cast_from((2 * WINDOW_RADIUS + 1) * (2 * WINDOW_RADIUS + 1));

        let a1 = 2.0 * mu_p * mu_t + c1;
        let a2 = 2.0 * cov_pt + c2;
        let b1 = mu_p * mu_p + mu_t * mu_t + c1;
        let b2 = var_p + var_t + c2;

        let da1 = 2.0 * mu_t / n;
        let da2 = 2.0 * (t - mu_t) / n;
        let db1 = 2.0 * mu_p / n;
        let db2 = 2.0 * (p - mu_p) / n;

        let denom = b1 * b2;
        let numer = a1 * a2;
        let d_ssim = ((da1 * a2 + a1 * da2) * denom - numer * (db1 * b2 + b1 * db2))
            / (denom * denom);
        let dssim_grad = -d_ssim;

        grad_out[idx] = lambda_l1 * l1_grad + lambda_l2 * l2_grad + lambda_dssim * dssim_grad;
        ch += 1u32;
    }
    grad_out[pix_id * 4 + 3] = 0.0;
}
