//! Spherical-harmonic evaluation up to degree 3 (16 coefficients per
//! channel), ported from the real-valued SH basis used throughout 3DGS
//! rasterizers (Sloan, "Efficient Spherical Harmonic Evaluation", JCGT
//! 2013). `coeffs` is channel-major: `coeffs[base_idx + coeff*3 + channel]`.

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

pub const SH_C0: f32 = 0.2820947917738781;

#[cube]
#[allow(clippy::too_many_arguments)]
pub fn sh_coeffs_to_color(
    degree: u32,
    viewdir_x: f32,
    viewdir_y: f32,
    viewdir_z: f32,
    coeffs: &Tensor<f32>,
    base_idx: u32,
    out_r: &mut f32,
    out_g: &mut f32,
    out_b: &mut f32,
) {
    let mut color_r = SH_C0 * coeffs[base_idx];
    let mut color_g = SH_C0 * coeffs[base_idx + 1];
    let mut color_b = SH_C0 * coeffs[base_idx + 2];

    if degree >= 1 {
        let x = viewdir_x;
        let y = viewdir_y;
        let z = viewdir_z;
        let f1 = 0.48860251190292;

        let i0 = base_idx + 3;
        let i1 = i0 + 3;
        let i2 = i1 + 3;

        color_r += f1 * (-y * coeffs[i0] + z * coeffs[i1] - x * coeffs[i2]);
        color_g += f1 * (-y * coeffs[i0 + 1] + z * coeffs[i1 + 1] - x * coeffs[i2 + 1]);
        color_b += f1 * (-y * coeffs[i0 + 2] + z * coeffs[i1 + 2] - x * coeffs[i2 + 2]);
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

        color_r += psh4 * coeffs[i0]
            + psh5 * coeffs[i1]
            + psh6 * coeffs[i2]
            + psh7 * coeffs[i3]
            + psh8 * coeffs[i4];
        color_g += psh4 * coeffs[i0 + 1]
            + psh5 * coeffs[i1 + 1]
            + psh6 * coeffs[i2 + 1]
            + psh7 * coeffs[i3 + 1]
            + psh8 * coeffs[i4 + 1];
        color_b += psh4 * coeffs[i0 + 2]
            + psh5 * coeffs[i1 + 2]
            + psh6 * coeffs[i2 + 2]
            + psh7 * coeffs[i3 + 2]
            + psh8 * coeffs[i4 + 2];
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

        color_r += psh9 * coeffs[i0]
            + psh10 * coeffs[i1]
            + psh11 * coeffs[i2]
            + psh12 * coeffs[i3]
            + psh13 * coeffs[i4]
            + psh14 * coeffs[i5]
            + psh15 * coeffs[i6];
        color_g += psh9 * coeffs[i0 + 1]
            + psh10 * coeffs[i1 + 1]
            + psh11 * coeffs[i2 + 1]
            + psh12 * coeffs[i3 + 1]
            + psh13 * coeffs[i4 + 1]
            + psh14 * coeffs[i5 + 1]
            + psh15 * coeffs[i6 + 1];
        color_b += psh9 * coeffs[i0 + 2]
            + psh10 * coeffs[i1 + 2]
            + psh11 * coeffs[i2 + 2]
            + psh12 * coeffs[i3 + 2]
            + psh13 * coeffs[i4 + 2]
            + psh14 * coeffs[i5 + 2]
            + psh15 * coeffs[i6 + 2];
    }

    *out_r = color_r + 0.5;
    *out_g = color_g + 0.5;
    *out_b = color_b + 0.5;
}
