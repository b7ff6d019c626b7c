//! Densify/prune compactor (C12): decide an action per Gaussian, scan counts
//! into offsets, cap against a byte budget, re-scan, then scatter the
//! Gaussian/SH parameters and every optimizer-state group into a fresh,
//! possibly resized, set of buffers (spec §4.12).
//!
//! Per-point randomness for CLONE/SPLIT jitter comes from a stateless hash
//! of `(src_index, dst_index, seed)`, never a host RNG (spec §9) — a
//! Gaussian sample is approximated as the sum of twelve hashed uniforms
//! (Irwin-Hall), which has unit variance with no transcendental inverse CDF.

use splat_render::cubecl::helpers::sigmoid;

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

pub const ACTION_KEEP: u32 = 0;
pub const ACTION_CLONE: u32 = 1;
pub const ACTION_SPLIT: u32 = 2;
pub const ACTION_PRUNE: u32 = 3;

/// `ln(1.6)`: child log-scale offset after a SPLIT (spec §4.12).
const LN_1_6: f32 = 0.470_003_63;

/// Matches `splat_store::opacity_logit_clamp()` (`ln(0.8/0.2)`); duplicated
/// here because cube kernels cannot call host `f32::ln` helpers from
/// another crate.
const OPACITY_LOGIT_CLAMP: f32 = 1.386_294_4;

#[cube]
fn hash_u32(x: u32) -> u32 {
    let mut h = x;
    h = h ^ (h >> 16u32);
    h *= 0x7feb_352du32;
    h = h ^ (h >> 15u32);
    h *= 0x846c_a68bu32;
    h = h ^ (h >> 16u32);
    h
}

#[cube]
fn hash_channel(src: u32, dst: u32, seed: u32, channel: u32, sub: u32) -> u32 {
    let salted = channel * 0x9e37_79b9u32 + sub;
    hash_u32(src ^ hash_u32(dst ^ hash_u32(seed ^ hash_u32(salted))))
}

#[cube]
fn uniform01(h: u32) -> f32 {
    f32::cast_from(h) / 4_294_967_295.0
}

#[cube]
fn uniform_sample3(src: u32, dst: u32, seed: u32) -> (f32, f32, f32) {
    let x = uniform01(hash_channel(src, dst, seed, 0u32, 0u32)) * 2.0 - 1.0;
    let y = uniform01(hash_channel(src, dst, seed, 1u32, 0u32)) * 2.0 - 1.0;
    let z = uniform01(hash_channel(src, dst, seed, 2u32, 0u32)) * 2.0 - 1.0;
    (x, y, z)
}

#[cube]
fn normal_axis(src: u32, dst: u32, seed: u32, channel: u32) -> f32 {
    let mut sum = 0.0f32;
    let mut i = 0u32;
    while i < 12u32 {
        sum += uniform01(hash_channel(src, dst, seed, channel, i));
        i += 1u32;
    }
    sum - 6.0
}

#[cube]
fn normal_sample3(src: u32, dst: u32, seed: u32) -> (f32, f32, f32) {
    (
        normal_axis(src, dst, seed, 0u32),
        normal_axis(src, dst, seed, 1u32),
        normal_axis(src, dst, seed, 2u32),
    )
}

#[cube]
fn quat_rotate(qw: f32, qx: f32, qy: f32, qz: f32, vx: f32, vy: f32, vz: f32) -> (f32, f32, f32) {
    let cx = qy * vz - qz * vy;
    let cy = qz * vx - qx * vz;
    let cz = qx * vy - qy * vx;
    let tx = vx + 2.0 * qw * cx;
    let ty = vy + 2.0 * qw * cy;
    let tz = vz + 2.0 * qw * cz;
    let dx = qy * cz - qz * cy;
    let dy = qz * cx - qx * cz;
    let dz = qx * cy - qy * cx;
    (tx + 2.0 * dx, ty + 2.0 * dy, tz + 2.0 * dz)
}

/// Pass 1: per-Gaussian KEEP/CLONE/SPLIT/PRUNE decision and output count
/// (spec §4.12's decide stage).
#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn decide(
    raw_opacities: &Tensor<f32>,
    log_scales: &Tensor<f32>,
    metric_counts: &Tensor<u32>,
    n: u32,
    uniforms: &Tensor<f32>, // [prune_opacity, split_scale_threshold]
    clone_threshold: u32,
    out_action: &mut Tensor<u32>,
    out_count: &mut Tensor<i32>,
) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    let prune_opacity = uniforms[0];
    let split_scale_threshold = uniforms[1];

    let opacity = sigmoid(raw_opacities[gid]);
    if opacity < prune_opacity {
        out_action[gid] = ACTION_PRUNE;
        out_count[gid] = 0i32;
    } else if metric_counts[gid] >= clone_threshold {
        let base = gid * 3;
        let sx = f32::exp(log_scales[base]);
        let sy = f32::exp(log_scales[base + 1]);
        let sz = f32::exp(log_scales[base + 2]);
        let max_scale = f32::max(sx, f32::max(sy, sz));
        if max_scale >= split_scale_threshold {
            out_action[gid] = ACTION_SPLIT;
        } else {
            out_action[gid] = ACTION_CLONE;
        }
        out_count[gid] = 2i32;
    } else {
        out_action[gid] = ACTION_KEEP;
        out_count[gid] = 1i32;
    }
}

/// Pass between scan 1 and scan 2: enforces `max_out_points`, degrading the
/// tail to PRUNE/KEEP so the scatter below can never overflow its output
/// buffers (spec §4.12's cap stage).
#[cube(launch_unchecked)]
pub fn cap(
    offsets: &Tensor<i32>,
    n: u32,
    max_out_points: i32,
    action: &mut Tensor<u32>,
    count: &mut Tensor<i32>,
) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    let offset = offsets[gid];
    let mut c = count[gid];
    if offset >= max_out_points {
        c = 0i32;
        action[gid] = ACTION_PRUNE;
    } else if c == 2i32 && offset == max_out_points - 1i32 {
        c = 1i32;
        action[gid] = ACTION_KEEP;
    }
    count[gid] = c;
}

/// Scatter pass 1 of 5: Gaussian + SH parameters. Writes 1 or 2 output
/// slots per source index (per the final, capped `offsets`/`count`), with
/// CLONE's second slot and both SPLIT slots receiving stateless-hash
/// position jitter. Also records, for every output slot, which source index
/// it came from and whether it counts as "new" — the optimizer-state
/// scatter passes below need both.
#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn scatter_params(
    means_in: &Tensor<f32>,
    quats_in: &Tensor<f32>,
    log_scales_in: &Tensor<f32>,
    raw_opacities_in: &Tensor<f32>,
    sh_coeffs_in: &Tensor<f32>,
    action: &Tensor<u32>,
    count: &Tensor<i32>,
    offsets: &Tensor<i32>,
    n: u32,
    seed: u32,
    means_out: &mut Tensor<f32>,
    quats_out: &mut Tensor<f32>,
    log_scales_out: &mut Tensor<f32>,
    raw_opacities_out: &mut Tensor<f32>,
    sh_coeffs_out: &mut Tensor<f32>,
    out_src_index: &mut Tensor<u32>,
    out_is_new: &mut Tensor<u32>,
) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    let c = count[gid];
    if c == 0i32 {
        terminate!();
    }
    let act = action[gid];
    let offset = u32::cast_from(offsets[gid]);

    let pos_base = gid * 3;
    let px = means_in[pos_base];
    let py = means_in[pos_base + 1];
    let pz = means_in[pos_base + 2];
    let quat_base = gid * 4;
    let qw = quats_in[quat_base];
    let qx = quats_in[quat_base + 1];
    let qy = quats_in[quat_base + 2];
    let qz = quats_in[quat_base + 3];
    let lsx = log_scales_in[pos_base];
    let lsy = log_scales_in[pos_base + 1];
    let lsz = log_scales_in[pos_base + 2];
    let sx = f32::exp(lsx);
    let sy = f32::exp(lsy);
    let sz = f32::exp(lsz);
    let opacity_logit = f32::min(raw_opacities_in[gid], OPACITY_LOGIT_CLAMP);

    // Slot 0: verbatim for KEEP/CLONE, the "minus" SPLIT child otherwise.
    {
        let dst = offset;
        let is_split = act == ACTION_SPLIT;
        let mut out_px = px;
        let mut out_py = py;
        let mut out_pz = pz;
        let mut out_lsx = lsx;
        let mut out_lsy = lsy;
        let mut out_lsz = lsz;
        if is_split {
            let sample = normal_sample3(gid, dst, seed);
            let jitter = quat_rotate(qw, qx, qy, qz, sx * sample.0, sy * sample.1, sz * sample.2);
            out_px -= 0.5 * jitter.0;
            out_py -= 0.5 * jitter.1;
            out_pz -= 0.5 * jitter.2;
            out_lsx -= LN_1_6;
            out_lsy -= LN_1_6;
            out_lsz -= LN_1_6;
        }
        means_out[dst * 3] = out_px;
        means_out[dst * 3 + 1] = out_py;
        means_out[dst * 3 + 2] = out_pz;
        quats_out[dst * 4] = qw;
        quats_out[dst * 4 + 1] = qx;
        quats_out[dst * 4 + 2] = qy;
        quats_out[dst * 4 + 3] = qz;
        log_scales_out[dst * 3] = out_lsx;
        log_scales_out[dst * 3 + 1] = out_lsy;
        log_scales_out[dst * 3 + 2] = out_lsz;
        raw_opacities_out[dst] = opacity_logit;
        let mut k = 0u32;
        while k < 48u32 {
            sh_coeffs_out[dst * 48 + k] = sh_coeffs_in[gid * 48 + k];
            k += 1u32;
        }
        out_src_index[dst] = gid;
        out_is_new[dst] = u32::cast_from(is_split);
    }

    if c == 2i32 {
        let dst = offset + 1u32;
        let is_split = act == ACTION_SPLIT;
        let mut out_px = px;
        let mut out_py = py;
        let mut out_pz = pz;
        let mut out_lsx = lsx;
        let mut out_lsy = lsy;
        let mut out_lsz = lsz;
        if is_split {
            let sample = normal_sample3(gid, dst, seed);
            let jitter = quat_rotate(qw, qx, qy, qz, sx * sample.0, sy * sample.1, sz * sample.2);
            out_px += 0.5 * jitter.0;
            out_py += 0.5 * jitter.1;
            out_pz += 0.5 * jitter.2;
            out_lsx -= LN_1_6;
            out_lsy -= LN_1_6;
            out_lsz -= LN_1_6;
        } else {
            // CLONE slot 1.
            let sample = uniform_sample3(gid, dst, seed);
            let jitter = quat_rotate(qw, qx, qy, qz, sx * sample.0, sy * sample.1, sz * sample.2);
            out_px += 0.25 * jitter.0;
            out_py += 0.25 * jitter.1;
            out_pz += 0.25 * jitter.2;
        }
        means_out[dst * 3] = out_px;
        means_out[dst * 3 + 1] = out_py;
        means_out[dst * 3 + 2] = out_pz;
        quats_out[dst * 4] = qw;
        quats_out[dst * 4 + 1] = qx;
        quats_out[dst * 4 + 2] = qy;
        quats_out[dst * 4 + 3] = qz;
        log_scales_out[dst * 3] = out_lsx;
        log_scales_out[dst * 3 + 1] = out_lsy;
        log_scales_out[dst * 3 + 2] = out_lsz;
        raw_opacities_out[dst] = opacity_logit;
        let mut k = 0u32;
        while k < 48u32 {
            sh_coeffs_out[dst * 48 + k] = sh_coeffs_in[gid * 48 + k];
            k += 1u32;
        }
        out_src_index[dst] = gid;
        out_is_new[dst] = 1u32;
    }
}

/// Scatter passes 2-5: one call per optimizer-state group (pos, rot, scale,
/// opacity, SH), generic over the group's per-Gaussian width. Copies
/// `(m, v)` from the recorded source index, zeroing both when the slot is
/// new and `reset_new_state` is set.
#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn scatter_optimizer_state(
    m_in: &Tensor<f32>,
    v_in: &Tensor<f32>,
    src_index: &Tensor<u32>,
    is_new: &Tensor<u32>,
    width: u32,
    n_out: u32,
    reset_new_state: u32,
    m_out: &mut Tensor<f32>,
    v_out: &mut Tensor<f32>,
) {
    let dst = ABSOLUTE_POS;
    if dst >= n_out {
        terminate!();
    }
    let reset = is_new[dst] == 1u32 && reset_new_state == 1u32;
    let src = src_index[dst];
    let mut k = 0u32;
    while k < width {
        if reset {
            m_out[dst * width + k] = 0.0;
            v_out[dst * width + k] = 0.0;
        } else {
            m_out[dst * width + k] = m_in[src * width + k];
            v_out[dst * width + k] = v_in[src * width + k];
        }
        k += 1u32;
    }
}
