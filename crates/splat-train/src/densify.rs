//! Host orchestration for C12: decide an action per Gaussian, scan counts
//! into output offsets twice (once to size the buffers, once after capping
//! at `max_out_points`), then scatter every parameter and optimizer-state
//! group into a freshly sized [`GpuScene`] (spec §4.12).

use crate::config::TrainConfig;
use crate::cubecl::densify::{cap, decide, scatter_optimizer_state, scatter_params};
use crate::scene::{GpuScene, ParamGroup, read_scalar_i32, upload_f32};

use burn::tensor::DType;
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeTensor, WgpuDevice, WgpuRuntime};
use splat_kernel::{calc_cube_count_1d, create_tensor, create_zeroed_tensor};

const DENSIFY_WORKGROUP: u32 = 256;

/// Per-Gaussian f32 footprint across every buffer a point occupies: each of
/// the five parameter groups (widths 3+4+3+1+48 = 59) carries its own value
/// plus two Adam moments, so `59 * 3` floats at 4 bytes apiece.
const BYTES_PER_POINT: u64 = 59 * 3 * 4;

fn scatter_group(
    client: &burn_cubecl::cubecl::prelude::ComputeClient<
        <WgpuRuntime as burn_cubecl::cubecl::Runtime>::Server,
        <WgpuRuntime as burn_cubecl::cubecl::Runtime>::Channel,
    >,
    group: &ParamGroup,
    src_index: &CubeTensor<WgpuRuntime>,
    is_new: &CubeTensor<WgpuRuntime>,
    n_out: usize,
    reset_new_state: bool,
    device: &WgpuDevice,
) -> ParamGroup {
    let width = group.width;
    let shape = [n_out * width as usize];
    let m_out = create_tensor(shape, device, DType::F32);
    let v_out = create_tensor(shape, device, DType::F32);
    // SAFETY: every thread is bounds-checked against `n_out`; the inner
    // width loop stays within its own `[dst*width, dst*width+width)` range.
    unsafe {
        scatter_optimizer_state::launch_unchecked::<WgpuRuntime>(
            client,
            calc_cube_count_1d(n_out as u32, DENSIFY_WORKGROUP),
            CubeDim::new(DENSIFY_WORKGROUP, 1, 1),
            group.m.as_tensor_arg(1),
            group.v.as_tensor_arg(1),
            src_index.as_tensor_arg(1),
            is_new.as_tensor_arg(1),
            ScalarArg::new(width),
            ScalarArg::new(n_out as u32),
            ScalarArg::new(u32::from(reset_new_state)),
            m_out.as_tensor_arg(1),
            v_out.as_tensor_arg(1),
        );
    }
    ParamGroup {
        width,
        // The param buffer itself is rebuilt by `scatter_params`, not here;
        // this placeholder is overwritten by the caller.
        param: group.param.clone(),
        m: m_out,
        v: v_out,
    }
}

/// Runs the full densify/prune pass over `scene`, using `metric_counts`
/// (C11's averaged per-Gaussian influence tally) to decide which Gaussians
/// get pruned, cloned, or split. Returns a new scene with at most
/// `cfg.max_new_points_per_step` more Gaussians than `scene` had survivors
/// for. `seed` drives the stateless CLONE/SPLIT jitter hash and should vary
/// between densify cycles (the orchestrator uses its iteration count).
pub fn densify(
    scene: &GpuScene,
    metric_counts: &CubeTensor<WgpuRuntime>,
    cfg: &TrainConfig,
    seed: u32,
) -> GpuScene {
    let n = scene.n;
    if n == 0 {
        return GpuScene::empty(scene.sh_degree, &scene.means.param.device.clone());
    }
    let device = scene.means.param.device.clone();
    let client = scene.means.param.client.clone();

    let action = create_tensor([n], &device, DType::U32);
    let count = create_tensor([n], &device, DType::I32);
    let decide_uniforms = upload_f32(&[cfg.prune_opacity, cfg.split_scale_threshold], &device);
    // SAFETY: bounds-checked against `n`; each thread writes its own
    // `action[gid]`/`count[gid]` slot.
    unsafe {
        decide::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(n as u32, DENSIFY_WORKGROUP),
            CubeDim::new(DENSIFY_WORKGROUP, 1, 1),
            scene.raw_opacities.param.as_tensor_arg(1),
            scene.log_scales.param.as_tensor_arg(1),
            metric_counts.as_tensor_arg(1),
            ScalarArg::new(n as u32),
            decide_uniforms.as_tensor_arg(1),
            ScalarArg::new(cfg.clone_threshold_count),
            action.as_tensor_arg(1),
            count.as_tensor_arg(1),
        );
    }

    let offsets = splat_sum::prefix_sum_exclusive(&count).expect("decide output is bounded by scene size");

    let step_cap = (cfg.max_new_points_per_step as usize).saturating_add(n);
    let byte_cap = (cfg.max_buffer_bytes / BYTES_PER_POINT) as usize;
    let max_out_points = step_cap.min(byte_cap).min(i32::MAX as usize) as i32;
    // SAFETY: bounds-checked against `n`; each thread only rewrites its own
    // `action[gid]`/`count[gid]` entries.
    unsafe {
        cap::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(n as u32, DENSIFY_WORKGROUP),
            CubeDim::new(DENSIFY_WORKGROUP, 1, 1),
            offsets.as_tensor_arg(1),
            ScalarArg::new(n as u32),
            ScalarArg::new(max_out_points),
            action.as_tensor_arg(1),
            count.as_tensor_arg(1),
        );
    }

    let offsets = splat_sum::prefix_sum_exclusive(&count).expect("capped output is bounded by scene size");
    let last_offset = read_scalar_i32(&offsets, n - 1);
    let last_count = read_scalar_i32(&count, n - 1);
    let n_out = (last_offset + last_count).max(0) as usize;

    if n_out == 0 {
        return GpuScene::empty(scene.sh_degree, &device);
    }

    let means_out = create_tensor([n_out * 3], &device, DType::F32);
    let quats_out = create_tensor([n_out * 4], &device, DType::F32);
    let log_scales_out = create_tensor([n_out * 3], &device, DType::F32);
    let raw_opacities_out = create_zeroed_tensor([n_out], &device, DType::F32);
    let sh_coeffs_out = create_tensor([n_out * 48], &device, DType::F32);
    let src_index = create_tensor([n_out], &device, DType::U32);
    let is_new = create_tensor([n_out], &device, DType::U32);

    // SAFETY: terminates for any source index whose `count == 0`; every
    // write lands in `[offset, offset + count)`, a disjoint range per
    // source index guaranteed by the preceding exclusive scan.
    unsafe {
        scatter_params::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(n as u32, DENSIFY_WORKGROUP),
            CubeDim::new(DENSIFY_WORKGROUP, 1, 1),
            scene.means.param.as_tensor_arg(1),
            scene.quats.param.as_tensor_arg(1),
            scene.log_scales.param.as_tensor_arg(1),
            scene.raw_opacities.param.as_tensor_arg(1),
            scene.sh_coeffs.param.as_tensor_arg(1),
            action.as_tensor_arg(1),
            count.as_tensor_arg(1),
            offsets.as_tensor_arg(1),
            ScalarArg::new(n as u32),
            ScalarArg::new(seed),
            means_out.as_tensor_arg(1),
            quats_out.as_tensor_arg(1),
            log_scales_out.as_tensor_arg(1),
            raw_opacities_out.as_tensor_arg(1),
            sh_coeffs_out.as_tensor_arg(1),
            src_index.as_tensor_arg(1),
            is_new.as_tensor_arg(1),
        );
    }

    let reset = cfg.reset_new_state;
    let mut means = scatter_group(&client, &scene.means, &src_index, &is_new, n_out, reset, &device);
    means.param = means_out;
    let mut quats = scatter_group(&client, &scene.quats, &src_index, &is_new, n_out, reset, &device);
    quats.param = quats_out;
    let mut log_scales = scatter_group(&client, &scene.log_scales, &src_index, &is_new, n_out, reset, &device);
    log_scales.param = log_scales_out;
    let mut raw_opacities =
        scatter_group(&client, &scene.raw_opacities, &src_index, &is_new, n_out, reset, &device);
    raw_opacities.param = raw_opacities_out;
    let mut sh_coeffs = scatter_group(&client, &scene.sh_coeffs, &src_index, &is_new, n_out, reset, &device);
    sh_coeffs.param = sh_coeffs_out;

    GpuScene {
        n: n_out,
        sh_degree: scene.sh_degree,
        means,
        quats,
        log_scales,
        raw_opacities,
        sh_coeffs,
    }
}
