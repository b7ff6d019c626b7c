//! Host orchestration for C10's Adam half (the repack half lives on
//! `GpuScene::repack`). Runs one generic Adam kernel launch per parameter
//! group, then renormalizes rotation.

use crate::config::TrainConfig;
use crate::cubecl::adam::{adam_step, mark_visible, renormalize_quat};
use crate::scene::{GpuScene, ParamGroup, upload_f32};

use burn::tensor::DType;
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeTensor, WgpuRuntime};
use splat_kernel::{calc_cube_count_1d, create_zeroed_tensor};
use splat_render::RenderAux;
use splat_render_bwd::SplatGrads;

const ADAM_WORKGROUP: u32 = 256;

#[allow(clippy::too_many_arguments)]
fn run_group(
    client: &burn_cubecl::cubecl::prelude::ComputeClient<
        <WgpuRuntime as burn_cubecl::cubecl::Runtime>::Server,
        <WgpuRuntime as burn_cubecl::cubecl::Runtime>::Channel,
    >,
    device: &burn_wgpu::WgpuDevice,
    group: &ParamGroup,
    grad: &CubeTensor<WgpuRuntime>,
    visible: &CubeTensor<WgpuRuntime>,
    n: usize,
    lr: f32,
    cfg: &TrainConfig,
) {
    let uniforms = upload_f32(&[lr, cfg.beta1, cfg.beta2, cfg.eps], device);
    // SAFETY: every thread is bounds-checked against `n` and skips invisible
    // Gaussians before touching `param`/`m`/`v`; the inner width loop stays
    // within `[gid*width, gid*width+width)`, unique per thread.
    unsafe {
        adam_step::launch_unchecked::<WgpuRuntime>(
            client,
            calc_cube_count_1d(n as u32, ADAM_WORKGROUP),
            CubeDim::new(ADAM_WORKGROUP, 1, 1),
            group.param.as_tensor_arg(1),
            group.m.as_tensor_arg(1),
            group.v.as_tensor_arg(1),
            grad.as_tensor_arg(1),
            visible.as_tensor_arg(1),
            ScalarArg::new(group.width),
            ScalarArg::new(n as u32),
            uniforms.as_tensor_arg(1),
        );
    }
}

/// Runs C10's Adam step over every parameter group in `scene`, using
/// `grads` from `splat_render_bwd::render_backward` and `aux`'s tile
/// intersection counts to skip Gaussians invisible this iteration.
pub fn adam_step_scene(scene: &GpuScene, grads: &SplatGrads, aux: &RenderAux, cfg: &TrainConfig) {
    let n = scene.n;
    if n == 0 {
        return;
    }
    let device = scene.means.param.device.clone();
    let client = scene.means.param.client.clone();

    let visible = create_zeroed_tensor([n], &device, DType::U32);
    let num_entries = aux.tile_counts.shape.num_elements();
    if num_entries > 0 {
        let _span = tracing::trace_span!("mark_visible").entered();
        // SAFETY: terminates for `compact_gid >= num_visible`; every write
        // lands at a distinct global index from `global_from_compact_gid`.
        unsafe {
            mark_visible::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_entries as u32, ADAM_WORKGROUP),
                CubeDim::new(ADAM_WORKGROUP, 1, 1),
                aux.global_from_compact_gid.as_tensor_arg(1),
                aux.num_visible.as_tensor_arg(1),
                aux.tile_counts.as_tensor_arg(1),
                visible.as_tensor_arg(1),
            );
        }
    }

    let _span = tracing::trace_span!("adam_step").entered();
    run_group(&client, &device, &scene.means, &grads.v_means, &visible, n, cfg.lr_pos, cfg);
    run_group(&client, &device, &scene.quats, &grads.v_quats, &visible, n, cfg.lr_rot, cfg);
    run_group(
        &client,
        &device,
        &scene.log_scales,
        &grads.v_log_scales,
        &visible,
        n,
        cfg.lr_scale,
        cfg,
    );
    run_group(
        &client,
        &device,
        &scene.raw_opacities,
        &grads.v_raw_opacities,
        &visible,
        n,
        cfg.lr_opacity,
        cfg,
    );
    run_group(&client, &device, &scene.sh_coeffs, &grads.v_sh_coeffs, &visible, n, cfg.lr_color, cfg);

    // SAFETY: bounds-checked against `n`; each thread renormalizes its own
    // 4-float quaternion slot.
    unsafe {
        renormalize_quat::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(n as u32, ADAM_WORKGROUP),
            CubeDim::new(ADAM_WORKGROUP, 1, 1),
            scene.quats.param.as_tensor_arg(1),
            ScalarArg::new(n as u32),
        );
    }
}
