//! Backward-pass orchestration (C7-C9): turns a rendered image and its
//! ground truth into gradients on the raw optimizer parameters, replaying
//! the tile sort and projection `splat_render::render_forward` already did
//! via its [`splat_render::RenderAux`] handoff.

pub mod cubecl;
pub mod fixed_point;

use burn::tensor::{DType, Tensor};
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeBackend, CubeTensor, WgpuDevice, WgpuRuntime};
use splat_kernel::{calc_cube_count_1d, calc_cube_count_tiles, create_tensor, create_zeroed_tensor};
use splat_render::{Camera, RenderAux};

type Backend = CubeBackend<WgpuRuntime, f32, i32, u32>;

const PROJECTED_STRIDE: u32 = 9;
const LOSS_WORKGROUP: u32 = 256;
const PROJECT_WORKGROUP: u32 = 256;

/// Gradients on the raw (pre-activation) optimizer parameters, one entry per
/// Gaussian in the uncompacted parameter arrays `render_forward` was given
/// (spec §4.9), ready for `splat_train`'s Adam step to consume.
#[derive(Clone)]
pub struct SplatGrads {
    pub v_means: CubeTensor<WgpuRuntime>,
    pub v_quats: CubeTensor<WgpuRuntime>,
    pub v_log_scales: CubeTensor<WgpuRuntime>,
    pub v_raw_opacities: CubeTensor<WgpuRuntime>,
    pub v_sh_coeffs: CubeTensor<WgpuRuntime>,
}

fn upload_f32(data: &[f32], device: &WgpuDevice) -> CubeTensor<WgpuRuntime> {
    Tensor::<Backend, 1>::from_data(data, device).into_primitive()
}

/// Runs C7 (per-pixel loss gradient), C8 (reverse tile walk) and C9
/// (backward geometry) against a `render_forward` result.
///
/// `means`/`quats`/`log_scales` are the same flat device tensors passed to
/// `render_forward`; `aux` is that call's second return value and `pred` its
/// first. `max_radius_px` gates the optional radius-cap gradient clamp
/// (spec §4.9); pass `f32::INFINITY` to disable it.
#[allow(clippy::too_many_arguments)]
pub fn render_backward(
    camera: &Camera,
    total_splats: usize,
    means: CubeTensor<WgpuRuntime>,
    quats: CubeTensor<WgpuRuntime>,
    log_scales: CubeTensor<WgpuRuntime>,
    sh_degree: u32,
    aux: &RenderAux,
    pred: CubeTensor<WgpuRuntime>,
    target: CubeTensor<WgpuRuntime>,
    lambda_l1: f32,
    lambda_l2: f32,
    lambda_dssim: f32,
    c1: f32,
    c2: f32,
    max_radius_px: f32,
) -> SplatGrads {
    let device = means.device.clone();
    let client = means.client.clone();

    let img_w = camera.viewport.x;
    let img_h = camera.viewport.y;
    let num_pixels = (img_w as usize) * (img_h as usize);

    let v_output = create_tensor([num_pixels * 4], &device, DType::F32);
    {
        let _span = tracing::trace_span!("loss_grad").entered();
        let loss_uniforms = upload_f32(
            &[
                img_w as f32,
                img_h as f32,
                lambda_l1,
                lambda_l2,
                lambda_dssim,
                c1,
                c2,
            ],
            &device,
        );
        // SAFETY: `pix_id >= num_pixels` terminates before any buffer access.
        unsafe {
            cubecl::loss::loss_grad::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_pixels as u32, LOSS_WORKGROUP),
                CubeDim::new(LOSS_WORKGROUP, 1, 1),
                pred.as_tensor_arg(1),
                target.as_tensor_arg(1),
                v_output.as_tensor_arg(1),
                loss_uniforms.as_tensor_arg(1),
            );
        }
    }

    let v_projected = create_zeroed_tensor(
        [total_splats.max(1) * PROJECTED_STRIDE as usize],
        &device,
        DType::I32,
    );

    if total_splats > 0 {
        let tiles_x = aux.tile_bounds.x;
        let tiles_y = aux.tile_bounds.y;
        let _span = tracing::trace_span!("rasterize_backward").entered();
        let raster_uniforms = upload_f32(&[img_w as f32, img_h as f32, tiles_x as f32], &device);
        // SAFETY: `pix_x >= img_w || pix_y >= img_h` terminates before any
        // other access; the tile range it walks is the same one the forward
        // rasterizer consumed from `aux.tile_offsets`.
        unsafe {
            cubecl::rasterize_bwd::rasterize_backward::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_tiles(tiles_x, tiles_y),
                CubeDim::new(
                    splat_render::cubecl::helpers::TILE_WIDTH,
                    splat_render::cubecl::helpers::TILE_WIDTH,
                    1,
                ),
                aux.compact_gid_from_isect.as_tensor_arg(1),
                aux.tile_offsets.as_tensor_arg(1),
                aux.projected.as_tensor_arg(1),
                aux.transmittance.as_tensor_arg(1),
                aux.n_contrib.as_tensor_arg(1),
                v_output.as_tensor_arg(1),
                v_projected.as_tensor_arg(1),
                raster_uniforms.as_tensor_arg(1),
            );
        }
    }

    let v_means = create_zeroed_tensor([total_splats.max(1) * 3], &device, DType::F32);
    let v_quats = create_zeroed_tensor([total_splats.max(1) * 4], &device, DType::F32);
    let v_log_scales = create_zeroed_tensor([total_splats.max(1) * 3], &device, DType::F32);
    let v_raw_opacities = create_zeroed_tensor([total_splats.max(1)], &device, DType::F32);
    let v_sh_coeffs = create_zeroed_tensor([total_splats.max(1) * 48], &device, DType::F32);

    if total_splats > 0 {
        let view_rows = upload_f32(&camera.view_affine_rows(), &device);
        let pixel_center = camera.pixel_center();
        let project_uniforms = upload_f32(
            &[
                camera.focal.x,
                camera.focal.y,
                pixel_center.x,
                pixel_center.y,
                img_w as f32,
                img_h as f32,
                max_radius_px,
            ],
            &device,
        );
        let _span = tracing::trace_span!("project_backward").entered();
        // SAFETY: `compact_gid >= num_visible` terminates before any other
        // access; every write lands at `global_gid`, unique per compacted
        // thread since `global_from_compact_gid` has no duplicate entries.
        unsafe {
            cubecl::project_bwd::project_backward::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(total_splats as u32, PROJECT_WORKGROUP),
                CubeDim::new(PROJECT_WORKGROUP, 1, 1),
                aux.global_from_compact_gid.as_tensor_arg(1),
                aux.num_visible.as_tensor_arg(1),
                means.as_tensor_arg(1),
                quats.as_tensor_arg(1),
                log_scales.as_tensor_arg(1),
                ScalarArg::new(sh_degree),
                aux.projected.as_tensor_arg(1),
                v_projected.as_tensor_arg(1),
                view_rows.as_tensor_arg(1),
                project_uniforms.as_tensor_arg(1),
                v_means.as_tensor_arg(1),
                v_quats.as_tensor_arg(1),
                v_log_scales.as_tensor_arg(1),
                v_raw_opacities.as_tensor_arg(1),
                v_sh_coeffs.as_tensor_arg(1),
            );
        }
    }

    SplatGrads {
        v_means,
        v_quats,
        v_log_scales,
        v_raw_opacities,
        v_sh_coeffs,
    }
}

#[cfg(all(test, not(target_family = "wasm")))]
mod tests {
    use super::*;
    use glam::{Mat4, UVec2, Vec2, Vec3};

    fn identity_camera(w: u32, h: u32) -> Camera {
        Camera::new(
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y),
            Mat4::IDENTITY,
            Vec2::new(w as f32, h as f32),
            UVec2::new(w, h),
        )
    }

    #[test]
    fn empty_scene_backward_produces_zero_gradients() {
        let device = WgpuDevice::default();
        let camera = identity_camera(16, 16);
        let empty = |n| create_tensor([n], &device, DType::F32);
        let (pred, aux) = splat_render::render_forward(
            &camera,
            0,
            empty(0),
            empty(0),
            empty(0),
            empty(0),
            empty(0),
            0,
            Vec3::new(0.1, 0.2, 0.3),
        );
        let target = create_tensor([16 * 16 * 4], &device, DType::F32);
        let grads = render_backward(
            &camera,
            0,
            empty(0),
            empty(0),
            empty(0),
            0,
            &aux,
            pred,
            target,
            0.8,
            0.0,
            0.2,
            0.0001,
            0.0009,
            f32::INFINITY,
        );
        let v_means: Tensor<Backend, 1> = Tensor::from_primitive(grads.v_means);
        let data = v_means.into_data();
        let values = data.as_slice::<f32>().expect("f32 gradient");
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| *v == 0.0));
    }
}
