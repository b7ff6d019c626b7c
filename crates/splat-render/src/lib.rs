//! Forward-rendering orchestration (C4-C6): projects a batch of Gaussians
//! through a [`Camera`], sorts their tile intersections, and rasterizes the
//! resulting tiles into an RGBA image.
//!
//! Per-Gaussian tensors passed in here are flat f32/u32 device buffers with
//! a fixed stride per Gaussian (e.g. `means` is `total_splats*3` long), the
//! layout every kernel in [`cubecl`] indexes manually. `splat_store` defines
//! the packed f16 interchange format these are unpacked from on the host
//! side before upload; the GPU side never touches f16 bit patterns.

pub mod camera;
pub mod cubecl;

pub use camera::Camera;

use burn::tensor::{DType, Int, Tensor};
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeBackend, CubeTensor, WgpuDevice, WgpuRuntime};
use glam::Vec3;
use splat_kernel::{calc_cube_count_1d, calc_cube_count_tiles, create_tensor, create_zeroed_tensor};

type Backend = CubeBackend<WgpuRuntime, f32, i32, u32>;

const PROJECT_WORKGROUP: u32 = 256;

/// Everything the backward pass needs to replay rasterization without
/// redoing projection or the tile sort (spec §4.7).
#[derive(Clone)]
pub struct RenderAux {
    pub global_from_compact_gid: CubeTensor<WgpuRuntime>,
    pub projected: CubeTensor<WgpuRuntime>,
    pub num_visible: CubeTensor<WgpuRuntime>,
    pub compact_gid_from_isect: CubeTensor<WgpuRuntime>,
    pub tile_offsets: CubeTensor<WgpuRuntime>,
    pub transmittance: CubeTensor<WgpuRuntime>,
    pub n_contrib: CubeTensor<WgpuRuntime>,
    /// Tile-intersection count per compacted visible splat (compact-gid
    /// indexed, not global-gid), from C4's intersect prepass. A Gaussian
    /// with no corresponding visible entry, or whose entry here is 0, did
    /// not contribute to this view (spec §4.10's "invisible" skip test).
    pub tile_counts: CubeTensor<WgpuRuntime>,
    pub sh_degree: u32,
    pub background: Vec3,
    pub tile_bounds: glam::UVec2,
}

fn upload_f32(data: &[f32], device: &WgpuDevice) -> CubeTensor<WgpuRuntime> {
    Tensor::<Backend, 1>::from_data(data, device).into_primitive()
}

/// Sync readback of a single `i32` element. Unavoidable without building a
/// fully indirect-dispatch sort: we need the exact intersection count on the
/// host to size the sort's key/value buffers.
fn read_scalar_i32(tensor: &CubeTensor<WgpuRuntime>, idx: usize) -> i32 {
    let t: Tensor<Backend, 1, Int> = Tensor::from_primitive(tensor.clone());
    t.slice([idx..idx + 1]).into_scalar()
}

/// Render `total_splats` Gaussians through `camera` into an RGBA image.
///
/// `means`/`quats`/`log_scales`/`raw_opacities`/`sh_coeffs` are flat f32
/// device tensors (lengths `total_splats*{3,4,3,1,48}`), such as
/// `splat_train::scene::GpuScene` maintains as its working parameter set.
#[allow(clippy::too_many_arguments)]
pub fn render_forward(
    camera: &Camera,
    total_splats: usize,
    means: CubeTensor<WgpuRuntime>,
    quats: CubeTensor<WgpuRuntime>,
    log_scales: CubeTensor<WgpuRuntime>,
    raw_opacities: CubeTensor<WgpuRuntime>,
    sh_coeffs: CubeTensor<WgpuRuntime>,
    sh_degree: u32,
    background: Vec3,
) -> (CubeTensor<WgpuRuntime>, RenderAux) {
    let device = means.device.clone();
    let client = means.client.clone();

    let img_w = camera.viewport.x;
    let img_h = camera.viewport.y;
    let tile_bounds = camera.tile_bounds();
    let tiles_x = tile_bounds.x;
    let tiles_y = tile_bounds.y;
    let num_tiles = (tiles_x as usize) * (tiles_y as usize);

    let out_color = create_tensor([img_w as usize * img_h as usize * 4], &device, DType::F32);
    let transmittance = create_tensor([img_w as usize * img_h as usize], &device, DType::F32);
    let n_contrib = create_tensor([img_w as usize * img_h as usize], &device, DType::U32);

    let global_from_compact_gid = create_tensor([total_splats.max(1)], &device, DType::U32);
    let projected = create_tensor(
        [total_splats.max(1) * cubecl::project::PROJECTED_STRIDE as usize],
        &device,
        DType::F32,
    );
    let num_visible = create_zeroed_tensor([1], &device, DType::U32);

    if total_splats == 0 {
        let aux = RenderAux {
            global_from_compact_gid,
            projected,
            num_visible,
            compact_gid_from_isect: create_tensor([0], &device, DType::U32),
            tile_offsets: create_tensor([num_tiles + 1], &device, DType::U32),
            transmittance,
            n_contrib,
            tile_counts: create_tensor([0], &device, DType::I32),
            sh_degree,
            background,
            tile_bounds,
        };
        fill_background(&out_color, img_w, img_h, background);
        return (out_color, aux);
    }

    let depths = create_tensor([total_splats], &device, DType::F32);
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
        ],
        &device,
    );

    {
        let _span = tracing::trace_span!("project_forward").entered();
        // SAFETY: every write is bounds-checked against `total_splats` or
        // guarded by an early `terminate!()`; `num_visible`'s atomic write
        // target is a single in-bounds element.
        unsafe {
            cubecl::project::project_forward::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(total_splats as u32, PROJECT_WORKGROUP),
                CubeDim::new(PROJECT_WORKGROUP, 1, 1),
                means.as_tensor_arg(1),
                quats.as_tensor_arg(1),
                log_scales.as_tensor_arg(1),
                raw_opacities.as_tensor_arg(1),
                sh_coeffs.as_tensor_arg(1),
                ScalarArg::new(sh_degree),
                global_from_compact_gid.as_tensor_arg(1),
                depths.as_tensor_arg(1),
                projected.as_tensor_arg(1),
                num_visible.as_tensor_arg(1),
                ScalarArg::new(total_splats as u32),
                view_rows.as_tensor_arg(1),
                project_uniforms.as_tensor_arg(1),
            );
        }
    }

    let tile_counts = create_zeroed_tensor([total_splats], &device, DType::I32);
    {
        let _span = tracing::trace_span!("count_intersects").entered();
        // SAFETY: reads/writes only `compact_gid < total_splats`; terminates
        // early for `compact_gid >= num_visible`.
        unsafe {
            cubecl::intersect::count_intersects::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(total_splats as u32, PROJECT_WORKGROUP),
                CubeDim::new(PROJECT_WORKGROUP, 1, 1),
                projected.as_tensor_arg(1),
                num_visible.as_tensor_arg(1),
                tile_counts.as_tensor_arg(1),
                ScalarArg::new(tiles_x),
                ScalarArg::new(tiles_y),
            );
        }
    }

    let isect_offsets = splat_sum::prefix_sum_exclusive(&tile_counts)
        .expect("tile_counts length is bounded by scene size, within MAX_ELEMENTS");

    let last_offset = read_scalar_i32(&isect_offsets, total_splats - 1);
    let last_count = read_scalar_i32(&tile_counts, total_splats - 1);
    let total_isects = (last_offset + last_count).max(0) as usize;

    let keys = create_tensor([total_isects], &device, DType::U32);
    let values = create_tensor([total_isects], &device, DType::U32);

    if total_isects > 0 {
        let _span = tracing::trace_span!("emit_intersects").entered();
        // SAFETY: each in-range thread writes exactly the `num_tiles` slots
        // `isect_offsets[compact_gid]..+num_tiles` reserved for it by the
        // scan above; terminates early for `compact_gid >= num_visible`.
        unsafe {
            cubecl::intersect::emit_intersects::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(total_splats as u32, PROJECT_WORKGROUP),
                CubeDim::new(PROJECT_WORKGROUP, 1, 1),
                projected.as_tensor_arg(1),
                depths.as_tensor_arg(1),
                isect_offsets.as_tensor_arg(1),
                num_visible.as_tensor_arg(1),
                keys.as_tensor_arg(1),
                values.as_tensor_arg(1),
                ScalarArg::new(tiles_x),
                ScalarArg::new(tiles_y),
            );
        }
    }

    let tile_id_bits = 32 - (num_tiles.max(1) as u32).leading_zeros();
    let sort_bits = (16 + tile_id_bits).min(32);
    let (sorted_keys, compact_gid_from_isect) = tracing::trace_span!("tile sort")
        .in_scope(|| splat_sort::radix_sort(keys, values, total_isects, sort_bits));

    let tile_offsets = create_tensor([num_tiles + 1], &device, DType::U32);
    {
        let _span = tracing::trace_span!("tile_ranges").entered();
        // SAFETY: writes only indices `[0, num_tiles]`.
        unsafe {
            cubecl::tile_range::init_tile_offsets::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_tiles as u32 + 1, 256),
                CubeDim::new(256, 1, 1),
                tile_offsets.as_tensor_arg(1),
                ScalarArg::new(num_tiles as u32),
                ScalarArg::new(total_isects as u32),
            );
        }
        // SAFETY: every in-range thread performs one atomicMin on a single
        // `tile_offsets` slot derived from its own sorted key.
        unsafe {
            cubecl::tile_range::scan_tile_starts::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(total_isects.max(1) as u32, 256),
                CubeDim::new(256, 1, 1),
                sorted_keys.as_tensor_arg(1),
                tile_offsets.as_tensor_arg(1),
                ScalarArg::new(total_isects as u32),
            );
        }
        // SAFETY: single-thread sequential backward fill over `num_tiles`
        // entries.
        unsafe {
            cubecl::tile_range::fill_empty_tile_starts::launch_unchecked::<WgpuRuntime>(
                &client,
                burn_cubecl::cubecl::CubeCount::Static(1, 1, 1),
                CubeDim::new(1, 1, 1),
                tile_offsets.as_tensor_arg(1),
                ScalarArg::new(num_tiles as u32),
            );
        }
    }

    let raster_uniforms = upload_f32(
        &[
            img_w as f32,
            img_h as f32,
            tiles_x as f32,
            background.x,
            background.y,
            background.z,
        ],
        &device,
    );
    {
        let _span = tracing::trace_span!("rasterize_forward").entered();
        // SAFETY: `inside` guards every write against `pix_x < img_w &&
        // pix_y < img_h`; shared memory is sized for exactly `TILE_SIZE`
        // batched splats.
        unsafe {
            cubecl::rasterize::rasterize_forward::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_tiles(tiles_x, tiles_y),
                CubeDim::new(cubecl::helpers::TILE_WIDTH, cubecl::helpers::TILE_WIDTH, 1),
                compact_gid_from_isect.as_tensor_arg(1),
                tile_offsets.as_tensor_arg(1),
                projected.as_tensor_arg(1),
                out_color.as_tensor_arg(1),
                transmittance.as_tensor_arg(1),
                n_contrib.as_tensor_arg(1),
                raster_uniforms.as_tensor_arg(1),
            );
        }
    }

    let aux = RenderAux {
        global_from_compact_gid,
        projected,
        num_visible,
        compact_gid_from_isect,
        tile_offsets,
        transmittance,
        n_contrib,
        tile_counts,
        sh_degree,
        background,
        tile_bounds,
    };
    (out_color, aux)
}

fn fill_background(out_color: &CubeTensor<WgpuRuntime>, img_w: u32, img_h: u32, background: Vec3) {
    let device = out_color.device.clone();
    let client = out_color.client.clone();
    let fill = upload_f32(&[background.x, background.y, background.z, 0.0], &device);
    // SAFETY: writes exactly `img_w*img_h` repeats of the 4-float fill value.
    unsafe {
        cubecl::rasterize::fill_solid::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(img_w * img_h, 256),
            CubeDim::new(256, 1, 1),
            out_color.as_tensor_arg(1),
            fill.as_tensor_arg(1),
            ScalarArg::new(img_w * img_h),
        );
    }
}

#[cfg(all(test, not(target_family = "wasm")))]
mod tests {
    use super::*;
    use glam::{Mat4, UVec2, Vec2};

    fn identity_camera(w: u32, h: u32) -> Camera {
        Camera::new(
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y),
            Mat4::IDENTITY,
            Vec2::new(w as f32, h as f32),
            UVec2::new(w, h),
        )
    }

    #[test]
    fn renders_empty_scene_to_background() {
        let device = WgpuDevice::default();
        let camera = identity_camera(32, 32);
        let empty = |n| create_tensor([n], &device, DType::F32);
        let (img, aux) = render_forward(
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
        let out: Tensor<Backend, 1> = Tensor::from_primitive(img);
        let data = out.into_data();
        let pixels = data.as_slice::<f32>().expect("f32 image");
        assert_eq!(pixels.len(), 32 * 32 * 4);
        assert!((pixels[0] - 0.1).abs() < 1.0e-5);
        assert!((pixels[1] - 0.2).abs() < 1.0e-5);
        assert!((pixels[2] - 0.3).abs() < 1.0e-5);
        assert_eq!(aux.sh_degree, 0);
    }
}
