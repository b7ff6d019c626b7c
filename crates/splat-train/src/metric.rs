//! Host orchestration for C11's per-Gaussian influence metric: runs the
//! four device passes across a handful of views and averages the result
//! (spec §4.11).

use crate::scene::upload_f32;

use burn::tensor::DType;
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeTensor, WgpuDevice, WgpuRuntime};
use splat_kernel::{calc_cube_count_1d, calc_cube_count_tiles, create_tensor, create_zeroed_tensor};
use splat_render::RenderAux;

use crate::cubecl::metric::{
    average_counts, error_pass, init_min_max, metric_count_pass, reduce_min_max, threshold_pass,
};

const METRIC_WORKGROUP: u32 = 256;

/// Accumulates each view's C11 pass into a running per-Gaussian count, then
/// divides by the number of views accumulated so far.
pub struct MetricAccumulator {
    n: usize,
    views_accumulated: u32,
    counts: CubeTensor<WgpuRuntime>,
    device: WgpuDevice,
}

impl MetricAccumulator {
    pub fn new(n: usize, device: &WgpuDevice) -> Self {
        Self {
            n,
            views_accumulated: 0,
            counts: create_zeroed_tensor([n.max(1)], device, DType::U32),
            device: device.clone(),
        }
    }

    /// Runs the four device passes for a single rendered view and folds the
    /// result into the running count.
    pub fn accumulate_view(
        &mut self,
        pred: &CubeTensor<WgpuRuntime>,
        target: &CubeTensor<WgpuRuntime>,
        aux: &RenderAux,
        img_w: u32,
        img_h: u32,
        threshold: f32,
    ) {
        let client = pred.client.clone();
        let num_pixels = (img_w as usize) * (img_h as usize);
        if num_pixels == 0 || self.n == 0 {
            return;
        }

        let err_buf = create_tensor([num_pixels], &self.device, DType::U32);
        // SAFETY: every thread is bounds-checked against `num_pixels`.
        unsafe {
            error_pass::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_pixels as u32, METRIC_WORKGROUP),
                CubeDim::new(METRIC_WORKGROUP, 1, 1),
                pred.as_tensor_arg(1),
                target.as_tensor_arg(1),
                ScalarArg::new(num_pixels as u32),
                err_buf.as_tensor_arg(1),
            );
        }

        let min_max = create_zeroed_tensor([2], &self.device, DType::U32);
        // SAFETY: single thread, runs before any other thread touches
        // `min_max`.
        unsafe {
            init_min_max::launch_unchecked::<WgpuRuntime>(
                &client,
                CubeDim::new(1, 1, 1),
                CubeDim::new(1, 1, 1),
                min_max.as_tensor_arg(1),
            );
        }
        // SAFETY: atomic min/max per pixel, bounds-checked against
        // `num_pixels`.
        unsafe {
            reduce_min_max::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_pixels as u32, METRIC_WORKGROUP),
                CubeDim::new(METRIC_WORKGROUP, 1, 1),
                err_buf.as_tensor_arg(1),
                ScalarArg::new(num_pixels as u32),
                min_max.as_tensor_arg(1),
            );
        }

        let metric_map = create_tensor([num_pixels], &self.device, DType::U32);
        let threshold_uniforms = upload_f32(&[threshold], &self.device);
        // SAFETY: bounds-checked against `num_pixels`, reads `min_max` only
        // after the reduction above has completed.
        unsafe {
            threshold_pass::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(num_pixels as u32, METRIC_WORKGROUP),
                CubeDim::new(METRIC_WORKGROUP, 1, 1),
                err_buf.as_tensor_arg(1),
                min_max.as_tensor_arg(1),
                ScalarArg::new(num_pixels as u32),
                threshold_uniforms.as_tensor_arg(1),
                metric_map.as_tensor_arg(1),
            );
        }

        let tiles_x = aux.tile_bounds.x;
        let tiles_y = aux.tile_bounds.y;
        let pass_uniforms = upload_f32(
            &[img_w as f32, img_h as f32, tiles_x as f32],
            &self.device,
        );
        // SAFETY: every thread maps to a distinct pixel via `map_1d_to_2d`
        // and is bounds-checked against `img_w`/`img_h` before touching
        // shared tile-range state; `metric_counts` updates go through
        // `Atomic::add`.
        unsafe {
            metric_count_pass::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_tiles(tiles_x, tiles_y),
                CubeDim::new(16, 16, 1),
                aux.compact_gid_from_isect.as_tensor_arg(1),
                aux.global_from_compact_gid.as_tensor_arg(1),
                aux.tile_offsets.as_tensor_arg(1),
                aux.projected.as_tensor_arg(1),
                aux.n_contrib.as_tensor_arg(1),
                metric_map.as_tensor_arg(1),
                self.counts.as_tensor_arg(1),
                pass_uniforms.as_tensor_arg(1),
            );
        }

        self.views_accumulated += 1;
    }

    /// Divides the accumulated counts by the number of views folded in and
    /// returns the result. A no-op (returns the untouched zero buffer) if no
    /// views were ever accumulated.
    pub fn finish(self) -> CubeTensor<WgpuRuntime> {
        if self.views_accumulated == 0 || self.n == 0 {
            return self.counts;
        }
        let client = self.counts.client.clone();
        // SAFETY: bounds-checked against `n`.
        unsafe {
            average_counts::launch_unchecked::<WgpuRuntime>(
                &client,
                calc_cube_count_1d(self.n as u32, METRIC_WORKGROUP),
                CubeDim::new(METRIC_WORKGROUP, 1, 1),
                self.counts.as_tensor_arg(1),
                ScalarArg::new(self.views_accumulated),
                ScalarArg::new(self.n as u32),
            );
        }
        self.counts
    }
}
