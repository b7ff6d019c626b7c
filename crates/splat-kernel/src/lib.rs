//! Shared GPU dispatch plumbing used by every splat compute crate.
//!
//! This crate has no component of its own in the training engine; it holds
//! the host-side helpers every kernel crate needs to allocate tensors and
//! size dispatches against `WgpuRuntime`.

use burn::backend::wgpu::{WgpuDevice, WgpuRuntime};
use burn::tensor::{DType, Shape};
use burn_cubecl::cubecl::Runtime;
use burn_cubecl::cubecl::prelude::*;
use burn_cubecl::cubecl::server::Bindings;
use burn_cubecl::tensor::CubeTensor;

pub use burn_cubecl::cubecl;
pub use burn_cubecl::cubecl::CubeCount;

/// The WebGPU limit on workgroups per dispatch dimension.
const MAX_WORKGROUPS_PER_DIM: u32 = 65535;

/// Compute a 1D dispatch size, tiling into a near-square 2D grid if the
/// element count would otherwise exceed the per-dimension workgroup limit.
pub fn calc_cube_count_1d(num_elements: u32, workgroup_size: u32) -> CubeCount {
    let total_wgs = num_elements.div_ceil(workgroup_size).max(1);
    if total_wgs > MAX_WORKGROUPS_PER_DIM {
        let wg_y = (f64::from(total_wgs)).sqrt().ceil() as u32;
        let wg_x = total_wgs.div_ceil(wg_y);
        CubeCount::Static(wg_x, wg_y, 1)
    } else {
        CubeCount::Static(total_wgs, 1, 1)
    }
}

pub fn calc_cube_count_2d(sizes: [u32; 2], workgroup_size: [u32; 2]) -> CubeCount {
    let wg_x = sizes[0].div_ceil(workgroup_size[0]).max(1);
    let wg_y = sizes[1].div_ceil(workgroup_size[1]).max(1);
    CubeCount::Static(wg_x, wg_y, 1)
}

/// Allocate a fresh, uninitialized tensor of the given shape/dtype.
///
/// In test builds the buffer is perturbed with a large additive constant so
/// that code which wrongly assumes freshly-allocated GPU memory is
/// zero-initialized fails loudly instead of silently passing.
pub fn create_tensor<const D: usize>(
    shape: [usize; D],
    device: &WgpuDevice,
    dtype: DType,
) -> CubeTensor<WgpuRuntime> {
    let client = WgpuRuntime::client(device);
    let shape = Shape::from(shape.to_vec());
    let bufsize = shape.num_elements() * dtype.size();
    let mut buffer = client.empty(bufsize);

    if cfg!(test) {
        use burn::tensor::ops::FloatTensorOps;
        use burn_cubecl::CubeBackend;
        let f = CubeTensor::new_contiguous(
            client.clone(),
            device.clone(),
            shape.clone(),
            buffer,
            DType::F32,
        );
        let noised = CubeBackend::<WgpuRuntime, f32, i32, u32>::float_add_scalar(f, -987_654.0);
        buffer = noised.handle;
    }
    CubeTensor::new_contiguous(client, device.clone(), shape, buffer, dtype)
}

#[cube(launch_unchecked)]
fn zero_fill(out: &mut Tensor<u32>, n: u32) {
    let idx = ABSOLUTE_POS;
    if idx < n {
        out[idx] = 0u32;
    }
}

/// Allocate a tensor and zero-fill it, for buffers that are accumulated into
/// (atomic counters, histograms a kernel may only partially touch) rather
/// than fully overwritten by their producing kernel.
pub fn create_zeroed_tensor<const D: usize>(
    shape: [usize; D],
    device: &WgpuDevice,
    dtype: DType,
) -> CubeTensor<WgpuRuntime> {
    let tensor = create_tensor(shape, device, dtype);
    let client = WgpuRuntime::client(device);
    let n = tensor.shape.num_elements() as u32;
    // SAFETY: single bounds-checked write per in-range thread.
    unsafe {
        zero_fill::launch_unchecked::<WgpuRuntime>(
            &client,
            calc_cube_count_1d(n, 256),
            CubeDim::new(256, 1, 1),
            tensor.as_tensor_arg(1),
            ScalarArg::new(n),
        );
    }
    tensor
}

#[cube(launch_unchecked)]
fn compute_dispatch_buffer(thread_count: &Tensor<u32>, wg_size: u32, out: &mut Tensor<i32>) {
    if UNIT_POS == 0 {
        let n = thread_count[0];
        let total_wgs = (n + wg_size - 1) / wg_size;
        out[0] = i32::cast_from(total_wgs);
        out[1] = 1i32;
        out[2] = 1i32;
    }
}

/// Build a 3-element `(wg_x, wg_y, wg_z)` buffer on the GPU from a scalar
/// thread-count tensor that itself was produced by a prior kernel (e.g. an
/// atomic visible-gaussian counter). This is how indirect dispatch sizing
/// works when the host cannot read the count back without a pipeline stall.
pub fn create_dispatch_buffer_1d(
    thread_count: CubeTensor<WgpuRuntime>,
    wg_size: u32,
) -> CubeTensor<WgpuRuntime> {
    assert!(
        thread_count.is_contiguous(),
        "thread_count buffer must be contiguous"
    );
    let client = thread_count.client.clone();
    let device = thread_count.device.clone();
    let out = create_tensor([3], &device, DType::I32);

    // SAFETY: single-workgroup kernel, fixed 3-element output, no OOB access.
    unsafe {
        compute_dispatch_buffer::launch_unchecked::<WgpuRuntime>(
            &client,
            CubeCount::Static(1, 1, 1),
            CubeDim::new(1, 1, 1),
            thread_count.as_tensor_arg(1),
            ScalarArg::new(wg_size),
            out.as_tensor_arg(1),
        );
    }
    out
}

/// Launch a 2D dispatch sized directly from compile/host-known tile bounds.
pub fn calc_cube_count_tiles(tile_bounds_x: u32, tile_bounds_y: u32) -> CubeCount {
    CubeCount::Static(tile_bounds_x, tile_bounds_y, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_dispatch_stays_1d() {
        let cc = calc_cube_count_1d(1_000, 256);
        assert_eq!(cc, CubeCount::Static(4, 1, 1));
    }

    #[test]
    fn huge_dispatch_tiles_into_2d() {
        let cc = calc_cube_count_1d(u32::MAX, 1);
        match cc {
            CubeCount::Static(x, y, z) => {
                assert_eq!(z, 1);
                assert!(u64::from(x) * u64::from(y) >= u64::from(u32::MAX));
                assert!(x <= MAX_WORKGROUPS_PER_DIM && y <= MAX_WORKGROUPS_PER_DIM);
            }
            _ => panic!("expected a static dispatch"),
        }
    }
}
