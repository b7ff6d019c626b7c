//! Stable key-value radix sort of u32 keys ascending (C3), in four 8-bit
//! passes with ping-pong key/value buffers (spec §4.3).
//!
//! Each pass is itself three kernel launches: a per-block digit histogram,
//! a per-bin scan across blocks (producing both the block-local offsets the
//! scatter needs and each bin's total count), and the stable scatter
//! itself. The bin totals are turned into global bin base offsets via
//! `splat_sum`'s exclusive scan, which is how this crate reuses C2 rather
//! than re-deriving its own 256-wide scan.

mod cubecl_sort;

use burn::tensor::DType;
use burn_cubecl::cubecl::CubeCount;
use burn_cubecl::cubecl::prelude::{CubeDim, ScalarArg};
use burn_wgpu::{CubeTensor, WgpuDevice, WgpuRuntime};
use splat_kernel::create_tensor;

pub use cubecl_sort::{BLOCK_SIZE, RADIX, RADIX_BITS};

/// Sort `keys`/`values` (parallel arrays of length `n`) ascending by key.
/// Runs `bits.div_ceil(RADIX_BITS)` 8-bit passes; callers that know an
/// upper bound on the key range (e.g. `num_tiles` for a tile-id-keyed sort)
/// can pass a smaller `bits` to skip leading all-zero passes.
pub fn radix_sort(
    keys: CubeTensor<WgpuRuntime>,
    values: CubeTensor<WgpuRuntime>,
    n: usize,
    bits: u32,
) -> (CubeTensor<WgpuRuntime>, CubeTensor<WgpuRuntime>) {
    assert!(keys.is_contiguous() && values.is_contiguous());
    let device = keys.device.clone();
    let num_passes = bits.div_ceil(RADIX_BITS).max(1);

    let mut keys = keys;
    let mut values = values;
    for pass in 0..num_passes {
        let shift = pass * RADIX_BITS;
        let (k2, v2) = radix_sort_pass(&keys, &values, n, shift, &device);
        keys = k2;
        values = v2;
    }
    (keys, values)
}

fn radix_sort_pass(
    keys_in: &CubeTensor<WgpuRuntime>,
    values_in: &CubeTensor<WgpuRuntime>,
    n: usize,
    shift: u32,
    device: &WgpuDevice,
) -> (CubeTensor<WgpuRuntime>, CubeTensor<WgpuRuntime>) {
    let client = keys_in.client.clone();
    let num_blocks = n.div_ceil(BLOCK_SIZE as usize).max(1);

    let hist = create_tensor([RADIX as usize * num_blocks], device, DType::I32);
    // SAFETY: every thread in range [0, num_blocks*BLOCK_SIZE) writes its
    // own `hist` slot exactly once; out-of-range input indices are masked
    // off inside the kernel via `idx < n`.
    unsafe {
        cubecl_sort::count_hist::launch_unchecked::<WgpuRuntime>(
            &client,
            CubeCount::Static(num_blocks as u32, 1, 1),
            cubecl_sort::block_dim(),
            keys_in.as_tensor_arg(1),
            hist.as_tensor_arg(1),
            ScalarArg::new(shift),
            ScalarArg::new(n as u32),
            ScalarArg::new(num_blocks as u32),
        );
    }

    let block_offsets = create_tensor([RADIX as usize * num_blocks], device, DType::I32);
    let bin_totals = create_tensor([RADIX as usize], device, DType::I32);
    // SAFETY: one workgroup per bin; only UNIT_POS==0 touches global memory,
    // writing exactly `num_blocks` slots it alone owns for that bin.
    unsafe {
        cubecl_sort::scan_bins_across_blocks::launch_unchecked::<WgpuRuntime>(
            &client,
            CubeCount::Static(RADIX, 1, 1),
            CubeDim::new(1, 1, 1),
            hist.as_tensor_arg(1),
            block_offsets.as_tensor_arg(1),
            bin_totals.as_tensor_arg(1),
            ScalarArg::new(num_blocks as u32),
        );
    }

    let bin_base = splat_sum::prefix_sum_exclusive(&bin_totals)
        .expect("RADIX=256 bins is always within MAX_ELEMENTS");

    let keys_out = create_tensor([n], device, DType::U32);
    let values_out = create_tensor([n], device, DType::U32);
    // SAFETY: each in-range thread computes a unique `dest` in `[0, n)`
    // from the scanned bin base + block offset + its own stable local rank.
    unsafe {
        cubecl_sort::scatter::launch_unchecked::<WgpuRuntime>(
            &client,
            CubeCount::Static(num_blocks as u32, 1, 1),
            cubecl_sort::block_dim(),
            keys_in.as_tensor_arg(1),
            values_in.as_tensor_arg(1),
            keys_out.as_tensor_arg(1),
            values_out.as_tensor_arg(1),
            block_offsets.as_tensor_arg(1),
            bin_base.as_tensor_arg(1),
            ScalarArg::new(shift),
            ScalarArg::new(n as u32),
            ScalarArg::new(num_blocks as u32),
        );
    }

    (keys_out, values_out)
}

#[cfg(all(test, not(target_family = "wasm")))]
mod tests {
    use super::*;
    use burn::tensor::{Int, Tensor};
    use burn_wgpu::CubeBackend;

    type Backend = CubeBackend<WgpuRuntime, f32, i32, u32>;

    fn run(keys: &[u32], values: &[u32]) -> (Vec<u32>, Vec<u32>) {
        let device = WgpuDevice::default();
        let n = keys.len();
        let keys_i32: Vec<i32> = keys.iter().map(|&k| k as i32).collect();
        let values_i32: Vec<i32> = values.iter().map(|&v| v as i32).collect();
        let k = Tensor::<Backend, 1, Int>::from_data(keys_i32.as_slice(), &device).into_primitive();
        let v =
            Tensor::<Backend, 1, Int>::from_data(values_i32.as_slice(), &device).into_primitive();
        let (ks, vs) = radix_sort(k, v, n, 32);
        let ks = Tensor::<Backend, 1, Int>::from_primitive(ks)
            .to_data()
            .as_slice::<i32>()
            .expect("i32")
            .iter()
            .map(|&x| x as u32)
            .collect();
        let vs = Tensor::<Backend, 1, Int>::from_primitive(vs)
            .to_data()
            .as_slice::<i32>()
            .expect("i32")
            .iter()
            .map(|&x| x as u32)
            .collect();
        (ks, vs)
    }

    #[test]
    fn sorts_keys_ascending_stably() {
        let keys = [5u32, 1, 4, 1, 3, 2, 1];
        let values = [0u32, 1, 2, 3, 4, 5, 6];
        let (sorted_keys, sorted_values) = run(&keys, &values);
        let mut expect: Vec<(u32, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
        expect.sort_by_key(|&(k, _)| k);
        let got: Vec<(u32, u32)> = sorted_keys.into_iter().zip(sorted_values).collect();
        // Stability: ties (key==1) must keep original relative value order.
        let ties_expect: Vec<u32> = expect.iter().filter(|&&(k, _)| k == 1).map(|&(_, v)| v).collect();
        let ties_got: Vec<u32> = got.iter().filter(|&&(k, _)| k == 1).map(|&(_, v)| v).collect();
        assert_eq!(ties_got, ties_expect);
        assert_eq!(got.iter().map(|&(k, _)| k).collect::<Vec<_>>(), expect.iter().map(|&(k, _)| k).collect::<Vec<_>>());
    }
}
