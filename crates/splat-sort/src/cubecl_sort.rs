use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

pub const BLOCK_SIZE: u32 = 256;
pub const RADIX: u32 = 256;
pub const RADIX_BITS: u32 = 8;

pub fn block_dim() -> CubeDim {
    CubeDim::new(BLOCK_SIZE, 1, 1)
}

/// Per-block digit histogram for one 8-bit radix pass. `hist` is laid out
/// bin-major: `hist[bin * num_blocks + block_id]`, which lets the following
/// scan pass walk each bin's block counts contiguously.
#[cube(launch_unchecked)]
pub fn count_hist(keys: &Tensor<u32>, hist: &mut Tensor<i32>, shift: u32, n: u32, num_blocks: u32) {
    let tid = UNIT_POS;
    let block_id = CUBE_POS;
    let idx = ABSOLUTE_POS;

    let mut shared_hist = SharedMemory::<i32>::new(RADIX);
    shared_hist[tid] = 0i32;
    sync_cube();

    if idx < n {
        let key = keys[idx];
        let digit = (key >> shift) & (RADIX - 1);
        let _ = Atomic::add(&shared_hist[digit], 1i32);
    }
    sync_cube();

    hist[tid * num_blocks + block_id] = shared_hist[tid];
}

/// Exclusive-scan each bin's per-block counts (one workgroup per bin, a
/// single thread sequentially walks that bin's block counts) and also
/// accumulate `bin_totals[bin]`, the total count for that digit across all
/// blocks.
#[cube(launch_unchecked)]
pub fn scan_bins_across_blocks(
    counts: &Tensor<i32>,
    block_offsets: &mut Tensor<i32>,
    bin_totals: &mut Tensor<i32>,
    num_blocks: u32,
) {
    let bin = CUBE_POS;
    if UNIT_POS == 0 {
        let mut running = 0i32;
        let mut block_id = 0u32;
        while block_id < num_blocks {
            let i = bin * num_blocks + block_id;
            let c = counts[i];
            block_offsets[i] = running;
            running += c;
            block_id += 1;
        }
        bin_totals[bin] = running;
    }
}

/// Stable scatter into sorted order. Each thread recomputes its local rank
/// among same-digit elements in its own block by scanning the block's
/// digits that precede it in thread order, which preserves input order for
/// ties (the sort's stability requirement).
#[cube(launch_unchecked)]
pub fn scatter(
    keys_in: &Tensor<u32>,
    values_in: &Tensor<u32>,
    keys_out: &mut Tensor<u32>,
    values_out: &mut Tensor<u32>,
    block_offsets: &Tensor<i32>,
    bin_base: &Tensor<i32>,
    shift: u32,
    n: u32,
    num_blocks: u32,
) {
    let tid = UNIT_POS;
    let block_id = CUBE_POS;
    let idx = ABSOLUTE_POS;

    let mut shared_digits = SharedMemory::<u32>::new(BLOCK_SIZE);

    let in_range = idx < n;
    let key = if in_range { keys_in[idx] } else { 0u32 };
    let digit = (key >> shift) & (RADIX - 1);
    shared_digits[tid] = digit;
    sync_cube();

    if in_range {
        let mut local_rank = 0u32;
        let mut j = 0u32;
        while j < tid {
            if shared_digits[j] == digit {
                local_rank += 1;
            }
            j += 1;
        }

        let base = bin_base[digit];
        let block_off = block_offsets[digit * num_blocks + block_id];
        let dest = u32::cast_from(base + block_off) + local_rank;

        keys_out[dest] = key;
        values_out[dest] = values_in[idx];
    }
}
