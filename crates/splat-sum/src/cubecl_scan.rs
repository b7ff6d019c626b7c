use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

pub const THREADS_PER_GROUP: u32 = 256;
const ELEMENTS_PER_BLOCK_C: u32 = THREADS_PER_GROUP * 2;

pub fn block_dim() -> CubeDim {
    CubeDim::new(THREADS_PER_GROUP, 1, 1)
}

/// Blelloch up-sweep/down-sweep over one block of `2 * THREADS_PER_GROUP`
/// elements held in shared memory. Writes the block-local exclusive scan to
/// `output` and the block's total sum to `block_sums[CUBE_POS]`.
#[cube(launch_unchecked)]
pub fn scan_block(
    input: &Tensor<i32>,
    output: &mut Tensor<i32>,
    block_sums: &mut Tensor<i32>,
    n: u32,
) {
    let tid = UNIT_POS;
    let block_id = CUBE_POS;
    let base = block_id * ELEMENTS_PER_BLOCK_C;

    let mut temp = SharedMemory::<i32>::new(ELEMENTS_PER_BLOCK_C);

    let idx0 = base + 2 * tid;
    let idx1 = base + 2 * tid + 1;

    if idx0 < n {
        temp[2 * tid] = input[idx0];
    } else {
        temp[2 * tid] = 0i32;
    }
    if idx1 < n {
        temp[2 * tid + 1] = input[idx1];
    } else {
        temp[2 * tid + 1] = 0i32;
    }

    sync_cube();

    // Up-sweep (reduce): build partial sums at increasing strides.
    let mut offset = 1u32;
    let mut d = ELEMENTS_PER_BLOCK_C / 2;
    while d > 0 {
        sync_cube();
        if tid < d {
            let ai = offset * (2 * tid + 1) - 1;
            let bi = offset * (2 * tid + 2) - 1;
            temp[bi] += temp[ai];
        }
        offset *= 2;
        d /= 2;
    }

    if tid == 0 {
        block_sums[block_id] = temp[ELEMENTS_PER_BLOCK_C - 1];
        temp[ELEMENTS_PER_BLOCK_C - 1] = 0i32;
    }

    // Down-sweep: turn the reduce tree into an exclusive scan in place.
    let mut d2 = 1u32;
    while d2 < ELEMENTS_PER_BLOCK_C {
        offset /= 2;
        sync_cube();
        if tid < d2 {
            let ai = offset * (2 * tid + 1) - 1;
            let bi = offset * (2 * tid + 2) - 1;
            let t = temp[ai];
            temp[ai] = temp[bi];
            temp[bi] += t;
        }
        d2 *= 2;
    }

    sync_cube();

    if idx0 < n {
        output[idx0] = temp[2 * tid];
    }
    if idx1 < n {
        output[idx1] = temp[2 * tid + 1];
    }
}

/// Phase (c): add each element's block offset back into the block-local
/// scan produced by `scan_block`.
#[cube(launch_unchecked)]
pub fn add_block_offsets(output: &mut Tensor<i32>, block_offsets: &Tensor<i32>, n: u32) {
    let idx = ABSOLUTE_POS;
    if idx < n {
        let block_id = idx / ELEMENTS_PER_BLOCK_C;
        output[idx] += block_offsets[block_id];
    }
}
