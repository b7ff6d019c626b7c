//! Tile-range builder (C5): from the sorted `(tile_key, compact_gid)`
//! stream, recovers each tile's `[start, end)` range of contributor
//! indices via `atomicMin` (spec §4.5).

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

#[cube(launch_unchecked)]
pub fn init_tile_offsets(tile_offsets: &mut Tensor<Atomic<u32>>, num_tiles: u32, total_entries: u32) {
    let idx = ABSOLUTE_POS;
    if idx <= num_tiles {
        let sentinel = if idx == num_tiles {
            total_entries
        } else {
            u32::MAX
        };
        Atomic::store(&tile_offsets[idx], sentinel);
    }
}

/// `keys` are the sorted tile keys; decodes `tile_id = (key >> 16) - 1` and
/// atomically records the first sorted index for each tile id.
#[cube(launch_unchecked)]
pub fn scan_tile_starts(
    keys: &Tensor<u32>,
    tile_offsets: &mut Tensor<Atomic<u32>>,
    total_entries: u32,
) {
    let s = ABSOLUTE_POS;
    if s >= total_entries {
        terminate!();
    }
    let key = keys[s];
    let hi = key >> 16;
    if hi == 0u32 {
        terminate!();
    }
    let tile_id = hi - 1u32;
    Atomic::min(&tile_offsets[tile_id], s);
}

/// Sentinel-fill pass: any tile with no contributors inherits the start of
/// the next non-empty tile, so `[start, tile_offsets[t+1])` is always a
/// valid (possibly empty) range.
#[cube(launch_unchecked)]
pub fn fill_empty_tile_starts(tile_offsets: &mut Tensor<u32>, num_tiles: u32) {
    if UNIT_POS == 0 && CUBE_POS == 0 {
        let mut next_valid = tile_offsets[num_tiles];
        let mut t = num_tiles;
        while t > 0u32 {
            t -= 1u32;
            if tile_offsets[t] == u32::MAX {
                tile_offsets[t] = next_valid;
            } else {
                next_valid = tile_offsets[t];
            }
        }
    }
}
