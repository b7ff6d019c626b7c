//! Packed data layouts shared by the renderer, backward passes, and the
//! optimizer/densify stage.
//!
//! These types are pure CPU-testable layout code: packing, unpacking, and the
//! invariants the spec pins to the read path (`unpack -> transform -> clamp`).
//! The GPU kernels in `splat-render`/`splat-render-bwd`/`splat-train` read and
//! write these exact byte layouts from cubecl; this crate is the single
//! source of truth for the layout so host and device never disagree.

mod gaussian;
mod sh;
mod splat;
mod tile_key;

pub use gaussian::{Gaussian, PackedGaussian};
pub use sh::{PackedSh, SH_C0, num_sh_coeffs};
pub use splat::PackedSplat;
pub use tile_key::{decode_tile_id, encode_depth_key, encode_tile_key};

/// Log-scale is clamped to this range on every read (spec data model).
pub const LOG_SCALE_MIN: f32 = -10.0;
pub const LOG_SCALE_MAX: f32 = 10.0;

/// Opacity logit is clamped so `sigmoid(logit) <= OPACITY_SIGMOID_MAX`.
pub const OPACITY_SIGMOID_MAX: f32 = 0.8;

/// Inverse sigmoid (logit) of `OPACITY_SIGMOID_MAX`, used to clamp the raw
/// logit directly without a sigmoid round-trip.
pub fn opacity_logit_clamp() -> f32 {
    (OPACITY_SIGMOID_MAX / (1.0 - OPACITY_SIGMOID_MAX)).ln()
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}
