use bytemuck::{Pod, Zeroable};
use half::f16;

/// The C4 forward-preprocess output: 24 bytes, six f16 pairs — NDC position,
/// screen-space extent (pixels), conic(a,b), conic(c) (padded), color(r,g),
/// color(b)+opacity-sigmoid. Populated only for Gaussians that survive
/// culling with a positive-definite 2D covariance.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PackedSplat {
    pub ndc: [u32; 1],
    pub extent: [u32; 1],
    pub conic_ab: [u32; 1],
    pub conic_c: [u32; 1],
    pub color_rg: [u32; 1],
    pub color_b_opacity: [u32; 1],
}

fn pack2(a: f32, b: f32) -> u32 {
    u32::from(f16::from_f32(a).to_bits()) | (u32::from(f16::from_f32(b).to_bits()) << 16)
}

fn unpack2(word: u32) -> (f32, f32) {
    (
        f16::from_bits((word & 0xffff) as u16).to_f32(),
        f16::from_bits((word >> 16) as u16).to_f32(),
    )
}

/// The unpacked, human-readable view of a splat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Splat {
    pub ndc: [f32; 2],
    pub extent: [f32; 2],
    pub conic: [f32; 3],
    pub color: [f32; 3],
    pub opacity: f32,
}

impl PackedSplat {
    pub fn pack(s: Splat) -> Self {
        Self {
            ndc: [pack2(s.ndc[0], s.ndc[1])],
            extent: [pack2(s.extent[0], s.extent[1])],
            conic_ab: [pack2(s.conic[0], s.conic[1])],
            conic_c: [pack2(s.conic[2], 0.0)],
            color_rg: [pack2(s.color[0], s.color[1])],
            color_b_opacity: [pack2(s.color[2], s.opacity)],
        }
    }

    pub fn unpack(&self) -> Splat {
        let (nx, ny) = unpack2(self.ndc[0]);
        let (ex, ey) = unpack2(self.extent[0]);
        let (ca, cb) = unpack2(self.conic_ab[0]);
        let (cc, _pad) = unpack2(self.conic_c[0]);
        let (cr, cg) = unpack2(self.color_rg[0]);
        let (cblue, opacity) = unpack2(self.color_b_opacity[0]);

        Splat {
            ndc: [nx, ny],
            extent: [ex, ey],
            conic: [ca, cb, cc],
            color: [cr, cg, cblue],
            opacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn splat_round_trips() {
        let s = Splat {
            ndc: [0.2, -0.4],
            extent: [12.5, 8.25],
            conic: [1.0, 0.1, 2.0],
            color: [0.9, 0.5, 0.1],
            opacity: 0.75,
        };
        let back = PackedSplat::pack(s).unpack();
        assert_approx_eq!(back.ndc[0], s.ndc[0], 2e-3);
        assert_approx_eq!(back.extent[1], s.extent[1], 2e-3);
        assert_approx_eq!(back.conic[2], s.conic[2], 2e-3);
        assert_approx_eq!(back.color[2], s.color[2], 2e-3);
        assert_approx_eq!(back.opacity, s.opacity, 2e-3);
    }
}
