use bytemuck::{Pod, Zeroable};
use half::f16;

/// `(4*pi)^-1/2`; used to derive an SH DC term from a flat RGB color.
pub const SH_C0: f32 = 0.282_094_791_773_878_14;

/// 24 u32 words per Gaussian = 48 f16 halves = 16 coefficients x 3 channels,
/// interleaved channel-major: channel is the outer index, coefficient the
/// inner index (`half_index = channel * 16 + coeff`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PackedSh {
    pub words: [u32; 24],
}

pub const MAX_SH_COEFFS: usize = 16;

/// Number of active SH coefficients for a given degree (0..=3 per the
/// engine's configuration surface; the layout itself always reserves 16).
pub fn num_sh_coeffs(degree: u32) -> u32 {
    (degree + 1) * (degree + 1)
}

impl PackedSh {
    pub fn pack(coeffs: &[[f32; 3]; MAX_SH_COEFFS]) -> Self {
        let mut halves = [f16::ZERO; MAX_SH_COEFFS * 3];
        for (i, c) in coeffs.iter().enumerate() {
            for ch in 0..3 {
                halves[ch * MAX_SH_COEFFS + i] = f16::from_f32(c[ch]);
            }
        }
        let mut words = [0u32; 24];
        for (w, pair) in words.iter_mut().zip(halves.chunks_exact(2)) {
            *w = u32::from(pair[0].to_bits()) | (u32::from(pair[1].to_bits()) << 16);
        }
        Self { words }
    }

    pub fn unpack(&self) -> [[f32; 3]; MAX_SH_COEFFS] {
        let mut halves = [0.0f32; MAX_SH_COEFFS * 3];
        for (w, pair) in self.words.iter().zip(halves.chunks_exact_mut(2)) {
            pair[0] = f16::from_bits((*w & 0xffff) as u16).to_f32();
            pair[1] = f16::from_bits((*w >> 16) as u16).to_f32();
        }
        let mut out = [[0.0f32; 3]; MAX_SH_COEFFS];
        for (i, o) in out.iter_mut().enumerate() {
            for ch in 0..3 {
                o[ch] = halves[ch * MAX_SH_COEFFS + i];
            }
        }
        out
    }

    /// Read-modify-write the DC term (coefficient 0) for one channel,
    /// preserving every other coefficient's packed half untouched. This is
    /// the exact operation C10's repack performs after an Adam step on the
    /// DC SH parameter.
    pub fn write_dc(&mut self, channel: usize, value: f32) {
        let half_index = channel * MAX_SH_COEFFS;
        let word_index = half_index / 2;
        let lower_half = half_index % 2 == 0;
        let word = &mut self.words[word_index];
        let packed = f16::from_f32(value).to_bits();
        if lower_half {
            *word = (*word & 0xffff_0000) | u32::from(packed);
        } else {
            *word = (*word & 0x0000_ffff) | (u32::from(packed) << 16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn round_trips_all_sixteen_coefficients() {
        let mut coeffs = [[0.0f32; 3]; MAX_SH_COEFFS];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c = [i as f32 * 0.1, -(i as f32) * 0.2, 0.05];
        }
        let packed = PackedSh::pack(&coeffs);
        let back = packed.unpack();
        for i in 0..MAX_SH_COEFFS {
            for ch in 0..3 {
                assert_approx_eq!(back[i][ch], coeffs[i][ch], 2e-3);
            }
        }
    }

    #[test]
    fn write_dc_preserves_sibling_coefficients() {
        let mut coeffs = [[0.0f32; 3]; MAX_SH_COEFFS];
        coeffs[1] = [1.0, 2.0, 3.0];
        coeffs[0] = [0.1, 0.2, 0.3];
        let mut packed = PackedSh::pack(&coeffs);
        packed.write_dc(0, 0.9);
        let back = packed.unpack();
        assert_approx_eq!(back[0][0], 0.9, 2e-3);
        assert_approx_eq!(back[1][0], 1.0, 2e-3);
        assert_approx_eq!(back[1][1], 2.0, 2e-3);
    }

    #[test]
    fn num_coeffs_matches_degree_squared_rule() {
        assert_eq!(num_sh_coeffs(0), 1);
        assert_eq!(num_sh_coeffs(1), 4);
        assert_eq!(num_sh_coeffs(2), 9);
        assert_eq!(num_sh_coeffs(3), 16);
    }
}
