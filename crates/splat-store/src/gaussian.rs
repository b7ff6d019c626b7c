use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use half::f16;

use crate::{LOG_SCALE_MAX, LOG_SCALE_MIN, opacity_logit_clamp};

/// The 24-byte f16-packed Gaussian: `pos_opacity[2]`, `rot[2]`, `scale[2]`,
/// each word holding two f16 halves.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PackedGaussian {
    pub pos_opacity: [u32; 2],
    pub rot: [u32; 2],
    pub scale: [u32; 2],
}

/// An unpacked Gaussian in the engine's working representation: mean in
/// world units, raw rotation quaternion (not guaranteed unit until used),
/// log-scale per axis, and opacity stored as a raw logit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gaussian {
    pub mean: Vec3,
    pub rotation: Quat,
    pub log_scale: Vec3,
    pub opacity_logit: f32,
}

fn pack_half2(a: f32, b: f32) -> u32 {
    let a = f16::from_f32(a).to_bits();
    let b = f16::from_f32(b).to_bits();
    u32::from(a) | (u32::from(b) << 16)
}

fn unpack_half2(word: u32) -> (f32, f32) {
    let a = f16::from_bits((word & 0xffff) as u16).to_f32();
    let b = f16::from_bits((word >> 16) as u16).to_f32();
    (a, b)
}

impl PackedGaussian {
    /// Pack an unpacked Gaussian, clamping any component that would
    /// otherwise leave f16 representable range or the engine's declared
    /// invariants before packing.
    pub fn pack(g: Gaussian) -> Self {
        let opacity_logit = g.opacity_logit.clamp(-f16::MAX.to_f32(), opacity_logit_clamp());
        let log_scale = g.log_scale.clamp(
            Vec3::splat(LOG_SCALE_MIN),
            Vec3::splat(LOG_SCALE_MAX),
        );
        let q = g.rotation.normalize();

        Self {
            pos_opacity: [
                pack_half2(g.mean.x, g.mean.y),
                pack_half2(g.mean.z, opacity_logit),
            ],
            rot: [pack_half2(q.w, q.x), pack_half2(q.y, q.z)],
            scale: [pack_half2(log_scale.x, log_scale.y), pack_half2(log_scale.z, 0.0)],
        }
    }

    /// Unpack, applying the mandated `unpack -> transform -> clamp` order:
    /// values come out of f16 storage first, the transform (quaternion
    /// normalize) is applied, and the declared clamps are enforced last so
    /// that no caller can observe an out-of-invariant value even if it was
    /// written by an older/foreign packer.
    pub fn unpack(&self) -> Gaussian {
        let (mx, my) = unpack_half2(self.pos_opacity[0]);
        let (mz, opacity_logit) = unpack_half2(self.pos_opacity[1]);
        let (qw, qx) = unpack_half2(self.rot[0]);
        let (qy, qz) = unpack_half2(self.rot[1]);
        let (sx, sy) = unpack_half2(self.scale[0]);
        let (sz, _pad) = unpack_half2(self.scale[1]);

        let rotation = Quat::from_xyzw(qx, qy, qz, qw).normalize();
        let log_scale = Vec3::new(sx, sy, sz).clamp(
            Vec3::splat(LOG_SCALE_MIN),
            Vec3::splat(LOG_SCALE_MAX),
        );
        let opacity_logit = opacity_logit.min(opacity_logit_clamp());

        Gaussian {
            mean: Vec3::new(mx, my, mz),
            rotation,
            log_scale,
            opacity_logit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn pack_unpack_round_trip_within_f16_ulp() {
        let g = Gaussian {
            mean: Vec3::new(1.5, -2.25, 0.125),
            rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 1.0),
            log_scale: Vec3::new(-1.0, -2.0, -0.5),
            opacity_logit: 0.3,
        };
        let packed = PackedGaussian::pack(g);
        let back = packed.unpack();
        assert_approx_eq!(back.mean.x, g.mean.x, 1e-3);
        assert_approx_eq!(back.mean.y, g.mean.y, 1e-3);
        assert_approx_eq!(back.mean.z, g.mean.z, 1e-3);
        assert_approx_eq!(back.opacity_logit, g.opacity_logit, 1e-3);
        assert_approx_eq!(back.log_scale.x, g.log_scale.x, 1e-3);
    }

    #[test]
    fn log_scale_clamped_to_declared_range() {
        let g = Gaussian {
            mean: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            log_scale: Vec3::new(50.0, -50.0, 0.0),
            opacity_logit: 0.0,
        };
        let back = PackedGaussian::pack(g).unpack();
        assert!(back.log_scale.x <= LOG_SCALE_MAX + 1e-2);
        assert!(back.log_scale.y >= LOG_SCALE_MIN - 1e-2);
    }

    #[test]
    fn opacity_logit_clamped_so_sigmoid_at_most_point_eight() {
        let g = Gaussian {
            mean: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            log_scale: Vec3::ZERO,
            opacity_logit: 50.0,
        };
        let back = PackedGaussian::pack(g).unpack();
        assert!(crate::sigmoid(back.opacity_logit) <= 0.8 + 1e-4);
    }

    #[test]
    fn rotation_is_unit_after_unpack() {
        let g = Gaussian {
            mean: Vec3::ZERO,
            rotation: Quat::from_xyzw(1.0, 2.0, 3.0, 4.0),
            log_scale: Vec3::ZERO,
            opacity_logit: 0.0,
        };
        let back = PackedGaussian::pack(g).unpack();
        assert_approx_eq!(back.rotation.length(), 1.0, 1e-3);
    }
}
