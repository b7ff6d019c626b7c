//! Synthetic scene and view generation, standing in for the point-cloud/
//! COLMAP decoders and image loaders spec §6 names as external
//! collaborators. Grounded on `brush-train`'s `create_random_splats` (same
//! random-within-bounds position/rotation/opacity/scale construction), with
//! a matching synthetic orbit-camera and flat-color "reference image" so
//! the engine has something to optimize against without a real dataset.

use burn::tensor::Tensor;
use burn_wgpu::{CubeBackend, CubeTensor, WgpuDevice, WgpuRuntime};
use glam::{Mat4, Quat, UVec2, Vec2, Vec3};
use rand::Rng;

use splat_render::Camera;
use splat_store::{Gaussian, SH_C0, logit};

type Backend = CubeBackend<WgpuRuntime, f32, i32, u32>;

/// Uploads flat host f32 data as a device tensor, same pattern every other
/// crate boundary in this engine uses for host-to-device handoff.
pub fn upload_f32(data: &[f32], device: &WgpuDevice) -> CubeTensor<WgpuRuntime> {
    Tensor::<Backend, 1>::from_data(data, device).into_primitive()
}

/// Random Gaussians within a cube of the given half-extent, one solid-color
/// SH DC term per point and zero higher-order coefficients (spec §6's
/// "minimal point cloud" ingest default, reused here verbatim: opacity-logit
/// inverse-sigmoid near 1, identity rotation, `log-scale = -5`).
pub fn random_gaussians(
    count: usize,
    half_extent: f32,
    rng: &mut impl Rng,
) -> (Vec<Gaussian>, Vec<[[f32; 3]; 16]>) {
    let mut gaussians = Vec::with_capacity(count);
    let mut sh = Vec::with_capacity(count);
    for _ in 0..count {
        let mean = Vec3::new(
            rng.random_range(-half_extent..half_extent),
            rng.random_range(-half_extent..half_extent),
            rng.random_range(-half_extent..half_extent),
        );
        let color = Vec3::new(
            rng.random_range(0.0..1.0),
            rng.random_range(0.0..1.0),
            rng.random_range(0.0..1.0),
        );
        gaussians.push(Gaussian {
            mean,
            rotation: Quat::IDENTITY,
            log_scale: Vec3::splat(-5.0),
            opacity_logit: logit(0.9),
        });
        let mut coeffs = [[0.0f32; 3]; 16];
        coeffs[0] = [
            (color.x - 0.5) / SH_C0,
            (color.y - 0.5) / SH_C0,
            (color.z - 0.5) / SH_C0,
        ];
        sh.push(coeffs);
    }
    (gaussians, sh)
}

/// `count` cameras orbiting the origin at `radius`, evenly spaced in
/// azimuth, all looking at the origin.
pub fn orbit_cameras(count: usize, radius: f32, viewport: UVec2) -> Vec<Camera> {
    let fov_y: f32 = 0.6;
    let aspect = viewport.x as f32 / viewport.y as f32;
    let focal_y = viewport.y as f32 / (2.0 * (fov_y / 2.0).tan());
    let focal_x = focal_y * aspect;
    let proj = Mat4::perspective_rh(fov_y, aspect, 0.01, 1000.0);

    (0..count)
        .map(|i| {
            let theta = (i as f32 / count as f32) * std::f32::consts::TAU;
            let eye = Vec3::new(theta.cos(), 0.3, theta.sin()) * radius;
            let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
            Camera::new(view, proj, Vec2::new(focal_x, focal_y), viewport)
        })
        .collect()
}

/// A flat mid-gray target image, `(w*h*4)` rgba f32 values in `[0, 1]`. A
/// real reference image comes from the loader spec §6 places out of this
/// engine's scope; this is only enough signal to exercise the training
/// loop end to end.
pub fn flat_target(viewport: UVec2) -> Vec<f32> {
    let n = (viewport.x as usize) * (viewport.y as usize);
    let mut out = Vec::with_capacity(n * 4);
    for _ in 0..n {
        out.extend_from_slice(&[0.5, 0.5, 0.5, 1.0]);
    }
    out
}
