//! Headless training driver, grounded on `brush-cli`'s `Cli` (clap-derived,
//! flattened training config) and `brush-process`'s `train_stream` loop
//! (load/build scene, step, periodically refine and report). Point-cloud,
//! COLMAP, and camera-JSON loading are external collaborators spec §6 places
//! out of this engine's scope, so this binary stands up a synthetic scene
//! and a set of orbiting cameras via [`demo_scene`] instead of a real
//! dataset loader.

mod demo_scene;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use glam::UVec2;
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};

use burn::tensor::Tensor;
use burn_wgpu::{CubeBackend, CubeTensor, WgpuDevice, WgpuRuntime};

use splat_train::{SplatTrainer, TrainConfig};

type Backend = CubeBackend<WgpuRuntime, f32, i32, u32>;

/// Headless trainer for the core engine, exercising it against a synthetic
/// scene since no file-format loader is wired in (spec §1's "deliberately
/// out of scope" list).
#[derive(Parser)]
#[command(author, version, about = "splat-cli - headless 3DGS training core")]
struct Cli {
    #[clap(flatten)]
    train: TrainConfig,

    /// Number of Gaussians in the synthetic reference scene the engine
    /// trains against.
    #[arg(long, default_value = "512")]
    reference_points: usize,

    /// Number of Gaussians the trainable scene starts with.
    #[arg(long, default_value = "128")]
    init_points: usize,

    /// Half-extent of the cube the synthetic scene is scattered within.
    #[arg(long, default_value = "1.5")]
    scene_extent: f32,

    /// Number of synthetic orbit cameras / reference images to train from.
    #[arg(long, default_value = "8")]
    num_views: usize,

    /// Render width/height in pixels for every synthetic view.
    #[arg(long, default_value = "128")]
    viewport: u32,

    /// RNG seed for scene generation and view sampling.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Print a progress line every this many iterations.
    #[arg(long, default_value = "20")]
    log_every: u32,

    /// Export a PNG render of a fixed view every this many iterations; 0
    /// disables export.
    #[arg(long, default_value = "0")]
    export_every: u32,

    /// Directory exported PNGs are written to.
    #[arg(long, default_value = "splat-out")]
    export_path: PathBuf,
}

fn readback_f32(tensor: CubeTensor<WgpuRuntime>) -> Vec<f32> {
    let t: Tensor<Backend, 1> = Tensor::from_primitive(tensor);
    t.into_data().as_slice::<f32>().expect("f32 tensor").to_vec()
}

/// Converts a flat rgba f32 `[0,1]` render into an 8-bit PNG and writes it.
fn save_png(pixels: &[f32], w: u32, h: u32, path: &std::path::Path) -> anyhow::Result<()> {
    let mut bytes = Vec::with_capacity(pixels.len());
    for channel in pixels {
        bytes.push((channel.clamp(0.0, 1.0) * 255.0).round() as u8);
    }
    let img = image::RgbaImage::from_raw(w, h, bytes).expect("rgba buffer matches viewport size");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image::DynamicImage::ImageRgba8(img).save(path)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let device = WgpuDevice::default();
    let mut rng = rand::rngs::StdRng::seed_from_u64(cli.seed);

    log::info!(
        "Generating synthetic reference scene: {} points, {} views",
        cli.reference_points,
        cli.num_views
    );
    let viewport = UVec2::new(cli.viewport, cli.viewport);
    let cameras = demo_scene::orbit_cameras(cli.num_views, cli.scene_extent * 3.0, viewport);

    let (ref_gaussians, ref_sh) =
        demo_scene::random_gaussians(cli.reference_points, cli.scene_extent, &mut rng);
    let reference_scene =
        splat_train::GpuScene::from_gaussians(&ref_gaussians, &ref_sh, cli.train.sh_degree, &device);

    let mut targets: Vec<CubeTensor<WgpuRuntime>> = Vec::with_capacity(cameras.len());
    for camera in &cameras {
        let (pred, _aux) = splat_render::render_forward(
            camera,
            reference_scene.n,
            reference_scene.means.param.clone(),
            reference_scene.quats.param.clone(),
            reference_scene.log_scales.param.clone(),
            reference_scene.raw_opacities.param.clone(),
            reference_scene.sh_coeffs.param.clone(),
            reference_scene.sh_degree,
            glam::Vec3::ZERO,
        );
        targets.push(pred);
    }

    log::info!("Initializing trainable scene: {} points", cli.init_points);
    let (init_gaussians, init_sh) =
        demo_scene::random_gaussians(cli.init_points, cli.scene_extent, &mut rng);
    let init_scene =
        splat_train::GpuScene::from_gaussians(&init_gaussians, &init_sh, cli.train.sh_degree, &device);

    let max_iterations = cli.train.max_iterations;
    let mut trainer = SplatTrainer::new(init_scene, cli.train);
    let mut view_visits: hashbrown::HashMap<usize, u32> = hashbrown::HashMap::new();

    let progress = ProgressBar::new(max_iterations as u64).with_style(
        ProgressStyle::with_template(
            "[{elapsed}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg} ({per_sec}, {eta} remaining)",
        )
        .expect("valid indicatif template")
        .progress_chars("=>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(200));

    for iter in 0..max_iterations {
        let view_idx = rng.random_range(0..cameras.len());
        let camera = cameras[view_idx];
        let target = targets[view_idx].clone();
        *view_visits.entry(view_idx).or_insert(0) += 1;

        let stats = trainer.step(&camera, target).await;

        if let Some(refine) = trainer
            .densify_if_needed(|scene| {
                let view_idx = rng.random_range(0..cameras.len());
                let camera = &cameras[view_idx];
                let (pred, aux) = splat_render::render_forward(
                    camera,
                    scene.n,
                    scene.means.param.clone(),
                    scene.quats.param.clone(),
                    scene.log_scales.param.clone(),
                    scene.raw_opacities.param.clone(),
                    scene.sh_coeffs.param.clone(),
                    scene.sh_degree,
                    glam::Vec3::ZERO,
                );
                (pred, aux, targets[view_idx].clone(), camera.viewport.x, camera.viewport.y)
            })
            .await
        {
            log::info!(
                "Densify at iter {}: {} -> {} Gaussians",
                refine.iter,
                refine.n_before,
                refine.n_after
            );
            progress.println(format!(
                "densify @ {}: {} -> {} points",
                refine.iter, refine.n_before, refine.n_after
            ));
        }

        if iter % cli.log_every == 0 || iter + 1 == max_iterations {
            progress.set_position((iter + 1) as u64);
            progress.set_message(format!(
                "N={} {:.1} it/s",
                stats.n,
                trainer.iters_per_sec().unwrap_or(0.0)
            ));
        }

        if cli.export_every > 0 && (iter % cli.export_every == 0 || iter + 1 == max_iterations) {
            let camera = &cameras[0];
            let (pred, _aux) = splat_render::render_forward(
                camera,
                trainer.scene().n,
                trainer.scene().means.param.clone(),
                trainer.scene().quats.param.clone(),
                trainer.scene().log_scales.param.clone(),
                trainer.scene().raw_opacities.param.clone(),
                trainer.scene().sh_coeffs.param.clone(),
                trainer.scene().sh_degree,
                glam::Vec3::ZERO,
            );
            let pixels = readback_f32(pred);
            let path = cli.export_path.join(format!("iter_{iter:06}.png"));
            save_png(&pixels, camera.viewport.x, camera.viewport.y, &path)?;
        }
    }

    progress.finish_with_message("training complete");

    let (packed_gaussians, _packed_sh) = trainer.scene().repack();
    log::info!(
        "Final scene: {} Gaussians after {} iterations",
        packed_gaussians.len(),
        trainer.iter()
    );
    log::debug!("Per-view visit counts: {view_visits:?}");
    println!(
        "done: {} iterations, {} final points, {:.1} it/s",
        trainer.iter(),
        packed_gaussians.len(),
        trainer.iters_per_sec().unwrap_or(0.0)
    );

    Ok(())
}
