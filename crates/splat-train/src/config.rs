use clap::Parser;
use serde::{Deserialize, Serialize};

/// Training knobs for the orchestrator (spec §6's configuration table).
///
/// Every field here is also a CLI flag (`splat-cli` derives its argument
/// parser straight from this struct) and a serializable config file field,
/// so a run can be reproduced either way.
#[derive(Clone, Parser, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrainConfig {
    /// Termination condition: stop after this many iterations.
    #[arg(long, help_heading = "Training options", default_value = "30000")]
    pub max_iterations: u32,

    /// Active spherical-harmonic degree (0..=3); determines how many of the
    /// 16 stored coefficients per channel the renderer evaluates.
    #[arg(long, help_heading = "Training options", default_value = "3")]
    pub sh_degree: u32,

    #[arg(long, help_heading = "Adam options", default_value = "1.6e-4")]
    pub lr_pos: f32,
    #[arg(long, help_heading = "Adam options", default_value = "1e-3")]
    pub lr_rot: f32,
    #[arg(long, help_heading = "Adam options", default_value = "5e-3")]
    pub lr_scale: f32,
    #[arg(long, help_heading = "Adam options", default_value = "5e-2")]
    pub lr_opacity: f32,
    #[arg(long, help_heading = "Adam options", default_value = "2.5e-3")]
    pub lr_color: f32,

    #[arg(long, help_heading = "Adam options", default_value = "0.9")]
    pub beta1: f32,
    #[arg(long, help_heading = "Adam options", default_value = "0.999")]
    pub beta2: f32,
    #[arg(long, help_heading = "Adam options", default_value = "1e-8")]
    pub eps: f32,

    /// Weight of the L1 term in the loss gradient (spec §4.7).
    #[arg(long, help_heading = "Loss options", default_value = "0.8")]
    pub lambda_l1: f32,
    #[arg(long, help_heading = "Loss options", default_value = "0.0")]
    pub lambda_l2: f32,
    #[arg(long, help_heading = "Loss options", default_value = "0.2")]
    pub lambda_dssim: f32,
    #[arg(long, help_heading = "Loss options", default_value = "0.0001")]
    pub c1: f32,
    #[arg(long, help_heading = "Loss options", default_value = "0.0009")]
    pub c2: f32,

    /// Iterations before the first densify cycle runs.
    #[arg(long, help_heading = "Densify options", default_value = "500")]
    pub densify_warmup: u32,
    /// Iterations between densify cycles after warmup.
    #[arg(long, help_heading = "Densify options", default_value = "100")]
    pub densify_interval: u32,
    /// Iteration after which densify cycles stop running.
    #[arg(long, help_heading = "Densify options", default_value = "15000")]
    pub densify_stop: u32,

    /// Number of random views averaged per densify cycle's metric pass.
    #[arg(long, help_heading = "Densify options", default_value = "8")]
    pub metric_views: u32,
    /// Integer downscale factor applied to views during the metric pass.
    #[arg(long, help_heading = "Densify options", default_value = "1")]
    pub metric_downscale: u32,
    /// Normalized-error threshold above which a pixel counts toward a
    /// Gaussian's influence score.
    #[arg(long, help_heading = "Densify options", default_value = "0.05")]
    pub metric_threshold: f32,

    /// Gaussians with `sigmoid(opacity_logit)` below this are pruned.
    #[arg(long, help_heading = "Densify options", default_value = "0.005")]
    pub prune_opacity: f32,
    /// Minimum averaged influence count before a Gaussian is a clone/split
    /// candidate.
    #[arg(long, help_heading = "Densify options", default_value = "2")]
    pub clone_threshold_count: u32,
    /// `max(exp(log_scale))` above this routes a clone candidate to SPLIT
    /// instead.
    #[arg(long, help_heading = "Densify options", default_value = "0.01")]
    pub split_scale_threshold: f32,

    /// Hard cap on new points a single densify cycle may add.
    #[arg(long, help_heading = "Densify options", default_value = "2000000")]
    pub max_new_points_per_step: u32,
    /// Byte budget the cap stage derives `max_out_points` from.
    #[arg(long, help_heading = "Densify options", default_value = "4000000000")]
    pub max_buffer_bytes: u64,

    /// Zero the (m,v) Adam state for newly scattered Gaussians instead of
    /// inheriting their parent's.
    #[arg(long, help_heading = "Densify options", default_value = "true")]
    pub reset_new_state: bool,

    /// Cap on in-flight command submissions (spec §5's queue gate).
    #[arg(long, help_heading = "Orchestrator options", default_value = "2")]
    pub queue_gate: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::parse_from([""])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_from_no_args() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.sh_degree, 3);
        assert!(cfg.lr_pos > 0.0);
    }
}
