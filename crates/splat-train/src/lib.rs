//! Optimizer, densify/prune compactor, and orchestrator for training a
//! scene of Gaussians against a set of posed images (C10-C13).

pub mod config;
pub mod cubecl;
pub mod densify;
pub mod metric;
pub mod optimizer;
pub mod scene;
pub mod trainer;

pub use config::TrainConfig;
pub use metric::MetricAccumulator;
pub use scene::GpuScene;
pub use trainer::{DensifyStats, SplatTrainer, StepStats};
