//! # Dense-growth classifier.

pub mod bottleneck;
pub mod model;
pub mod stage;
pub mod transition;

pub use bottleneck::{DenseBottleneck, DenseBottleneckConfig, DenseBottleneckMeta};
pub use model::{DenseNet, DenseNetConfig};
pub use stage::{DenseStage, DenseStageConfig, DenseStageMeta};
pub use transition::{Transition, TransitionConfig, TransitionMeta};
