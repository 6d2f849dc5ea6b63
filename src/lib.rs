// Library exports for gramflow

pub mod aes;
pub mod data;
pub mod error;
pub mod mark;
pub mod parser;
pub mod runtime;
pub mod theme;

// Pipeline stages
pub mod compiler;
pub mod facet;
pub mod ir;
pub mod moves;
pub mod plot;
pub mod resolve;
pub mod scale;
pub mod transform;

pub use aes::{Aesthetics, Axis, Channel, Mapping};
pub use data::{Dataset, Value};
pub use error::{PlotError, Result, Warning};
pub use facet::{FacetSpec, Share};
pub use ir::{DrawCommand, SceneGraph};
pub use mark::Mark;
pub use moves::Move;
pub use plot::{Layer, Plot};
pub use runtime::{ScaleState, Session};
pub use scale::{Order, ScaleKind, ScaleSpec, Transform};
pub use theme::Theme;
pub use transform::Stat;

use serde::{Deserialize, Serialize};

/// Knobs that change pipeline results but not appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Seed for jitter and bootstrap resampling.
    pub seed: u64,
    /// Resamples drawn for bootstrap confidence intervals.
    pub bootstrap: usize,
    pub drop_empty_panels: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            bootstrap: 1000,
            drop_empty_panels: false,
        }
    }
}
