use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aes::{Aesthetics, Axis, Channel};
use crate::data::{DType, Dataset, Frame};
use crate::error::Warning;
use crate::facet::FacetSpec;
use crate::mark::Mark;
use crate::moves::Move;
use crate::scale::{Scale, ScaleKind, ScaleSpec, Tick, Transform};
use crate::theme::Rgb;
use crate::transform::Stat;

// =============================================================================
// Phase 1: Resolution
// =============================================================================

/// A plot whose layer mappings have been merged with the plot defaults and
/// validated against the data.
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub layers: Vec<ResolvedLayer>,
    pub facet: Option<FacetSpec>,
    pub scales: BTreeMap<Channel, ScaleSpec>,
}

#[derive(Debug, Clone)]
pub struct ResolvedLayer {
    pub index: usize,
    pub data: Arc<Dataset>,
    /// Layer mappings over plot defaults, minus channels the mark cannot encode.
    pub aes: Aesthetics,
    pub stat: Stat,
    pub moves: Vec<Move>,
    pub mark: Mark,
    pub orient: Axis,
    /// Channels whose values define the layer's groups.
    pub grouping: Vec<Channel>,
    /// Declared column type per mapped channel.
    pub dtypes: BTreeMap<Channel, DType>,
    /// Visual channels set to a fixed value instead of a column.
    pub literals: BTreeMap<Channel, Visual>,
}

impl ResolvedLayer {
    /// The dependent (value) axis.
    pub fn value_axis(&self) -> Axis {
        self.orient.other()
    }
}

// =============================================================================
// Phase 2: Transformation
// =============================================================================

/// One layer's rows falling in one panel, before and after its stat.
#[derive(Debug, Clone)]
pub struct LayerFrame {
    pub layer: usize,
    pub panel: usize,
    /// Source row indices into the layer's dataset, ascending.
    pub rows: Vec<usize>,
    pub raw: Frame,
    pub stat: Frame,
}

// =============================================================================
// Phase 3: Scaling
// =============================================================================

/// Every fitted scale of a plot.
///
/// Position scales are fit once per sharing cell; panels in the same cell
/// hold the same `Arc`. Visual scales are shared by every panel.
#[derive(Debug, Clone)]
pub struct ScaleSystem {
    pub panels: Vec<PanelScales>,
    pub visual: BTreeMap<Channel, Arc<Scale>>,
}

#[derive(Debug, Clone)]
pub struct PanelScales {
    pub x: Arc<Scale>,
    pub y: Arc<Scale>,
}

impl ScaleSystem {
    pub fn axis(&self, panel: usize, axis: Axis) -> Option<&Arc<Scale>> {
        let scales = self.panels.get(panel)?;
        Some(match axis {
            Axis::X => &scales.x,
            Axis::Y => &scales.y,
        })
    }

    /// The scale a channel is mapped through in a panel.
    pub fn get(&self, panel: usize, channel: Channel) -> Option<&Arc<Scale>> {
        match channel.axis() {
            Some(axis) => self.axis(panel, axis),
            None => self.visual.get(&channel.scale_channel()?),
        }
    }
}

/// A visual property value produced by a scale or a literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Visual {
    Color(Rgb),
    Number(f64),
    Shape(String),
}

/// Layer data in position space, ready for moves and marks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaledFrame {
    pub len: usize,
    /// Position-space columns, including the internal `Width` and `Baseline`.
    pub positions: BTreeMap<Channel, Vec<f64>>,
    pub visuals: BTreeMap<Channel, Vec<Visual>>,
    pub labels: Option<Vec<String>>,
    /// Raw values of the grouping channels, as keys.
    pub keys: BTreeMap<Channel, Vec<String>>,
}

impl ScaledFrame {
    pub fn get(&self, channel: Channel) -> Option<&[f64]> {
        self.positions.get(&channel).map(|v| v.as_slice())
    }

    pub fn get_mut(&mut self, channel: Channel) -> Option<&mut Vec<f64>> {
        self.positions.get_mut(&channel)
    }

    pub fn set(&mut self, channel: Channel, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.len);
        self.positions.insert(channel, values);
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.positions.contains_key(&channel)
    }

    /// Composite key of a row over the given channels.
    pub fn key(&self, row: usize, channels: &[Channel]) -> String {
        channels
            .iter()
            .filter_map(|c| self.keys.get(c).map(|k| k[row].as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Composite key of a row over every grouping channel.
    pub fn group_key(&self, row: usize) -> String {
        self.keys.values().map(|k| k[row].as_str()).collect::<Vec<_>>().join(", ")
    }

    /// Row indices grouped by the given channels, first-seen order.
    pub fn groups(&self, channels: &[Channel]) -> Vec<(String, Vec<usize>)> {
        let mut out: Vec<(String, Vec<usize>)> = Vec::new();
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        for row in 0..self.len {
            let key = self.key(row, channels);
            match index.get(&key) {
                Some(&g) => out[g].1.push(row),
                None => {
                    index.insert(key.clone(), out.len());
                    out.push((key, vec![row]));
                }
            }
        }
        out
    }
}

/// A panel's resolved axis in position space.
#[derive(Debug, Clone, Serialize)]
pub struct AxisFrame {
    #[serde(skip)]
    pub scale: Arc<Scale>,
    pub kind: ScaleKind,
    pub transform: Transform,
    /// Visible range in position space.
    pub range: (f64, f64),
    pub reverse: bool,
    pub ticks: Vec<Tick>,
}

impl AxisFrame {
    /// Map a position to [0, 1] across the visible range.
    pub fn to_unit(&self, pos: f64) -> f64 {
        let (lo, hi) = self.range;
        let t = if hi > lo { (pos - lo) / (hi - lo) } else { 0.5 };
        if self.reverse {
            1.0 - t
        } else {
            t
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateFrame {
    pub x: AxisFrame,
    pub y: AxisFrame,
}

impl CoordinateFrame {
    pub fn axis(&self, axis: Axis) -> &AxisFrame {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }
}

// =============================================================================
// Phase 4: Compilation (Scene Graph)
// =============================================================================

/// The fully resolved plot handed to a rendering surface.
#[derive(Debug, Clone, Serialize)]
pub struct SceneGraph {
    pub nrow: usize,
    pub ncol: usize,
    pub panels: Vec<PanelScene>,
    pub legends: Vec<Legend>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelScene {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub title: Option<String>,
    pub coord: CoordinateFrame,
    pub layers: Vec<LayerScene>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerScene {
    pub layer: usize,
    pub mark: &'static str,
    pub commands: Vec<DrawCommand>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Legend {
    pub channel: Channel,
    pub title: String,
    pub entries: Vec<LegendEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegendEntry {
    pub label: String,
    pub value: Visual,
}

/// Resolved visual properties of one drawn primitive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Style {
    pub color: Rgb,
    pub alpha: f64,
    /// Point diameter, line width or font size depending on the primitive.
    pub size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
}

/// Drawing instructions in position space; the backend maps them through the
/// panel's coordinate frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawCommand {
    DrawPoint {
        at: (f64, f64),
        style: Style,
        legend: Option<String>,
    },
    DrawLine {
        points: Vec<(f64, f64)>,
        style: Style,
        legend: Option<String>,
    },
    DrawRect {
        // Top-Left, Bottom-Right
        tl: (f64, f64),
        br: (f64, f64),
        style: Style,
        legend: Option<String>,
    },
    DrawPolygon {
        points: Vec<(f64, f64)>,
        style: Style,
        legend: Option<String>,
    },
    DrawSegment {
        from: (f64, f64),
        to: (f64, f64),
        style: Style,
        legend: Option<String>,
    },
    DrawText {
        at: (f64, f64),
        text: String,
        style: Style,
        legend: Option<String>,
    },
}
