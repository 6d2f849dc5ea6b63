//! The plot orchestrator: an immutable builder and the pipeline run that turns
//! it into a scene graph.
//!
//! Every builder call returns a new [`Plot`] that shares its unmodified parts
//! (dataset, layers, specs) with the original through `Arc`s, so a partially
//! built plot can serve as a template for several others.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::aes::{Aesthetics, Axis, Channel, Mapping};
use crate::compiler;
use crate::data::{Dataset, Frame, Value};
use crate::error::{record, PlotError, Result, Warning};
use crate::facet::{FacetLayout, FacetSpec};
use crate::ir::{LayerFrame, PanelScales, ResolvedLayer, ResolvedSpec, ScaleSystem, ScaledFrame, SceneGraph};
use crate::mark::Mark;
use crate::moves::{self, Move, MoveContext};
use crate::resolve::resolve;
use crate::runtime::{fingerprint, ScaleCache};
use crate::scale::{infer_kind, Scale, ScaleInput, ScaleKind, ScaleSpec};
use crate::theme::Theme;
use crate::transform::{Stat, StatContext};
use crate::PipelineOptions;

/// One (data, mappings, stat, moves, mark) unit of a plot.
#[derive(Debug, Clone)]
pub struct Layer {
    pub mark: Mark,
    pub stat: Stat,
    /// Applied in declared order.
    pub moves: Vec<Move>,
    pub aes: Aesthetics,
    /// Overrides the plot dataset.
    pub data: Option<Arc<Dataset>>,
    /// Forces the orientation instead of inferring it from scale kinds.
    pub orient: Option<Axis>,
    /// Whether plot-level mappings apply to this layer.
    pub inherit: bool,
}

impl Layer {
    pub fn new(mark: Mark) -> Self {
        Layer {
            mark,
            stat: Stat::Identity,
            moves: Vec::new(),
            aes: Aesthetics::new(),
            data: None,
            orient: None,
            inherit: true,
        }
    }

    pub fn map(mut self, channel: Channel, column: impl Into<String>) -> Self {
        self.aes = self.aes.with(channel, column);
        self
    }

    /// Set a channel to a literal value.
    pub fn set(mut self, channel: Channel, value: impl Into<Value>) -> Self {
        self.aes = self.aes.with_constant(channel, value);
        self
    }

    pub fn stat(mut self, stat: Stat) -> Self {
        self.stat = stat;
        self
    }

    pub fn with_move(mut self, adjustment: Move) -> Self {
        self.moves.push(adjustment);
        self
    }

    pub fn data(mut self, data: Arc<Dataset>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn orient(mut self, axis: Axis) -> Self {
        self.orient = Some(axis);
        self
    }

    pub fn no_inherit(mut self) -> Self {
        self.inherit = false;
        self
    }
}

/// The root plot description. Immutable: builder methods return a new plot.
#[derive(Debug, Clone, Default)]
pub struct Plot {
    data: Arc<Dataset>,
    defaults: Arc<Aesthetics>,
    layers: Vec<Arc<Layer>>,
    facet: Option<Arc<FacetSpec>>,
    scales: Arc<BTreeMap<Channel, ScaleSpec>>,
    theme: Arc<Theme>,
    options: PipelineOptions,
}

impl Plot {
    pub fn new(data: Dataset) -> Self {
        Self::from_shared(Arc::new(data))
    }

    pub fn from_shared(data: Arc<Dataset>) -> Self {
        Plot { data, ..Plot::default() }
    }

    /// Replace the plot dataset, keeping everything else.
    pub fn with_data(&self, data: Dataset) -> Plot {
        Plot { data: Arc::new(data), ..self.clone() }
    }

    /// Add a default mapping inherited by every layer.
    pub fn map(&self, channel: Channel, column: impl Into<String>) -> Plot {
        let defaults = (*self.defaults).clone().with(channel, column);
        Plot { defaults: Arc::new(defaults), ..self.clone() }
    }

    /// Add a default literal inherited by every layer.
    pub fn set(&self, channel: Channel, value: impl Into<Value>) -> Plot {
        let defaults = (*self.defaults).clone().with_constant(channel, value);
        Plot { defaults: Arc::new(defaults), ..self.clone() }
    }

    pub fn add(&self, layer: Layer) -> Plot {
        let mut next = self.clone();
        next.layers.push(Arc::new(layer));
        next
    }

    pub fn facet(&self, spec: FacetSpec) -> Plot {
        Plot { facet: Some(Arc::new(spec)), ..self.clone() }
    }

    /// Override the scale of a channel; `xmin`/`xmax` address the `x` scale.
    pub fn scale(&self, channel: Channel, spec: ScaleSpec) -> Plot {
        let channel = channel.scale_channel().unwrap_or(channel);
        let mut scales = (*self.scales).clone();
        scales.insert(channel, spec);
        Plot { scales: Arc::new(scales), ..self.clone() }
    }

    pub fn theme(&self, theme: Theme) -> Plot {
        Plot { theme: Arc::new(theme), ..self.clone() }
    }

    pub fn options(&self, options: PipelineOptions) -> Plot {
        Plot { options, ..self.clone() }
    }

    pub fn seed(&self, seed: u64) -> Plot {
        let options = PipelineOptions { seed, ..self.options.clone() };
        self.options(options)
    }

    pub fn data(&self) -> &Arc<Dataset> {
        &self.data
    }

    pub fn defaults(&self) -> &Aesthetics {
        &self.defaults
    }

    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    pub fn facet_spec(&self) -> Option<&FacetSpec> {
        self.facet.as_deref()
    }

    pub fn scale_specs(&self) -> &BTreeMap<Channel, ScaleSpec> {
        &self.scales
    }

    pub fn current_theme(&self) -> &Theme {
        &self.theme
    }

    pub fn pipeline_options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the full pipeline without caching.
    pub fn render(&self) -> Result<SceneGraph> {
        run(self, None)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Fitted scales of one channel: one scale per sharing cell.
#[derive(Debug, Clone)]
pub(crate) struct FittedChannel {
    /// Sharing cell of each panel.
    pub cells: Vec<usize>,
    pub scales: Vec<Arc<Scale>>,
}

impl FittedChannel {
    fn for_panel(&self, panel: usize) -> Option<&Arc<Scale>> {
        self.scales.get(*self.cells.get(panel)?)
    }
}

pub(crate) fn run(plot: &Plot, mut cache: Option<&mut ScaleCache>) -> Result<SceneGraph> {
    let (spec, mut warnings) = resolve(plot)?;
    let options = plot.pipeline_options();
    let theme = plot.current_theme();

    // Layout
    let mut datasets: Vec<&Dataset> = vec![plot.data().as_ref()];
    datasets.extend(spec.layers.iter().map(|l| l.data.as_ref()));
    let mut layout = FacetLayout::build(spec.facet.as_ref(), &datasets)?;

    let extracted: Vec<LayerRows> = spec
        .layers
        .iter()
        .map(|layer| extract(layer, &spec.scales, &mut warnings))
        .collect();
    let mut assignments: Vec<Vec<Vec<usize>>> = spec
        .layers
        .iter()
        .zip(&extracted)
        .map(|(layer, rows)| {
            layout
                .assign(spec.facet.as_ref(), &layer.data)
                .into_iter()
                .map(|panel| panel.into_iter().filter(|&i| rows.keep[i]).collect())
                .collect()
        })
        .collect();

    let drop_empty = options.drop_empty_panels || spec.facet.as_ref().is_some_and(|f| f.drop_empty);
    if drop_empty && spec.facet.is_some() {
        let keep: Vec<bool> = (0..layout.panels.len())
            .map(|p| assignments.iter().any(|layer| !layer[p].is_empty()))
            .collect();
        layout.retain(&keep);
        for layer in &mut assignments {
            let mut flags = keep.iter();
            layer.retain(|_| flags.next().copied().unwrap_or(true));
        }
    }
    tracing::debug!("layout: {} panels in a {}x{} grid", layout.panels.len(), layout.nrow, layout.ncol);

    // Stats, per panel then layer
    let mut frames: Vec<Vec<LayerFrame>> = Vec::with_capacity(layout.panels.len());
    for panel in 0..layout.panels.len() {
        let mut row = Vec::with_capacity(spec.layers.len());
        for (layer, rows) in spec.layers.iter().zip(&extracted) {
            let source = assignments[layer.index][panel].clone();
            let raw = rows.frame.take(&source);
            let ctx = StatContext {
                layer: layer.index,
                orient: layer.orient,
                grouping: &layer.grouping,
                seed: options.seed,
                bootstrap: options.bootstrap,
            };
            let stat = layer.stat.apply(&raw, &ctx, &mut warnings)?;
            tracing::trace!("panel {} layer {}: {} rows -> {} after {}", panel, layer.index, raw.len(), stat.len(), layer.stat.name());
            row.push(LayerFrame { layer: layer.index, panel, rows: source, raw, stat });
        }
        frames.push(row);
    }

    // Scales
    let mut fitted: BTreeMap<Channel, FittedChannel> = BTreeMap::new();
    for channel in scaled_channels(&spec) {
        let fit = || fit_channel(channel, &spec, &layout, &frames);
        let result = match cache.as_deref_mut() {
            Some(cache) => cache.get_or_fit(channel, fingerprint(plot, channel), fit)?,
            None => fit()?,
        };
        fitted.insert(channel, result);
    }
    let system = scale_system(&fitted, layout.panels.len())?;

    // Scale and move
    let mut scaled: Vec<Vec<ScaledFrame>> = Vec::with_capacity(frames.len());
    for (panel, row) in frames.iter().enumerate() {
        let panel_scales = &system.panels[panel];
        let mut out = Vec::with_capacity(row.len());
        for (layer, frame) in spec.layers.iter().zip(row) {
            let positioned = scale_frame(layer, &frame.stat, panel_scales, &system, theme)?;
            let ctx = MoveContext {
                layer: layer.index,
                orient: layer.orient,
                x: &panel_scales.x,
                y: &panel_scales.y,
                seed: options.seed,
            };
            out.push(moves::apply_all(&layer.moves, positioned, &ctx)?);
        }
        scaled.push(out);
    }

    let facet = spec.facet.as_ref();
    let shares = (
        facet.map(|f| f.share_x).unwrap_or_default(),
        facet.map(|f| f.share_y).unwrap_or_default(),
    );
    let panels = compiler::compile_panels(&layout, &spec, &scaled, &system, shares, theme);
    let legends = compiler::compile_legends(&spec, &system, theme)?;
    tracing::debug!("compiled {} panels, {} legends, {} warnings", panels.len(), legends.len(), warnings.len());

    Ok(SceneGraph {
        nrow: layout.nrow,
        ncol: layout.ncol,
        panels,
        legends,
        warnings,
    })
}

/// A layer's mapped columns over every dataset row, and which rows survive
/// missing-value and explicit-order filtering.
struct LayerRows {
    frame: Frame,
    keep: Vec<bool>,
}

fn extract(layer: &ResolvedLayer, scales: &BTreeMap<Channel, ScaleSpec>, warnings: &mut Vec<Warning>) -> LayerRows {
    let n = layer.data.n_rows();
    let mut frame = Frame::new(n);
    let mut keep = vec![true; n];

    for (channel, mapping) in layer.aes.iter() {
        let values = match mapping {
            Mapping::Column(name) => match layer.data.column(name) {
                Some(column) => column.values.clone(),
                None => continue,
            },
            Mapping::Constant(_) if channel.is_visual() => continue,
            Mapping::Constant(value) => vec![value.clone(); n],
        };

        if mapping.column().is_some() && channel != Channel::Text {
            let count = drop_rows(&mut keep, &values, Value::is_null);
            if count > 0 {
                record(
                    warnings,
                    Warning::DroppedRows { layer: layer.index, channel, count, reason: "missing".to_string() },
                );
            }
        }

        let levels = channel
            .scale_channel()
            .and_then(|c| scales.get(&c))
            .and_then(ScaleSpec::explicit_levels);
        if let Some(levels) = levels {
            let allowed: HashSet<String> = levels.iter().map(Value::key).collect();
            let count = drop_rows(&mut keep, &values, |v| !v.is_null() && !allowed.contains(&v.key()));
            if count > 0 {
                record(
                    warnings,
                    Warning::DroppedRows { layer: layer.index, channel, count, reason: "unlisted".to_string() },
                );
            }
        }

        frame.insert(channel, values);
    }
    LayerRows { frame, keep }
}

/// Clear `keep` where `drop` holds; returns how many kept rows were cleared.
fn drop_rows(keep: &mut [bool], values: &[Value], drop: impl Fn(&Value) -> bool) -> usize {
    let mut count = 0;
    for (flag, value) in keep.iter_mut().zip(values) {
        if *flag && drop(value) {
            *flag = false;
            count += 1;
        }
    }
    count
}

/// Channels that get a fitted scale: both position axes, plus every visual
/// channel some layer maps to a column.
fn scaled_channels(spec: &ResolvedSpec) -> Vec<Channel> {
    let mut channels = vec![Channel::X, Channel::Y];
    for channel in Channel::VISUAL {
        let mapped = spec
            .layers
            .iter()
            .any(|l| l.aes.get(channel).and_then(Mapping::column).is_some());
        if mapped {
            channels.push(channel);
        }
    }
    channels
}

fn family(channel: Channel) -> Vec<Channel> {
    match channel.axis() {
        Some(axis) => vec![axis.channel(), axis.min_channel(), axis.max_channel()],
        None => vec![channel],
    }
}

/// Fit one channel's scales, one per sharing cell.
pub(crate) fn fit_channel(
    channel: Channel,
    spec: &ResolvedSpec,
    layout: &FacetLayout,
    frames: &[Vec<LayerFrame>],
) -> Result<FittedChannel> {
    let scale_spec = spec.scales.get(&channel).cloned().unwrap_or_default();
    let facet = spec.facet.as_ref();
    let cells = match channel.axis() {
        Some(Axis::X) => layout.cells(facet.map(|f| f.share_x).unwrap_or_default()),
        Some(Axis::Y) => layout.cells(facet.map(|f| f.share_y).unwrap_or_default()),
        None => vec![0; layout.panels.len()],
    };
    let ncell = cells.iter().max().map_or(1, |m| m + 1);

    let mut scales = Vec::with_capacity(ncell);
    for cell in 0..ncell {
        let panels: Vec<usize> = (0..cells.len()).filter(|&p| cells[p] == cell).collect();
        let scale = fit_cell(channel, &scale_spec, spec, &panels, frames)?;
        scales.push(Arc::new(scale));
    }
    tracing::debug!("fit {} scale over {} cell(s)", channel, scales.len());
    Ok(FittedChannel { cells, scales })
}

/// Kind and categorical levels come from the raw mapped values, in source row
/// order; continuous and temporal extents from the stat output.
fn fit_cell(
    channel: Channel,
    scale_spec: &ScaleSpec,
    spec: &ResolvedSpec,
    panels: &[usize],
    frames: &[Vec<LayerFrame>],
) -> Result<Scale> {
    let family = family(channel);

    let mut raw = Vec::new();
    for layer in &spec.layers {
        let mut dtype = None;
        let mut values: Vec<(usize, &Value)> = Vec::new();
        for &panel in panels {
            let frame = &frames[panel][layer.index];
            for c in &family {
                if let Some(column) = frame.raw.get(*c) {
                    dtype = dtype.or_else(|| layer.dtypes.get(c).copied());
                    values.extend(frame.rows.iter().copied().zip(column.iter()));
                }
            }
        }
        if values.is_empty() && dtype.is_none() {
            continue;
        }
        values.sort_by_key(|(row, _)| *row);
        raw.push(ScaleInput {
            layer: layer.index,
            dtype,
            values: values.into_iter().map(|(_, v)| v).collect(),
        });
    }

    let kind = infer_kind(channel, scale_spec, &raw)?;
    if kind == ScaleKind::Categorical {
        return Scale::fit(channel, scale_spec, kind, &raw);
    }

    let mut computed = Vec::new();
    for layer in &spec.layers {
        let mut values = Vec::new();
        for &panel in panels {
            let frame = &frames[panel][layer.index];
            for c in &family {
                if let Some(column) = frame.stat.get(*c) {
                    values.extend(column.iter());
                }
            }
        }
        if !values.is_empty() {
            computed.push(ScaleInput { layer: layer.index, dtype: None, values });
        }
    }
    let inputs = if computed.is_empty() { &raw } else { &computed };
    Scale::fit(channel, scale_spec, kind, inputs)
}

fn scale_system(fitted: &BTreeMap<Channel, FittedChannel>, npanels: usize) -> Result<ScaleSystem> {
    let lookup = |channel: Channel, panel: usize| -> Result<Arc<Scale>> {
        fitted
            .get(&channel)
            .and_then(|f| f.for_panel(panel))
            .cloned()
            .ok_or_else(|| PlotError::ScaleFit {
                channel,
                layer: None,
                reason: format!("no fitted scale for panel {}", panel),
            })
    };
    let mut panels = Vec::with_capacity(npanels);
    for panel in 0..npanels {
        panels.push(PanelScales { x: lookup(Channel::X, panel)?, y: lookup(Channel::Y, panel)? });
    }
    let visual = fitted
        .iter()
        .filter(|(c, _)| c.is_visual())
        .filter_map(|(c, f)| f.scales.first().map(|s| (*c, s.clone())))
        .collect();
    Ok(ScaleSystem { panels, visual })
}

/// Map a layer's stat output into position and visual space, adding the
/// `Width` and `Baseline` columns moves and marks work from.
fn scale_frame(
    layer: &ResolvedLayer,
    frame: &Frame,
    panel: &PanelScales,
    system: &ScaleSystem,
    theme: &Theme,
) -> Result<ScaledFrame> {
    let mut out = ScaledFrame { len: frame.len(), ..ScaledFrame::default() };
    let axis_scale = |axis: Axis| match axis {
        Axis::X => &panel.x,
        Axis::Y => &panel.y,
    };

    for channel in frame.channels().collect::<Vec<_>>() {
        let Some(values) = frame.get(channel) else { continue };
        // box quartiles live on the value axis
        let axis = match channel {
            Channel::Lower | Channel::Upper => Some(layer.value_axis()),
            _ => channel.axis(),
        };
        if let Some(axis) = axis {
            let scale = axis_scale(axis);
            let positions = values
                .iter()
                .map(|v| if v.is_null() { Ok(f64::NAN) } else { scale.apply(v) })
                .collect::<Result<Vec<f64>>>()
                .map_err(|e| at_layer(e, layer.index))?;
            out.set(channel, positions);
        } else if channel.is_visual() {
            if let Some(scale) = system.visual.get(&channel) {
                let visuals = values
                    .iter()
                    .map(|v| scale.visual(v, theme))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| at_layer(e, layer.index))?;
                out.visuals.insert(channel, visuals);
            }
        } else if channel == Channel::Density {
            out.set(channel, values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect());
        } else if channel == Channel::Text {
            out.labels = Some(
                values
                    .iter()
                    .map(|v| if v.is_null() { String::new() } else { v.to_string() })
                    .collect(),
            );
        }
        if layer.grouping.contains(&channel) {
            out.keys.insert(channel, values.iter().map(Value::key).collect());
        }
    }

    let width = bar_widths(layer, &out, axis_scale(layer.orient), theme);
    out.set(Channel::Width, width);

    let value_scale = axis_scale(layer.value_axis());
    // Zero has no position on log scales; fall back to the domain floor.
    let baseline = if value_scale.is_categorical() {
        0.0
    } else {
        let zero = value_scale.position(0.0);
        if zero.is_finite() {
            zero
        } else {
            value_scale.position_extent().0
        }
    };
    out.set(Channel::Baseline, vec![baseline; out.len]);
    Ok(out)
}

/// Width of each row along the orient axis, in position units.
fn bar_widths(layer: &ResolvedLayer, frame: &ScaledFrame, orient_scale: &Scale, theme: &Theme) -> Vec<f64> {
    let orient = layer.orient;
    if let (Some(lo), Some(hi)) = (frame.get(orient.min_channel()), frame.get(orient.max_channel())) {
        return lo.iter().zip(hi).map(|(a, b)| (b - a).abs()).collect();
    }
    let fraction = match layer.mark {
        Mark::Bar { width: Some(w) } | Mark::Box { width: Some(w) } | Mark::Violin { width: Some(w) } => w,
        _ => theme.bar_width,
    };
    let unit = if orient_scale.is_categorical() {
        1.0
    } else {
        frame.get(orient.channel()).map(resolution).unwrap_or(1.0)
    };
    vec![unit * fraction; frame.len]
}

/// Smallest gap between distinct finite positions, or 1 when there is none.
fn resolution(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    let gap = sorted.windows(2).map(|w| w[1] - w[0]).fold(f64::INFINITY, f64::min);
    if gap.is_finite() && gap > 0.0 {
        gap
    } else {
        1.0
    }
}

fn at_layer(err: PlotError, index: usize) -> PlotError {
    match err {
        PlotError::ScaleMismatch { channel, layer: None, value } => {
            PlotError::ScaleMismatch { channel, layer: Some(index), value }
        }
        PlotError::ScaleFit { channel, layer: None, reason } => PlotError::ScaleFit { channel, layer: Some(index), reason },
        other => other,
    }
}
