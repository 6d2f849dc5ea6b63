//! Stat transforms: per-group statistics computed in data space before
//! scaling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::aes::{Axis, Channel};
use crate::data::{Frame, Value};
use crate::error::{record, PlotError, Result, TransformGroupError, Warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Estimator {
    Mean,
    Median,
    Sum,
    Min,
    Max,
    Count,
    Std,
}

impl Estimator {
    pub fn parse(name: &str) -> Option<Estimator> {
        Some(match name {
            "mean" => Estimator::Mean,
            "median" => Estimator::Median,
            "sum" => Estimator::Sum,
            "min" => Estimator::Min,
            "max" => Estimator::Max,
            "count" => Estimator::Count,
            "std" | "sd" => Estimator::Std,
            _ => return None,
        })
    }

    /// Estimate over a non-empty slice.
    pub fn estimate(&self, values: &[f64]) -> f64 {
        let n = values.len() as f64;
        match self {
            Estimator::Mean => values.iter().sum::<f64>() / n,
            Estimator::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                percentile(&sorted, 0.5)
            }
            Estimator::Sum => values.iter().sum(),
            Estimator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Estimator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Estimator::Count => n,
            Estimator::Std => std_dev(values),
        }
    }
}

/// Interval drawn around an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", content = "param", rename_all = "lowercase")]
pub enum ErrorBar {
    /// Estimate ± k standard deviations.
    Sd(f64),
    /// Estimate ± k standard errors.
    Se(f64),
    /// Percentile interval of the given width (percent).
    Pi(f64),
    /// Bootstrap confidence interval of the given width (percent).
    Ci(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistStat {
    Count,
    Density,
    Proportion,
}

/// How violin widths compare across violins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolinNorm {
    /// Densities share one maximum, so areas stay comparable.
    #[default]
    Area,
    /// Every violin reaches the full mark width.
    Width,
}

/// A per-group statistical transform.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "stat", rename_all = "snake_case")]
pub enum Stat {
    #[default]
    Identity,
    Aggregate {
        func: Estimator,
        errorbar: Option<ErrorBar>,
    },
    Count,
    Hist {
        bins: Option<usize>,
        binwidth: Option<f64>,
        #[serde(rename = "measure")]
        stat: HistStat,
    },
    Kde {
        bw_adjust: f64,
        gridsize: usize,
        cut: f64,
    },
    PolyFit {
        order: usize,
        gridsize: usize,
    },
    /// Quartiles with whiskers at the most extreme data within `whis` IQRs of
    /// the box; points beyond the whiskers become outlier rows.
    Box {
        whis: f64,
    },
    /// KDE along the value axis at each orient position.
    Violin {
        bw_adjust: f64,
        gridsize: usize,
        cut: f64,
        norm: ViolinNorm,
    },
}

/// Per-layer parameters a stat runs with.
#[derive(Debug, Clone)]
pub struct StatContext<'a> {
    pub layer: usize,
    pub orient: Axis,
    pub grouping: &'a [Channel],
    pub seed: u64,
    pub bootstrap: usize,
}

impl Stat {
    pub fn mean() -> Stat {
        Stat::Aggregate { func: Estimator::Mean, errorbar: None }
    }

    pub fn aggregate(func: Estimator) -> Stat {
        Stat::Aggregate { func, errorbar: None }
    }

    pub fn hist() -> Stat {
        Stat::Hist { bins: None, binwidth: None, stat: HistStat::Count }
    }

    pub fn kde() -> Stat {
        Stat::Kde { bw_adjust: 1.0, gridsize: 200, cut: 3.0 }
    }

    pub fn polyfit(order: usize) -> Stat {
        Stat::PolyFit { order, gridsize: 100 }
    }

    pub fn boxplot() -> Stat {
        Stat::Box { whis: 1.5 }
    }

    pub fn violin() -> Stat {
        Stat::Violin { bw_adjust: 1.0, gridsize: 100, cut: 2.0, norm: ViolinNorm::Area }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stat::Identity => "identity",
            Stat::Aggregate { .. } => "aggregate",
            Stat::Count => "count",
            Stat::Hist { .. } => "hist",
            Stat::Kde { .. } => "kde",
            Stat::PolyFit { .. } => "polyfit",
            Stat::Box { .. } => "box",
            Stat::Violin { .. } => "violin",
        }
    }

    /// Input channels the stat reads.
    pub fn requires(&self, orient: Axis) -> Vec<Channel> {
        match self {
            Stat::Identity => vec![],
            Stat::Count | Stat::Hist { .. } | Stat::Kde { .. } => vec![orient.channel()],
            Stat::Aggregate { .. } | Stat::PolyFit { .. } | Stat::Box { .. } | Stat::Violin { .. } => {
                vec![orient.channel(), orient.other().channel()]
            }
        }
    }

    /// Output channels the stat computes.
    pub fn produces(&self, orient: Axis) -> Vec<Channel> {
        let value = orient.other();
        match self {
            Stat::Identity => vec![],
            Stat::Aggregate { errorbar: Some(_), .. } => {
                vec![value.channel(), value.min_channel(), value.max_channel()]
            }
            Stat::Aggregate { errorbar: None, .. } | Stat::Count | Stat::Kde { .. } | Stat::PolyFit { .. } => {
                vec![value.channel()]
            }
            Stat::Hist { .. } => vec![value.channel(), orient.min_channel(), orient.max_channel()],
            Stat::Box { .. } => vec![
                value.channel(),
                value.min_channel(),
                value.max_channel(),
                Channel::Lower,
                Channel::Upper,
            ],
            Stat::Violin { .. } => vec![value.channel(), Channel::Density],
        }
    }

    /// Smallest group the stat can transform.
    pub fn min_group_size(&self) -> usize {
        match self {
            Stat::Kde { .. } | Stat::Violin { .. } => 2,
            Stat::PolyFit { order, .. } => order + 1,
            _ => 1,
        }
    }

    /// Transform a layer-panel frame group by group and concatenate.
    ///
    /// Undersized groups are dropped with a `TransformGroup` warning.
    pub fn apply(&self, frame: &Frame, ctx: &StatContext, warnings: &mut Vec<Warning>) -> Result<Frame> {
        if let Stat::Identity = self {
            return Ok(frame.clone());
        }
        if frame.is_empty() {
            return Ok(Frame::new(0));
        }
        let orient = ctx.orient.channel();
        let value = ctx.orient.other().channel();
        let grouping: Vec<Channel> = ctx.grouping.iter().copied().filter(|c| frame.contains(*c)).collect();

        let edges = match self {
            Stat::Hist { bins, binwidth, .. } => {
                let edges = bin_edges(&self.numbers(frame, orient, ctx)?, *bins, *binwidth)
                    .map_err(|reason| PlotError::InvalidData(format!("layer {}: {}", ctx.layer, reason)))?;
                Some(edges)
            }
            _ => None,
        };

        let mut parts = Vec::new();
        for (key, indices) in frame.group_by(&grouping) {
            let label = key.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
            let group = frame.take(&indices);
            let size = match self {
                Stat::PolyFit { .. } => distinct(&self.numbers(&group, orient, ctx)?),
                _ => group.len(),
            };
            if size < self.min_group_size() {
                record(
                    warnings,
                    Warning::TransformGroup(TransformGroupError {
                        layer: ctx.layer,
                        stat: self.name(),
                        group: label,
                        size,
                        required: self.min_group_size(),
                    }),
                );
                continue;
            }
            tracing::trace!(layer = ctx.layer, stat = self.name(), group = %label, rows = group.len(), "stat group");

            let mut out = match self {
                Stat::Identity => group.clone(),
                Stat::Aggregate { func, errorbar } => {
                    self.apply_aggregate(&group, ctx, &label, *func, *errorbar, orient, value)?
                }
                Stat::Count => count(&group, orient, value),
                Stat::Hist { stat, .. } => {
                    let edges = edges.as_deref().unwrap_or(&[]);
                    histogram(&self.numbers(&group, orient, ctx)?, edges, *stat, ctx.orient)
                }
                Stat::Kde { bw_adjust, gridsize, cut } => {
                    let data = self.numbers(&group, orient, ctx)?;
                    let bandwidth = silverman_bandwidth(&data) * bw_adjust;
                    let (grid, density) = compute_kde(&data, bandwidth, *gridsize, *cut);
                    Frame::new(0).with(orient, numbers(grid)).with(value, numbers(density))
                }
                Stat::PolyFit { order, gridsize } => {
                    let xs = self.numbers(&group, orient, ctx)?;
                    let ys = self.numbers(&group, value, ctx)?;
                    let (grid, fitted) = polyfit(&xs, &ys, *order, *gridsize);
                    Frame::new(0).with(orient, numbers(grid)).with(value, numbers(fitted))
                }
                Stat::Box { whis } => self.boxes(&group, ctx, *whis, orient, value)?,
                Stat::Violin { bw_adjust, gridsize, cut, norm } => {
                    let settings = KdeSettings { bw_adjust: *bw_adjust, gridsize: *gridsize, cut: *cut };
                    self.violins(&group, ctx, &label, settings, *norm, warnings)?
                }
            };
            for (channel, key_value) in grouping.iter().zip(&key) {
                if !out.contains(*channel) {
                    out.insert(*channel, vec![key_value.clone(); out.len()]);
                }
            }
            parts.push(out);
        }
        let mut out = Frame::concat(parts);
        if let Stat::Violin { norm: ViolinNorm::Area, .. } = self {
            rescale_density(&mut out);
        }
        Ok(out)
    }

    /// Finite numeric view of a channel, or `StatApplicability` if it holds
    /// non-numeric data.
    fn numbers(&self, frame: &Frame, channel: Channel, ctx: &StatContext) -> Result<Vec<f64>> {
        let values = frame.get(channel).ok_or_else(|| PlotError::StatApplicability {
            channel,
            layer: ctx.layer,
            stat: self.name(),
            reason: "channel is not mapped".to_string(),
        })?;
        let mut out = Vec::with_capacity(values.len());
        for v in values.iter().filter(|v| !v.is_null()) {
            match v {
                Value::Number(n) => out.push(*n),
                Value::Time(ms) => out.push(*ms as f64),
                other => {
                    return Err(PlotError::StatApplicability {
                        channel,
                        layer: ctx.layer,
                        stat: self.name(),
                        reason: format!("requires numeric data, found '{}'", other),
                    })
                }
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_aggregate(
        &self,
        group: &Frame,
        ctx: &StatContext,
        label: &str,
        func: Estimator,
        errorbar: Option<ErrorBar>,
        orient: Channel,
        value: Channel,
    ) -> Result<Frame> {
        let mut positions = Vec::new();
        let mut estimates = Vec::new();
        let mut lows = Vec::new();
        let mut highs = Vec::new();
        for (key, indices) in group.group_by(&[orient]) {
            let vals = self.numbers(&group.take(&indices), value, ctx)?;
            let Some(position) = key.into_iter().next() else { continue };
            if vals.is_empty() {
                continue;
            }
            let estimate = func.estimate(&vals);
            positions.push(position.clone());
            estimates.push(estimate);
            if let Some(bar) = errorbar {
                let seed = seed_for(ctx.seed, &format!("{}|{}", label, position));
                let (lo, hi) = error_interval(&vals, func, estimate, bar, seed, ctx.bootstrap);
                lows.push(lo);
                highs.push(hi);
            }
        }
        let mut out = Frame::new(0).with(orient, positions).with(value, numbers(estimates));
        if errorbar.is_some() {
            let axis = ctx.orient.other();
            out.insert(axis.min_channel(), numbers(lows));
            out.insert(axis.max_channel(), numbers(highs));
        }
        Ok(out)
    }

    /// One summary row per orient position, followed by a row per outlier
    /// whose box columns are null.
    fn boxes(&self, group: &Frame, ctx: &StatContext, whis: f64, orient: Channel, value: Channel) -> Result<Frame> {
        let axis = ctx.orient.other();
        let mut columns: [Vec<Value>; 6] = Default::default();
        let mut outliers: Vec<(Value, f64)> = Vec::new();
        for (key, indices) in group.group_by(&[orient]) {
            let mut vals = self.numbers(&group.take(&indices), value, ctx)?;
            let Some(position) = key.into_iter().next() else { continue };
            if vals.is_empty() {
                continue;
            }
            vals.sort_by(|a, b| a.total_cmp(b));
            let summary = BoxSummary::from_sorted(&vals, whis);
            let row = [summary.median, summary.low, summary.high, summary.q1, summary.q3];
            columns[0].push(position.clone());
            for (column, v) in columns[1..].iter_mut().zip(row) {
                column.push(Value::Number(v));
            }
            outliers.extend(summary.outliers.into_iter().map(|v| (position.clone(), v)));
        }
        for (position, v) in outliers {
            columns[0].push(position);
            columns[1].push(Value::Number(v));
            for column in columns[2..].iter_mut() {
                column.push(Value::Null);
            }
        }
        let [positions, medians, lows, highs, q1s, q3s] = columns;
        Ok(Frame::new(0)
            .with(orient, positions)
            .with(value, medians)
            .with(axis.min_channel(), lows)
            .with(axis.max_channel(), highs)
            .with(Channel::Lower, q1s)
            .with(Channel::Upper, q3s))
    }

    /// A density curve along the value axis for each orient position of the
    /// group. Positions with fewer than two values are skipped with a warning.
    fn violins(
        &self,
        group: &Frame,
        ctx: &StatContext,
        label: &str,
        settings: KdeSettings,
        norm: ViolinNorm,
        warnings: &mut Vec<Warning>,
    ) -> Result<Frame> {
        let orient = ctx.orient.channel();
        let value = ctx.orient.other().channel();
        let mut parts = Vec::new();
        for (key, indices) in group.group_by(&[orient]) {
            let data = self.numbers(&group.take(&indices), value, ctx)?;
            let Some(position) = key.into_iter().next() else { continue };
            if data.len() < 2 {
                let name = if label.is_empty() { position.to_string() } else { format!("{}, {}", label, position) };
                record(
                    warnings,
                    Warning::TransformGroup(TransformGroupError {
                        layer: ctx.layer,
                        stat: self.name(),
                        group: name,
                        size: data.len(),
                        required: 2,
                    }),
                );
                continue;
            }
            let bandwidth = silverman_bandwidth(&data) * settings.bw_adjust;
            let (grid, density) = compute_kde(&data, bandwidth, settings.gridsize, settings.cut);
            let mut part = Frame::new(0)
                .with(orient, vec![position; grid.len()])
                .with(value, numbers(grid))
                .with(Channel::Density, numbers(density));
            if norm == ViolinNorm::Width {
                rescale_density(&mut part);
            }
            parts.push(part);
        }
        Ok(Frame::concat(parts))
    }
}

#[derive(Debug, Clone, Copy)]
struct KdeSettings {
    bw_adjust: f64,
    gridsize: usize,
    cut: f64,
}

/// Five-number summary of a box with Tukey whiskers.
#[derive(Debug, Clone, PartialEq)]
struct BoxSummary {
    q1: f64,
    median: f64,
    q3: f64,
    low: f64,
    high: f64,
    outliers: Vec<f64>,
}

impl BoxSummary {
    /// `sorted` must be non-empty and ascending.
    fn from_sorted(sorted: &[f64], whis: f64) -> BoxSummary {
        let q1 = percentile(sorted, 0.25);
        let median = percentile(sorted, 0.5);
        let q3 = percentile(sorted, 0.75);
        let reach = if q3 > q1 { whis * (q3 - q1) } else { 0.0 };
        let (lo_fence, hi_fence) = (q1 - reach, q3 + reach);
        let (inside, outliers): (Vec<f64>, Vec<f64>) =
            sorted.iter().partition(|v| **v >= lo_fence && **v <= hi_fence);
        // the whiskers never retract inside the box
        let low = inside.iter().copied().fold(q1, f64::min);
        let high = inside.iter().copied().fold(q3, f64::max);
        BoxSummary { q1, median, q3, low, high, outliers }
    }
}

/// Scale the `Density` column so its maximum is 1.
fn rescale_density(frame: &mut Frame) {
    let Some(density) = frame.numbers(Channel::Density) else {
        return;
    };
    let max = density.iter().copied().filter(|d| d.is_finite()).fold(0.0, f64::max);
    if max <= 0.0 {
        return;
    }
    frame.insert(Channel::Density, numbers(density.into_iter().map(|d| d / max).collect()));
}

fn numbers(values: Vec<f64>) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| if v.is_finite() { Value::Number(v) } else { Value::Null })
        .collect()
}

fn distinct(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}

fn count(group: &Frame, orient: Channel, value: Channel) -> Frame {
    let mut positions = Vec::new();
    let mut counts = Vec::new();
    for (key, indices) in group.group_by(&[orient]) {
        if let Some(position) = key.into_iter().next() {
            positions.push(position);
            counts.push(Value::Number(indices.len() as f64));
        }
    }
    Frame::new(0).with(orient, positions).with(value, counts)
}

/// Derive a per-key seed so results do not depend on evaluation order.
pub(crate) fn seed_for(seed: u64, key: &str) -> u64 {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    seed ^ hash
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

fn error_interval(
    values: &[f64],
    func: Estimator,
    estimate: f64,
    bar: ErrorBar,
    seed: u64,
    n_boot: usize,
) -> (f64, f64) {
    match bar {
        ErrorBar::Sd(k) => {
            let err = k * std_dev(values);
            (estimate - err, estimate + err)
        }
        ErrorBar::Se(k) => {
            let err = k * std_dev(values) / (values.len() as f64).sqrt();
            (estimate - err, estimate + err)
        }
        ErrorBar::Pi(width) => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            interval(&sorted, width)
        }
        ErrorBar::Ci(width) => {
            if values.len() < 2 {
                return (f64::NAN, f64::NAN);
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let mut sample = vec![0.0; values.len()];
            let mut boots: Vec<f64> = (0..n_boot.max(1))
                .map(|_| {
                    for slot in sample.iter_mut() {
                        *slot = values[rng.gen_range(0..values.len())];
                    }
                    func.estimate(&sample)
                })
                .collect();
            boots.sort_by(|a, b| a.total_cmp(b));
            interval(&boots, width)
        }
    }
}

fn interval(sorted: &[f64], width: f64) -> (f64, f64) {
    let tail = (100.0 - width.clamp(0.0, 100.0)) / 200.0;
    (percentile(sorted, tail), percentile(sorted, 1.0 - tail))
}

fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    let n = sorted_data.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted_data[0];
    }

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        sorted_data[lower_idx]
    } else {
        let weight = rank - lower_idx as f64;
        sorted_data[lower_idx] * (1.0 - weight) + sorted_data[upper_idx] * weight
    }
}

/// Most bins a histogram may allocate.
const MAX_BINS: usize = 1_000_000;

/// Bin edges shared by every group of a layer panel.
fn bin_edges(values: &[f64], bins: Option<usize>, binwidth: Option<f64>) -> std::result::Result<Vec<f64>, String> {
    if values.is_empty() {
        return Ok(vec![]);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() {
        return Err(format!("cannot bin values spanning [{}, {}]", min, max));
    }

    let (count, width) = match (binwidth, bins) {
        (Some(w), _) if w > 0.0 => {
            let count = (range / w).ceil();
            if count > MAX_BINS as f64 {
                return Err(format!("binwidth {} over a range of {} needs more than {} bins", w, range, MAX_BINS));
            }
            ((count as usize).max(1), w)
        }
        (_, Some(n)) if n > MAX_BINS => return Err(format!("{} bins exceeds the limit of {}", n, MAX_BINS)),
        (_, Some(n)) if n > 0 => (n, if range == 0.0 { 1.0 } else { range / n as f64 }),
        // Sturges' rule
        _ => {
            let n = ((values.len() as f64).log2().ceil() as usize + 1).max(1);
            (n, if range == 0.0 { 1.0 } else { range / n as f64 })
        }
    };
    let start = if range == 0.0 { min - width / 2.0 } else { min };
    Ok((0..=count).map(|i| start + i as f64 * width).collect())
}

fn histogram(values: &[f64], edges: &[f64], stat: HistStat, orient: Axis) -> Frame {
    if edges.len() < 2 {
        return Frame::new(0);
    }
    let n_bins = edges.len() - 1;
    let start = edges[0];
    let width = edges[1] - edges[0];
    let mut counts = vec![0usize; n_bins];
    for &v in values {
        // the last bin is closed on the right
        let idx = (((v - start) / width).floor() as isize).clamp(0, n_bins as isize - 1) as usize;
        counts[idx] += 1;
    }

    let total = values.len().max(1) as f64;
    let heights: Vec<f64> = counts
        .iter()
        .map(|&c| match stat {
            HistStat::Count => c as f64,
            HistStat::Density => c as f64 / (total * width),
            HistStat::Proportion => c as f64 / total,
        })
        .collect();
    let centres: Vec<f64> = (0..n_bins).map(|i| (edges[i] + edges[i + 1]) / 2.0).collect();

    Frame::new(0)
        .with(orient.channel(), numbers(centres))
        .with(orient.min_channel(), numbers(edges[..n_bins].to_vec()))
        .with(orient.max_channel(), numbers(edges[1..].to_vec()))
        .with(orient.other().channel(), numbers(heights))
}

/// Silverman's rule of thumb for bandwidth selection
fn silverman_bandwidth(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    if n < 2.0 {
        return 1.0;
    }

    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let iqr = percentile(&sorted, 0.75) - percentile(&sorted, 0.25);

    // h = 0.9 * min(std, IQR/1.34) * n^(-1/5)
    let scale = if iqr > 0.0 { std_dev.min(iqr / 1.34) } else { std_dev };
    if scale <= 0.0 {
        return 1.0;
    }
    0.9 * scale * n.powf(-0.2)
}

fn gaussian_kernel(u: f64) -> f64 {
    const SQRT_2PI: f64 = 2.5066282746310002;
    (-0.5 * u * u).exp() / SQRT_2PI
}

/// Gaussian KDE evaluated on `gridsize` points spanning the data extended by
/// `cut` bandwidths on each side.
fn compute_kde(data: &[f64], bandwidth: f64, gridsize: usize, cut: f64) -> (Vec<f64>, Vec<f64>) {
    let n = data.len() as f64;
    if n == 0.0 || gridsize == 0 {
        return (vec![], vec![]);
    }

    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let start = min - cut * bandwidth;
    let end = max + cut * bandwidth;
    let step = if gridsize > 1 { (end - start) / (gridsize - 1) as f64 } else { 0.0 };

    let grid: Vec<f64> = (0..gridsize).map(|i| start + i as f64 * step).collect();
    let density = grid
        .iter()
        .map(|&g| data.iter().map(|&xi| gaussian_kernel((g - xi) / bandwidth)).sum::<f64>() / (n * bandwidth))
        .collect();
    (grid, density)
}

/// Least-squares polynomial fit evaluated on an even grid over the data.
fn polyfit(xs: &[f64], ys: &[f64], order: usize, gridsize: usize) -> (Vec<f64>, Vec<f64>) {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    let min = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    if pairs.is_empty() || gridsize == 0 {
        return (vec![], vec![]);
    }

    // Normal equations: (VᵀV) c = Vᵀy
    let m = order + 1;
    let mut a = vec![vec![0.0; m + 1]; m];
    for &(x, y) in &pairs {
        let powers: Vec<f64> = (0..m).map(|k| x.powi(k as i32)).collect();
        for i in 0..m {
            for j in 0..m {
                a[i][j] += powers[i] * powers[j];
            }
            a[i][m] += powers[i] * y;
        }
    }
    let coef = solve(a);

    let step = if gridsize > 1 { (max - min) / (gridsize - 1) as f64 } else { 0.0 };
    let grid: Vec<f64> = (0..gridsize).map(|i| min + i as f64 * step).collect();
    let fitted = grid
        .iter()
        .map(|&x| coef.iter().rev().fold(0.0, |acc, c| acc * x + c))
        .collect();
    (grid, fitted)
}

/// Gaussian elimination with partial pivoting on an augmented matrix.
fn solve(mut a: Vec<Vec<f64>>) -> Vec<f64> {
    let m = a.len();
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        let p = a[col][col];
        if p.abs() < 1e-12 {
            continue;
        }
        for row in (col + 1)..m {
            let factor = a[row][col] / p;
            for k in col..=m {
                a[row][k] -= factor * a[col][k];
            }
        }
    }
    let mut coef = vec![0.0; m];
    for row in (0..m).rev() {
        let tail: f64 = ((row + 1)..m).map(|k| a[row][k] * coef[k]).sum();
        coef[row] = if a[row][row].abs() < 1e-12 { 0.0 } else { (a[row][m] - tail) / a[row][row] };
    }
    coef
}
