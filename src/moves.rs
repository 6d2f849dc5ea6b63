//! Position adjustments applied in position space after scaling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;

use crate::aes::{Axis, Channel};
use crate::error::{PlotError, Result};
use crate::ir::ScaledFrame;
use crate::scale::{Scale, ScaleKind};
use crate::transform::seed_for;

/// What dodge does with slots of groups absent at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DodgeEmpty {
    /// Leave the slot empty.
    #[default]
    Keep,
    /// Remove the slot, narrowing the total width.
    Drop,
    /// Let present groups fill the full width.
    Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NormFunc {
    #[default]
    Max,
    Min,
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "move", rename_all = "snake_case")]
pub enum Move {
    #[default]
    Identity,
    Dodge {
        empty: DodgeEmpty,
        gap: f64,
        by: Option<Vec<Channel>>,
    },
    Stack {
        diverging: bool,
    },
    Jitter {
        /// Fraction of the mark width on the orient axis.
        width: f64,
        x: f64,
        y: f64,
        seed: Option<u64>,
    },
    Shift {
        x: f64,
        y: f64,
    },
    Norm {
        func: NormFunc,
        percent: bool,
        by: Option<Vec<Channel>>,
    },
    /// Beeswarm: spread points along the orient axis so none overlap.
    Swarm {
        /// Point diameter as a fraction of the value axis extent.
        size: f64,
    },
}

pub struct MoveContext<'a> {
    pub layer: usize,
    pub orient: Axis,
    pub x: &'a Scale,
    pub y: &'a Scale,
    pub seed: u64,
}

impl MoveContext<'_> {
    fn scale(&self, axis: Axis) -> &Scale {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

impl Move {
    pub fn dodge() -> Move {
        Move::Dodge { empty: DodgeEmpty::Keep, gap: 0.0, by: None }
    }

    pub fn stack() -> Move {
        Move::Stack { diverging: false }
    }

    pub fn jitter(width: f64) -> Move {
        Move::Jitter { width, x: 0.0, y: 0.0, seed: None }
    }

    pub fn swarm() -> Move {
        Move::Swarm { size: 0.02 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Move::Identity => "identity",
            Move::Dodge { .. } => "dodge",
            Move::Stack { .. } => "stack",
            Move::Jitter { .. } => "jitter",
            Move::Shift { .. } => "shift",
            Move::Norm { .. } => "norm",
            Move::Swarm { .. } => "swarm",
        }
    }

    /// Check the move can operate on the layer's scales.
    pub fn check(&self, ctx: &MoveContext) -> Result<()> {
        match self {
            Move::Dodge { .. } => {
                let scale = ctx.scale(ctx.orient);
                if scale.kind() != ScaleKind::Categorical {
                    return Err(self.not_applicable(
                        ctx,
                        ctx.orient.channel(),
                        "requires a categorical position axis".to_string(),
                    ));
                }
            }
            Move::Stack { .. } | Move::Norm { .. } => {
                let axis = ctx.orient.other();
                let scale = ctx.scale(axis);
                if scale.kind() != ScaleKind::Continuous || !scale.transform.is_linear() {
                    return Err(self.not_applicable(
                        ctx,
                        axis.channel(),
                        "requires an untransformed continuous value axis".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn apply(&self, mut frame: ScaledFrame, ctx: &MoveContext) -> Result<ScaledFrame> {
        self.check(ctx)?;
        match self {
            Move::Identity => {}
            Move::Dodge { empty, gap, by } => dodge(&mut frame, ctx.orient, *empty, *gap, by.as_deref()),
            Move::Stack { diverging } => self.apply_stack(&mut frame, ctx, *diverging)?,
            Move::Jitter { width, x, y, seed } => {
                jitter(&mut frame, ctx.orient, *width, (*x, *y), seed.unwrap_or(ctx.seed))
            }
            Move::Shift { x, y } => {
                for row in 0..frame.len {
                    shift(&mut frame, Axis::X, ctx.orient, row, *x);
                    shift(&mut frame, Axis::Y, ctx.orient, row, *y);
                }
            }
            Move::Norm { func, percent, by } => norm(&mut frame, ctx.orient.other(), *func, *percent, by.as_deref()),
            Move::Swarm { size } => swarm(&mut frame, ctx, *size),
        }
        Ok(frame)
    }

    fn apply_stack(&self, frame: &mut ScaledFrame, ctx: &MoveContext, diverging: bool) -> Result<()> {
        let axis = ctx.orient.other();
        let (Some(positions), Some(values)) = (frame.get(ctx.orient.channel()), frame.get(axis.channel())) else {
            return Ok(());
        };
        let positions = positions.to_vec();
        let values = values.to_vec();
        let baselines = frame.get(Channel::Baseline).map(|b| b.to_vec()).unwrap_or_else(|| vec![0.0; frame.len]);

        // running (positive, negative) offset per orient position
        let mut offsets: HashMap<u64, (f64, f64)> = HashMap::new();
        let mut new_base = baselines.clone();
        let mut deltas = vec![0.0; frame.len];
        for row in 0..frame.len {
            let span = values[row] - baselines[row];
            if !span.is_finite() || !positions[row].is_finite() {
                continue;
            }
            if span < 0.0 && !diverging {
                return Err(self.not_applicable(
                    ctx,
                    axis.channel(),
                    format!("cannot stack negative value {} without diverging", values[row]),
                ));
            }
            let entry = offsets.entry(positions[row].to_bits()).or_insert((baselines[row], baselines[row]));
            let start = if span < 0.0 { &mut entry.1 } else { &mut entry.0 };
            new_base[row] = *start;
            *start += span;
            deltas[row] = *start - values[row];
        }

        frame.set(Channel::Baseline, new_base);
        for channel in [axis.channel(), axis.min_channel(), axis.max_channel()] {
            if let Some(column) = frame.get_mut(channel) {
                for (v, d) in column.iter_mut().zip(&deltas) {
                    *v += d;
                }
            }
        }
        Ok(())
    }

    fn not_applicable(&self, ctx: &MoveContext, channel: Channel, reason: String) -> PlotError {
        PlotError::MoveApplicability { channel, layer: ctx.layer, operation: self.name(), reason }
    }
}

/// Apply moves in declared order, each consuming the previous output.
pub fn apply_all(moves: &[Move], frame: ScaledFrame, ctx: &MoveContext) -> Result<ScaledFrame> {
    moves.iter().try_fold(frame, |frame, m| {
        tracing::trace!(layer = ctx.layer, operation = m.name(), "apply move");
        m.apply(frame, ctx)
    })
}

fn grouping_channels(frame: &ScaledFrame, by: Option<&[Channel]>) -> Vec<Channel> {
    match by {
        Some(channels) => channels.to_vec(),
        None => frame.keys.keys().copied().collect(),
    }
}

/// Translate a row along an axis, carrying its extent columns.
fn shift(frame: &mut ScaledFrame, axis: Axis, orient: Axis, row: usize, delta: f64) {
    if delta == 0.0 {
        return;
    }
    let mut channels = vec![axis.channel(), axis.min_channel(), axis.max_channel()];
    if axis != orient {
        channels.extend([Channel::Baseline, Channel::Lower, Channel::Upper]);
    }
    for channel in channels {
        if let Some(column) = frame.get_mut(channel) {
            column[row] += delta;
        }
    }
}

fn dodge(frame: &mut ScaledFrame, orient: Axis, empty: DodgeEmpty, gap: f64, by: Option<&[Channel]>) {
    let channels = grouping_channels(frame, by);
    let groups = frame.groups(&channels);
    let n = groups.len();
    if n == 0 {
        return;
    }
    let mut slot_of = vec![0usize; frame.len];
    for (slot, (_, rows)) in groups.iter().enumerate() {
        for &row in rows {
            slot_of[row] = slot;
        }
    }
    let Some(positions) = frame.get(orient.channel()).map(|p| p.to_vec()) else {
        return;
    };
    let widths = frame.get(Channel::Width).map(|w| w.to_vec()).unwrap_or_else(|| vec![0.8; frame.len]);

    // slots present at each position, in slot order
    let mut present: HashMap<u64, Vec<usize>> = HashMap::new();
    for row in 0..frame.len {
        let slots = present.entry(positions[row].to_bits()).or_default();
        if !slots.contains(&slot_of[row]) {
            slots.push(slot_of[row]);
        }
    }
    for slots in present.values_mut() {
        slots.sort_unstable();
    }

    let mut new_widths = widths.clone();
    for row in 0..frame.len {
        let slots = &present[&positions[row].to_bits()];
        let (index, count, total) = match empty {
            DodgeEmpty::Keep => (slot_of[row], n, widths[row]),
            DodgeEmpty::Drop => {
                let m = slots.len();
                let index = slots.iter().position(|&s| s == slot_of[row]).unwrap_or(0);
                (index, m, widths[row] * m as f64 / n as f64)
            }
            DodgeEmpty::Fill => {
                let index = slots.iter().position(|&s| s == slot_of[row]).unwrap_or(0);
                (index, slots.len(), widths[row])
            }
        };
        let slot_width = total / count as f64;
        let centre = positions[row] - total / 2.0 + slot_width * (index as f64 + 0.5);
        shift(frame, orient, orient, row, centre - positions[row]);
        new_widths[row] = slot_width * (1.0 - gap);
    }
    frame.set(Channel::Width, new_widths);
}

fn jitter(frame: &mut ScaledFrame, orient: Axis, width: f64, amounts: (f64, f64), seed: u64) {
    let channels: Vec<Channel> = frame.keys.keys().copied().collect();
    let widths = frame.get(Channel::Width).map(|w| w.to_vec()).unwrap_or_else(|| vec![0.0; frame.len]);
    for (key, rows) in frame.groups(&channels) {
        let mut rng = StdRng::seed_from_u64(seed_for(seed, &key));
        for row in rows {
            for axis in [Axis::X, Axis::Y] {
                let mut scale = match axis {
                    Axis::X => amounts.0,
                    Axis::Y => amounts.1,
                };
                if axis == orient {
                    scale += width * widths[row];
                }
                let offset = rng.gen_range(-0.5..0.5) * scale;
                shift(frame, axis, orient, row, offset);
            }
        }
    }
}

fn norm(frame: &mut ScaledFrame, axis: Axis, func: NormFunc, percent: bool, by: Option<&[Channel]>) {
    let channels = grouping_channels(frame, by);
    let Some(values) = frame.get(axis.channel()).map(|v| v.to_vec()) else {
        return;
    };
    for (_, rows) in frame.groups(&channels) {
        let vals: Vec<f64> = rows.iter().map(|&r| values[r]).filter(|v| v.is_finite()).collect();
        if vals.is_empty() {
            continue;
        }
        let denom = match func {
            NormFunc::Max => vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            NormFunc::Min => vals.iter().copied().fold(f64::INFINITY, f64::min),
            NormFunc::Sum => vals.iter().sum(),
            NormFunc::Mean => vals.iter().sum::<f64>() / vals.len() as f64,
        };
        if denom == 0.0 || !denom.is_finite() {
            continue;
        }
        let factor = (if percent { 100.0 } else { 1.0 }) / denom;
        for channel in [
            axis.channel(),
            axis.min_channel(),
            axis.max_channel(),
            Channel::Baseline,
            Channel::Lower,
            Channel::Upper,
        ] {
            if let Some(column) = frame.get_mut(channel) {
                for &row in &rows {
                    column[row] *= factor;
                }
            }
        }
    }
}

/// Length of an axis in position units, counting a full slot per category.
fn axis_length(scale: &Scale) -> f64 {
    let (lo, hi) = scale.position_extent();
    let len = if scale.is_categorical() { hi - lo + 1.0 } else { hi - lo };
    if len.is_finite() && len > 0.0 {
        len
    } else {
        1.0
    }
}

/// Place the points at each orient position one by one in value order, each
/// at the free spot nearest the centre line. Works in axis-normalised units
/// where `size` is the point diameter; points pushed past the mark width are
/// clamped to its edge.
fn swarm(frame: &mut ScaledFrame, ctx: &MoveContext, size: f64) {
    let orient = ctx.orient;
    let (Some(positions), Some(values)) = (frame.get(orient.channel()), frame.get(orient.other().channel())) else {
        return;
    };
    let positions = positions.to_vec();
    let values = values.to_vec();
    let widths = frame.get(Channel::Width).map(|w| w.to_vec()).unwrap_or_else(|| vec![0.8; frame.len]);
    let orient_len = axis_length(ctx.scale(orient));
    let value_len = axis_length(ctx.scale(orient.other()));
    let diameter = size.abs();

    let mut swarms: HashMap<u64, Vec<usize>> = HashMap::new();
    for row in 0..frame.len {
        if positions[row].is_finite() && values[row].is_finite() {
            swarms.entry(positions[row].to_bits()).or_default().push(row);
        }
    }

    let mut clamped = 0;
    for mut rows in swarms.into_values() {
        rows.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let mut placed: Vec<(f64, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let v = values[row] / value_len;
            let offset = free_spot(&placed, v, diameter);
            placed.push((offset, v));

            let limit = widths[row].abs() / 2.0;
            let delta = offset * orient_len;
            if delta.abs() > limit {
                clamped += 1;
            }
            shift(frame, orient, orient, row, delta.clamp(-limit, limit));
        }
    }
    if clamped > 0 {
        tracing::warn!(
            layer = ctx.layer,
            "{:.1}% of the points cannot be placed; consider a smaller swarm size",
            100.0 * clamped as f64 / frame.len.max(1) as f64
        );
    }
}

/// Offset nearest zero at which a point at `v` clears every placed point.
fn free_spot(placed: &[(f64, f64)], v: f64, diameter: f64) -> f64 {
    let neighbours: Vec<(f64, f64)> = placed.iter().copied().filter(|(_, pv)| (v - pv).abs() < diameter).collect();
    let mut candidates = vec![0.0];
    for &(u, pv) in &neighbours {
        let dy = v - pv;
        let dx = (diameter * diameter - dy * dy).max(0.0).sqrt() * 1.05;
        candidates.extend([u - dx, u + dx]);
    }
    candidates.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    let clear = |c: f64| {
        neighbours
            .iter()
            .all(|&(u, pv)| (c - u).powi(2) + (v - pv).powi(2) >= diameter * diameter * (1.0 - 1e-9))
    };
    candidates.into_iter().find(|&c| clear(c)).unwrap_or(0.0)
}
