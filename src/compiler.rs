use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aes::{Axis, Channel, Mapping};
use crate::error::Result;
use crate::facet::{FacetLayout, Share};
use crate::ir::{
    AxisFrame, CoordinateFrame, LayerScene, Legend, LegendEntry, PanelScene, ResolvedLayer, ResolvedSpec,
    ScaleSystem, ScaledFrame,
};
use crate::mark::MarkContext;
use crate::scale::Scale;
use crate::theme::Theme;

const TICK_COUNT: usize = 5;

/// Compile moved frames into per-panel draw commands, each panel carrying its
/// coordinate frame.
///
/// `frames` is indexed `[panel][layer]`.
pub fn compile_panels(
    layout: &FacetLayout,
    spec: &ResolvedSpec,
    frames: &[Vec<ScaledFrame>],
    scales: &ScaleSystem,
    shares: (Share, Share),
    theme: &Theme,
) -> Vec<PanelScene> {
    let x = axis_frames(Axis::X, &layout.cells(shares.0), spec, frames, scales);
    let y = axis_frames(Axis::Y, &layout.cells(shares.1), spec, frames, scales);

    let mut panels = Vec::with_capacity(layout.panels.len());
    for ((panel, x), y) in layout.panels.iter().zip(x).zip(y) {
        let layers = spec
            .layers
            .iter()
            .zip(&frames[panel.index])
            .map(|(layer, frame)| {
                let ctx = MarkContext {
                    orient: layer.orient,
                    theme,
                    literals: &layer.literals,
                };
                LayerScene {
                    layer: layer.index,
                    mark: layer.mark.name(),
                    commands: layer.mark.draw(frame, &ctx),
                }
            })
            .collect();
        panels.push(PanelScene {
            index: panel.index,
            row: panel.row,
            col: panel.col,
            title: panel.title.clone(),
            coord: CoordinateFrame { x, y },
            layers,
        });
    }
    panels
}

/// One axis frame per panel. The visible range is the union of every moved
/// frame in the panel's sharing cell, so stacked and dodged marks stay in view.
fn axis_frames(
    axis: Axis,
    cells: &[usize],
    spec: &ResolvedSpec,
    frames: &[Vec<ScaledFrame>],
    scales: &ScaleSystem,
) -> Vec<AxisFrame> {
    let mut extents: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
    for (panel, &cell) in cells.iter().enumerate() {
        for (layer, frame) in spec.layers.iter().zip(&frames[panel]) {
            if let Some((lo, hi)) = layer_extent(axis, layer, frame) {
                let entry = extents.entry(cell).or_insert((lo, hi));
                *entry = (entry.0.min(lo), entry.1.max(hi));
            }
        }
    }
    let limits = spec.scales.get(&axis.channel()).and_then(|s| s.limits);

    cells
        .iter()
        .enumerate()
        .filter_map(|(panel, cell)| {
            let scale = scales.axis(panel, axis)?;
            let range = view_range(scale, extents.get(cell).copied(), limits);
            Some(axis_frame(scale, range))
        })
        .collect()
}

fn axis_frame(scale: &Arc<Scale>, range: (f64, f64)) -> AxisFrame {
    let eps = (range.1 - range.0).abs() * 1e-9;
    let ticks = scale
        .ticks(TICK_COUNT)
        .into_iter()
        .filter(|t| t.position >= range.0 - eps && t.position <= range.1 + eps)
        .collect();
    AxisFrame {
        scale: scale.clone(),
        kind: scale.kind(),
        transform: scale.transform,
        range,
        reverse: scale.reverse,
        ticks,
    }
}

/// Position-space extent a layer occupies on an axis, including bar widths
/// and the baseline bars and areas grow from.
fn layer_extent(axis: Axis, layer: &ResolvedLayer, frame: &ScaledFrame) -> Option<(f64, f64)> {
    let mut values: Vec<f64> = Vec::new();
    for channel in [axis.channel(), axis.min_channel(), axis.max_channel()] {
        if let Some(column) = frame.get(channel) {
            values.extend_from_slice(column);
        }
    }
    if layer.mark.has_width() && layer.orient == axis {
        if let (Some(pos), Some(width)) = (frame.get(axis.channel()), frame.get(Channel::Width)) {
            values.extend(pos.iter().zip(width).flat_map(|(p, w)| [p - w / 2.0, p + w / 2.0]));
        }
    }
    if layer.mark.has_baseline() && layer.value_axis() == axis {
        if let Some(baseline) = frame.get(Channel::Baseline) {
            values.extend_from_slice(baseline);
        }
    }
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn view_range(scale: &Scale, data: Option<(f64, f64)>, limits: Option<(f64, f64)>) -> (f64, f64) {
    if let Some(levels) = scale.levels() {
        let (lo, hi): (f64, f64) = (-0.5, (levels.len() as f64 - 0.5).max(0.5));
        return match data {
            Some((a, b)) => (lo.min(a), hi.max(b)),
            None => (lo, hi),
        };
    }
    if let Some((lo, hi)) = limits {
        return (scale.position(lo), scale.position(hi));
    }
    let (lo, hi) = data.unwrap_or_else(|| scale.position_extent());
    pad_range(lo, hi)
}

fn pad_range(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        (min - 1.0, max + 1.0)
    } else {
        let padding = (max - min) * 0.05;
        (min - padding, max + padding)
    }
}

/// One legend per fitted visual scale: every level of a categorical scale, or
/// the tick values of a continuous one.
pub fn compile_legends(spec: &ResolvedSpec, scales: &ScaleSystem, theme: &Theme) -> Result<Vec<Legend>> {
    let mut legends = Vec::new();
    for (channel, scale) in &scales.visual {
        let title = spec
            .layers
            .iter()
            .find_map(|l| l.aes.get(*channel).and_then(Mapping::column))
            .unwrap_or(channel.name())
            .to_string();
        let entries = match scale.levels() {
            Some(levels) => levels
                .iter()
                .map(|v| {
                    Ok(LegendEntry {
                        label: v.to_string(),
                        value: scale.visual(v, theme)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => scale
                .ticks(TICK_COUNT)
                .into_iter()
                .map(|t| {
                    Ok(LegendEntry {
                        value: scale.visual(&scale.invert(t.position), theme)?,
                        label: t.label,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        legends.push(Legend {
            channel: *channel,
            title,
            entries,
        });
    }
    Ok(legends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::ir::Visual;
    use crate::scale::{ScaleInput, ScaleKind, ScaleSpec};
    use crate::theme::Rgb;

    fn fit(channel: Channel, spec: &ScaleSpec, kind: ScaleKind, values: &[Value]) -> Scale {
        let input = ScaleInput { layer: 0, dtype: None, values: values.iter().collect() };
        Scale::fit(channel, spec, kind, &[input]).unwrap()
    }

    #[test]
    fn test_pad_range() {
        assert_eq!(pad_range(0.0, 10.0), (-0.5, 10.5));
        assert_eq!(pad_range(3.0, 3.0), (2.0, 4.0));
    }

    #[test]
    fn test_view_range_categorical_padding() {
        let values = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        let scale = fit(Channel::X, &ScaleSpec::default(), ScaleKind::Categorical, &values);
        assert_eq!(view_range(&scale, Some((-0.4, 2.4)), None), (-0.5, 2.5));
        assert_eq!(view_range(&scale, None, None), (-0.5, 2.5));
    }

    #[test]
    fn test_view_range_limits_win() {
        let values = vec![Value::from(1.0), Value::from(5.0)];
        let spec = ScaleSpec::continuous().limits(0.0, 100.0);
        let scale = fit(Channel::Y, &spec, ScaleKind::Continuous, &values);
        assert_eq!(view_range(&scale, Some((0.0, 7.0)), Some((0.0, 100.0))), (0.0, 100.0));
    }

    #[test]
    fn test_view_range_uses_moved_extent() {
        let values = vec![Value::from(1.0), Value::from(4.0)];
        let scale = fit(Channel::Y, &ScaleSpec::default(), ScaleKind::Continuous, &values);
        let (lo, hi) = view_range(&scale, Some((0.0, 10.0)), None);
        assert_eq!((lo, hi), (-0.5, 10.5));
    }

    #[test]
    fn test_axis_frame_filters_ticks() {
        let values = vec![Value::from(0.0), Value::from(10.0)];
        let scale = Arc::new(fit(Channel::X, &ScaleSpec::default(), ScaleKind::Continuous, &values));
        let frame = axis_frame(&scale, (2.0, 8.0));
        assert!(!frame.ticks.is_empty());
        assert!(frame.ticks.iter().all(|t| t.position >= 2.0 && t.position <= 8.0));
    }

    #[test]
    fn test_legend_for_categorical_color() {
        let values = vec![Value::from("u"), Value::from("v")];
        let scale = fit(Channel::Color, &ScaleSpec::default(), ScaleKind::Categorical, &values);
        let system = ScaleSystem {
            panels: vec![],
            visual: BTreeMap::from([(Channel::Color, Arc::new(scale))]),
        };
        let spec = ResolvedSpec { layers: vec![], facet: None, scales: BTreeMap::new() };
        let theme = Theme::default();
        let legends = compile_legends(&spec, &system, &theme).unwrap();
        assert_eq!(legends.len(), 1);
        assert_eq!(legends[0].title, "color");
        let labels: Vec<&str> = legends[0].entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["u", "v"]);
        assert_eq!(legends[0].entries[1].value, Visual::Color(theme.palette_color(1)));
        assert_ne!(legends[0].entries[0].value, Visual::Color(Rgb(0, 0, 0)));
    }
}
