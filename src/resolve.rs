use std::collections::BTreeMap;

use crate::aes::{Aesthetics, Axis, Channel, Mapping};
use crate::data::{Dataset, Value};
use crate::error::{record, PlotError, Result, Warning};
use crate::ir::{ResolvedLayer, ResolvedSpec, Visual};
use crate::plot::{Layer, Plot};
use crate::scale::{infer_kind, ScaleInput, ScaleKind, ScaleSpec};
use crate::theme::Rgb;

/// Resolve every layer of a plot against its defaults and data.
///
/// Fails fast on unknown columns, unusable literals and missing required
/// channels; channels a mark cannot encode are dropped with a warning.
pub fn resolve(plot: &Plot) -> Result<(ResolvedSpec, Vec<Warning>)> {
    let mut warnings = Vec::new();
    let scales = plot.scale_specs().clone();

    let mut layers = Vec::with_capacity(plot.layers().len());
    for (index, layer) in plot.layers().iter().enumerate() {
        layers.push(resolve_layer(plot, index, layer, &scales, &mut warnings)?);
    }
    tracing::debug!("resolved {} layers", layers.len());

    Ok((
        ResolvedSpec {
            layers,
            facet: plot.facet_spec().cloned(),
            scales,
        },
        warnings,
    ))
}

fn resolve_layer(
    plot: &Plot,
    index: usize,
    layer: &Layer,
    scales: &BTreeMap<Channel, ScaleSpec>,
    warnings: &mut Vec<Warning>,
) -> Result<ResolvedLayer> {
    let data = layer.data.clone().unwrap_or_else(|| plot.data().clone());
    let merged = if layer.inherit {
        layer.aes.inherit(plot.defaults())
    } else {
        layer.aes.clone()
    };

    let mut aes = Aesthetics::new();
    let mut dtypes = BTreeMap::new();
    let mut literals = BTreeMap::new();
    for (channel, mapping) in merged.iter() {
        if !layer.mark.can_encode(channel) {
            record(
                warnings,
                Warning::IgnoredChannel {
                    layer: index,
                    channel,
                    mark: layer.mark.name(),
                },
            );
            continue;
        }
        match mapping {
            Mapping::Column(name) => {
                let column = data.column(name).ok_or_else(|| PlotError::ColumnNotFound {
                    column: name.clone(),
                    layer: Some(index),
                })?;
                dtypes.insert(channel, column.dtype);
            }
            Mapping::Constant(value) if channel.is_visual() => {
                literals.insert(channel, literal(index, channel, value)?);
            }
            Mapping::Constant(_) => {}
        }
        aes.set(channel, mapping.clone());
    }

    let kinds = ColumnKinds { index, data: &data, aes: &aes, scales };
    let orient = match layer.orient {
        Some(axis) => axis,
        None => infer_orient(kinds.get(Channel::X)?, kinds.get(Channel::Y)?),
    };

    for channel in layer.stat.requires(orient) {
        if !aes.contains(channel) {
            return Err(PlotError::StatApplicability {
                channel,
                layer: index,
                stat: layer.stat.name(),
                reason: "channel is not mapped".to_string(),
            });
        }
    }
    let produced = layer.stat.produces(orient);
    for channel in layer.mark.required(orient) {
        if !aes.contains(channel) && !produced.contains(&channel) {
            return Err(PlotError::MissingMapping {
                channel,
                layer: index,
                mark: layer.mark.name(),
            });
        }
    }

    let mut grouping = Vec::new();
    for (channel, mapping) in aes.iter() {
        if mapping.column().is_none() || channel.is_position() || channel == Channel::Text {
            continue;
        }
        let discrete = match channel {
            Channel::Group | Channel::Shape => true,
            _ => !matches!(kinds.get(channel)?, Some(ScaleKind::Continuous | ScaleKind::Temporal)),
        };
        if discrete {
            grouping.push(channel);
        }
    }
    tracing::debug!(
        "layer {}: {} mark, {} stat, orient {}, grouped by {:?}",
        index,
        layer.mark.name(),
        layer.stat.name(),
        orient,
        grouping
    );

    Ok(ResolvedLayer {
        index,
        data,
        aes,
        stat: layer.stat.clone(),
        moves: layer.moves.clone(),
        mark: layer.mark.clone(),
        orient,
        grouping,
        dtypes,
        literals,
    })
}

/// Provisional scale kinds of a layer's column mappings, judged on the layer's
/// own data.
struct ColumnKinds<'a> {
    index: usize,
    data: &'a Dataset,
    aes: &'a Aesthetics,
    scales: &'a BTreeMap<Channel, ScaleSpec>,
}

impl ColumnKinds<'_> {
    fn get(&self, channel: Channel) -> Result<Option<ScaleKind>> {
        let Some(name) = self.aes.get(channel).and_then(Mapping::column) else {
            return Ok(None);
        };
        let Some(column) = self.data.column(name) else {
            return Ok(None);
        };
        let spec = channel
            .scale_channel()
            .and_then(|c| self.scales.get(&c))
            .cloned()
            .unwrap_or_default();
        let input = ScaleInput {
            layer: self.index,
            dtype: Some(column.dtype),
            values: column.values.iter().collect(),
        };
        infer_kind(channel, &spec, &[input]).map(Some)
    }
}

/// The axis holding the independent variable: the discrete one when exactly
/// one axis is continuous, otherwise whichever axis is mapped (x by default).
fn infer_orient(x: Option<ScaleKind>, y: Option<ScaleKind>) -> Axis {
    match (x, y) {
        (Some(ScaleKind::Continuous), Some(k)) if k != ScaleKind::Continuous => Axis::Y,
        (None, Some(_)) => Axis::Y,
        _ => Axis::X,
    }
}

fn literal(layer: usize, channel: Channel, value: &Value) -> Result<Visual> {
    let invalid = || PlotError::InvalidData(format!("layer {}: '{}' is not a valid {} value", layer, value, channel));
    match channel {
        Channel::Color => value
            .as_str()
            .and_then(Rgb::parse)
            .map(Visual::Color)
            .ok_or_else(invalid),
        Channel::Size | Channel::Alpha => value.as_f64().map(Visual::Number).ok_or_else(invalid),
        _ => Ok(Visual::Shape(value.to_string())),
    }
}
