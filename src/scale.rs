//! Scale resolution: kind inference, fitting, and mapping values into
//! position space or visual-property space.
//!
//! Position space is the scale's transformed numeric space: the transformed
//! value for continuous scales, the level index for categorical scales and
//! epoch milliseconds for temporal scales. Moves operate in this space; the
//! coordinate frame maps it to the unit interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::aes::Channel;
use crate::data::{DType, Value};
use crate::error::{PlotError, Result};
use crate::ir::Visual;
use crate::theme::{Rgb, Theme};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    Continuous,
    Categorical,
    Temporal,
}

/// Monotonically increasing transform applied by continuous scales.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "type", content = "param", rename_all = "lowercase")]
pub enum Transform {
    #[default]
    Identity,
    /// Logarithm with the given base; only positive values are in domain.
    Log(f64),
    /// Symmetric log, linear within `c` of zero.
    Symlog(f64),
    /// Sign-preserving power.
    Pow(f64),
}

impl Transform {
    pub fn forward(&self, v: f64) -> f64 {
        match *self {
            Transform::Identity => v,
            Transform::Log(base) => v.ln() / base.ln(),
            Transform::Symlog(c) => v.signum() * (1.0 + v.abs() / c).ln(),
            Transform::Pow(exp) => v.signum() * v.abs().powf(exp),
        }
    }

    pub fn inverse(&self, t: f64) -> f64 {
        match *self {
            Transform::Identity => t,
            Transform::Log(base) => base.powf(t),
            Transform::Symlog(c) => t.signum() * c * (t.abs().exp() - 1.0),
            Transform::Pow(exp) => t.signum() * t.abs().powf(1.0 / exp),
        }
    }

    /// Whether `v` has a finite image under this transform.
    pub fn accepts(&self, v: f64) -> bool {
        match self {
            Transform::Log(_) => v > 0.0,
            _ => v.is_finite(),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Transform::Identity)
    }
}

/// Ordering rule for categorical levels.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Order {
    /// Sorted for numeric and boolean values, first-seen otherwise.
    #[default]
    Native,
    FirstSeen,
    Sorted,
    Explicit(Vec<Value>),
}

/// User overrides for one channel's scale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScaleSpec {
    pub kind: Option<ScaleKind>,
    pub transform: Transform,
    pub order: Order,
    pub limits: Option<(f64, f64)>,
    pub reverse: bool,
    /// Output range for size/alpha scales.
    pub range: Option<(f64, f64)>,
    /// Output colours (or shapes) for colour/shape scales.
    pub palette: Option<Vec<String>>,
}

impl ScaleSpec {
    pub fn continuous() -> Self {
        ScaleSpec { kind: Some(ScaleKind::Continuous), ..Default::default() }
    }

    pub fn categorical() -> Self {
        ScaleSpec { kind: Some(ScaleKind::Categorical), ..Default::default() }
    }

    pub fn temporal() -> Self {
        ScaleSpec { kind: Some(ScaleKind::Temporal), ..Default::default() }
    }

    pub fn log(mut self, base: f64) -> Self {
        self.transform = Transform::Log(base);
        self
    }

    pub fn symlog(mut self, c: f64) -> Self {
        self.transform = Transform::Symlog(c);
        self
    }

    pub fn pow(mut self, exp: f64) -> Self {
        self.transform = Transform::Pow(exp);
        self
    }

    pub fn order<V: Into<Value>>(mut self, levels: Vec<V>) -> Self {
        self.order = Order::Explicit(levels.into_iter().map(Into::into).collect());
        self
    }

    pub fn sorted(mut self) -> Self {
        self.order = Order::Sorted;
        self
    }

    pub fn first_seen(mut self) -> Self {
        self.order = Order::FirstSeen;
        self
    }

    pub fn limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some((min.min(max), min.max(max)));
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn palette<S: Into<String>>(mut self, values: Vec<S>) -> Self {
        self.palette = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Explicit categorical levels, if any.
    pub fn explicit_levels(&self) -> Option<&[Value]> {
        match &self.order {
            Order::Explicit(levels) => Some(levels),
            _ => None,
        }
    }
}

/// Values one layer contributes to a scale.
#[derive(Debug, Clone)]
pub struct ScaleInput<'a> {
    pub layer: usize,
    /// Declared type of the source column, when the values come from one.
    pub dtype: Option<DType>,
    pub values: Vec<&'a Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Domain {
    Continuous { min: f64, max: f64 },
    Categorical { levels: Vec<Value> },
    /// Epoch milliseconds, with the label format ticks should use.
    Temporal { min: f64, max: f64, format: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub position: f64,
    pub label: String,
}

/// A fitted scale. Immutable once fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scale {
    pub channel: Channel,
    pub domain: Domain,
    pub transform: Transform,
    pub reverse: bool,
    #[serde(skip)]
    range: Option<(f64, f64)>,
    #[serde(skip)]
    palette: Option<Vec<String>>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

/// Infer the scale kind for a channel across all contributing layers.
///
/// Precedence: explicit kind on the spec, then the declared column type, then
/// a heuristic over the values themselves.
pub fn infer_kind(channel: Channel, spec: &ScaleSpec, inputs: &[ScaleInput]) -> Result<ScaleKind> {
    let mut resolved: Option<(ScaleKind, usize)> = None;
    for input in inputs {
        let Some(kind) = input_kind(channel, spec, input)? else {
            continue;
        };
        match resolved {
            None => resolved = Some((kind, input.layer)),
            Some((prev, _)) if prev == kind => {}
            Some((prev, prev_layer)) => {
                return Err(PlotError::ScaleFit {
                    channel,
                    layer: Some(input.layer),
                    reason: format!(
                        "{} data conflicts with {} data from layer {}",
                        kind_name(kind),
                        kind_name(prev),
                        prev_layer
                    ),
                })
            }
        }
    }
    Ok(resolved.map(|(k, _)| k).unwrap_or(ScaleKind::Continuous))
}

fn kind_name(kind: ScaleKind) -> &'static str {
    match kind {
        ScaleKind::Continuous => "continuous",
        ScaleKind::Categorical => "categorical",
        ScaleKind::Temporal => "temporal",
    }
}

fn input_kind(channel: Channel, spec: &ScaleSpec, input: &ScaleInput) -> Result<Option<ScaleKind>> {
    let present: Vec<&Value> = input.values.iter().copied().filter(|v| !v.is_null()).collect();

    if let Some(kind) = spec.kind {
        if kind != ScaleKind::Categorical {
            if let Some(bad) = present.iter().find(|v| v.as_f64().is_none()) {
                return Err(PlotError::ScaleFit {
                    channel,
                    layer: Some(input.layer),
                    reason: format!("{} scale cannot hold non-numeric value '{}'", kind_name(kind), bad),
                });
            }
        }
        return Ok(Some(kind));
    }
    if channel == Channel::Shape {
        return Ok(Some(ScaleKind::Categorical));
    }
    match input.dtype {
        Some(DType::Categorical) | Some(DType::Boolean) | Some(DType::Text) => {
            return Ok(Some(ScaleKind::Categorical))
        }
        Some(DType::Temporal) => return Ok(Some(ScaleKind::Temporal)),
        Some(DType::Numeric) => return Ok(Some(ScaleKind::Continuous)),
        None => {}
    }

    let mut numeric: Option<&Value> = None;
    let mut temporal = false;
    let mut categorical: Option<&Value> = None;
    for &v in &present {
        match v {
            Value::Number(_) => numeric = numeric.or(Some(v)),
            Value::Time(_) => temporal = true,
            _ => categorical = categorical.or(Some(v)),
        }
    }
    match (numeric, temporal, categorical) {
        (None, false, None) => Ok(None),
        (_, _, Some(bad)) if numeric.is_some() || temporal => Err(PlotError::ScaleFit {
            channel,
            layer: Some(input.layer),
            reason: format!("mixed numeric and categorical values (offending value '{}')", bad),
        }),
        (_, _, Some(_)) => Ok(Some(ScaleKind::Categorical)),
        (Some(_), true, None) => Err(PlotError::ScaleFit {
            channel,
            layer: Some(input.layer),
            reason: "mixed numeric and temporal values".to_string(),
        }),
        (None, true, None) => Ok(Some(ScaleKind::Temporal)),
        (Some(_), false, None) => Ok(Some(ScaleKind::Continuous)),
    }
}

/// Infer the kind and fit in one step.
pub fn fit(channel: Channel, spec: &ScaleSpec, inputs: &[ScaleInput]) -> Result<Scale> {
    let kind = infer_kind(channel, spec, inputs)?;
    Scale::fit(channel, spec, kind, inputs)
}

impl Scale {
    /// Fit a scale of a known kind: a reduce over every contributing value.
    pub fn fit(channel: Channel, spec: &ScaleSpec, kind: ScaleKind, inputs: &[ScaleInput]) -> Result<Scale> {
        let domain = match kind {
            ScaleKind::Categorical => Domain::Categorical { levels: fit_levels(spec, inputs) },
            ScaleKind::Continuous => {
                let (min, max) = match spec.limits {
                    Some(limits) => limits,
                    None => numeric_extent(channel, inputs, |v| spec.transform.accepts(v))?
                        .unwrap_or_else(|| default_extent(spec.transform)),
                };
                Domain::Continuous { min, max }
            }
            ScaleKind::Temporal => {
                let (min, max) = match spec.limits {
                    Some(limits) => limits,
                    None => numeric_extent(channel, inputs, f64::is_finite)?.unwrap_or((0.0, 1.0)),
                };
                Domain::Temporal { min, max, format: temporal_format(max - min).to_string() }
            }
        };
        let transform = if kind == ScaleKind::Continuous { spec.transform } else { Transform::Identity };
        Ok(Scale::from_domain(channel, domain, transform, spec))
    }

    fn from_domain(channel: Channel, domain: Domain, transform: Transform, spec: &ScaleSpec) -> Scale {
        let lookup = match &domain {
            Domain::Categorical { levels } => levels.iter().enumerate().map(|(i, v)| (v.key(), i)).collect(),
            _ => HashMap::new(),
        };
        Scale {
            channel,
            domain,
            transform,
            reverse: spec.reverse,
            range: spec.range,
            palette: spec.palette.clone(),
            lookup,
        }
    }

    pub fn kind(&self) -> ScaleKind {
        match self.domain {
            Domain::Continuous { .. } => ScaleKind::Continuous,
            Domain::Categorical { .. } => ScaleKind::Categorical,
            Domain::Temporal { .. } => ScaleKind::Temporal,
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.kind() == ScaleKind::Categorical
    }

    pub fn levels(&self) -> Option<&[Value]> {
        match &self.domain {
            Domain::Categorical { levels } => Some(levels),
            _ => None,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match &self.domain {
            Domain::Categorical { .. } => self.lookup.contains_key(&value.key()),
            _ => value.as_f64().is_some(),
        }
    }

    /// Map a data value into position space.
    ///
    /// Continuous and temporal values outside the domain are clamped; values
    /// unknown to a categorical scale raise `ScaleMismatch`.
    pub fn apply(&self, value: &Value) -> Result<f64> {
        match &self.domain {
            Domain::Categorical { .. } => self
                .lookup
                .get(&value.key())
                .map(|&i| i as f64)
                .ok_or_else(|| self.mismatch(value)),
            Domain::Continuous { min, max } => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                Ok(self.transform.forward(v.clamp(*min, *max)))
            }
            Domain::Temporal { min, max, .. } => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                Ok(v.clamp(*min, *max))
            }
        }
    }

    /// Transform a raw number into position space without clamping.
    pub fn position(&self, v: f64) -> f64 {
        match self.domain {
            Domain::Continuous { .. } => self.transform.forward(v),
            _ => v,
        }
    }

    /// Extent of the domain in position space.
    pub fn position_extent(&self) -> (f64, f64) {
        match &self.domain {
            Domain::Continuous { min, max } => (self.transform.forward(*min), self.transform.forward(*max)),
            Domain::Temporal { min, max, .. } => (*min, *max),
            Domain::Categorical { levels } => (0.0, levels.len().saturating_sub(1) as f64),
        }
    }

    /// Map a data value to [0, 1] across the domain, honouring `reverse`.
    pub fn normalize(&self, value: &Value) -> Result<f64> {
        let pos = self.apply(value)?;
        let (lo, hi) = self.position_extent();
        let t = if hi > lo { (pos - lo) / (hi - lo) } else if self.is_categorical() { 0.0 } else { 0.5 };
        Ok(if self.reverse { 1.0 - t } else { t })
    }

    /// Map a position back to a data value.
    pub fn invert(&self, pos: f64) -> Value {
        match &self.domain {
            Domain::Continuous { .. } => Value::Number(self.transform.inverse(pos)),
            Domain::Temporal { .. } => Value::Time(pos.round() as i64),
            Domain::Categorical { levels } => {
                if levels.is_empty() {
                    return Value::Null;
                }
                let i = pos.round().clamp(0.0, (levels.len() - 1) as f64) as usize;
                levels[i].clone()
            }
        }
    }

    /// Map a data value into the channel's visual-property space.
    pub fn visual(&self, value: &Value, theme: &Theme) -> Result<Visual> {
        let t = self.normalize(value)?;
        let index = || self.lookup.get(&value.key()).copied().unwrap_or(0);
        let visual = match self.channel {
            Channel::Color => match (&self.palette, self.is_categorical()) {
                (Some(palette), true) if !palette.is_empty() => {
                    let i = index() % palette.len();
                    Visual::Color(Rgb::parse(&palette[i]).unwrap_or_else(|| theme.palette_color(i)))
                }
                (_, true) => Visual::Color(theme.palette_color(index())),
                (Some(palette), false) if palette.len() >= 2 => {
                    let low = Rgb::parse(&palette[0]).unwrap_or_else(|| theme.gradient_color(0.0));
                    let high = Rgb::parse(&palette[palette.len() - 1]).unwrap_or_else(|| theme.gradient_color(1.0));
                    Visual::Color(low.lerp(high, t))
                }
                (_, false) => Visual::Color(theme.gradient_color(t)),
            },
            Channel::Size => {
                let (lo, hi) = self.range.unwrap_or(theme.size_range);
                Visual::Number(lo + (hi - lo) * t)
            }
            Channel::Alpha => {
                let (lo, hi) = self.range.unwrap_or(theme.alpha_range);
                Visual::Number(lo + (hi - lo) * t)
            }
            Channel::Shape => match &self.palette {
                Some(shapes) if !shapes.is_empty() => Visual::Shape(shapes[index() % shapes.len()].clone()),
                _ => Visual::Shape(theme.shape(index())),
            },
            _ => Visual::Number(self.apply(value)?),
        };
        Ok(visual)
    }

    /// Tick positions (in position space) with labels.
    pub fn ticks(&self, n: usize) -> Vec<Tick> {
        match &self.domain {
            Domain::Categorical { levels } => levels
                .iter()
                .enumerate()
                .map(|(i, v)| Tick { position: i as f64, label: v.to_string() })
                .collect(),
            Domain::Continuous { min, max } => {
                let breaks = match self.transform {
                    Transform::Log(base) => log_breaks(*min, *max, base),
                    _ => nice_breaks(*min, *max, n),
                };
                breaks
                    .into_iter()
                    .map(|b| Tick { position: self.transform.forward(b), label: format_number(b) })
                    .collect()
            }
            Domain::Temporal { min, max, format } => nice_breaks(*min, *max, n)
                .into_iter()
                .map(|b| Tick {
                    position: b,
                    label: DateTime::<Utc>::from_timestamp_millis(b as i64)
                        .map(|dt| dt.format(format).to_string())
                        .unwrap_or_else(|| format_number(b)),
                })
                .collect(),
        }
    }

    fn mismatch(&self, value: &Value) -> PlotError {
        PlotError::ScaleMismatch { channel: self.channel, layer: None, value: value.to_string() }
    }
}

fn fit_levels(spec: &ScaleSpec, inputs: &[ScaleInput]) -> Vec<Value> {
    if let Order::Explicit(levels) = &spec.order {
        return levels.clone();
    }
    let mut seen = HashSet::new();
    let mut levels: Vec<Value> = Vec::new();
    for v in inputs.iter().flat_map(|i| i.values.iter()) {
        if !v.is_null() && seen.insert(v.key()) {
            levels.push((*v).clone());
        }
    }
    let sort = match spec.order {
        Order::Sorted => true,
        Order::Native => levels.iter().all(|v| matches!(v, Value::Number(_) | Value::Bool(_))),
        _ => false,
    };
    if sort {
        levels.sort_by(|a, b| a.total_cmp(b));
    }
    levels
}

fn numeric_extent(
    channel: Channel,
    inputs: &[ScaleInput],
    accept: impl Fn(f64) -> bool,
) -> Result<Option<(f64, f64)>> {
    let mut extent: Option<(f64, f64)> = None;
    for input in inputs {
        for v in input.values.iter().filter(|v| !v.is_null()) {
            let n = v.as_f64().ok_or_else(|| PlotError::ScaleFit {
                channel,
                layer: Some(input.layer),
                reason: format!("non-numeric value '{}' in a numeric scale", v),
            })?;
            if !accept(n) {
                continue;
            }
            extent = Some(match extent {
                None => (n, n),
                Some((lo, hi)) => (lo.min(n), hi.max(n)),
            });
        }
    }
    Ok(extent)
}

fn default_extent(transform: Transform) -> (f64, f64) {
    match transform {
        Transform::Log(_) => (1.0, 10.0),
        _ => (0.0, 1.0),
    }
}

fn temporal_format(span_ms: f64) -> &'static str {
    const DAY: f64 = 86_400_000.0;
    if span_ms > 2.0 * 365.0 * DAY {
        "%Y"
    } else if span_ms > 60.0 * DAY {
        "%Y-%m"
    } else if span_ms > DAY {
        "%Y-%m-%d"
    } else {
        "%H:%M"
    }
}

/// Most breaks `nice_breaks` returns for any request.
const MAX_BREAKS: i64 = 1000;

/// Breaks at multiples of 1, 2 or 5 × 10ⁿ within [min, max].
///
/// Domains narrower than the precision of their endpoints get a single break.
pub fn nice_breaks(min: f64, max: f64, n: usize) -> Vec<f64> {
    let span = max - min;
    if !span.is_finite() || span <= f64::EPSILON * min.abs().max(max.abs()) {
        return vec![min];
    }
    let raw = span / n.max(1) as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let norm = raw / magnitude;
    let step = magnitude
        * if norm < 1.5 {
            1.0
        } else if norm < 3.0 {
            2.0
        } else if norm < 7.0 {
            5.0
        } else {
            10.0
        };
    let first = (min / step).ceil();
    let last = (max / step + 1e-9).floor();
    if !first.is_finite() || !last.is_finite() || last < first {
        return vec![min];
    }
    let count = (last - first + 1.0).min(MAX_BREAKS as f64) as i64;
    (0..count).map(|k| (first + k as f64) * step).collect()
}

fn log_breaks(min: f64, max: f64, base: f64) -> Vec<f64> {
    if min <= 0.0 || max <= 0.0 {
        return vec![];
    }
    let lo = (min.ln() / base.ln()).ceil() as i32;
    let hi = (max.ln() / base.ln()).floor() as i32;
    (lo..=hi).map(|e| base.powi(e)).collect()
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(layer: usize, values: &[Value]) -> ScaleInput<'_> {
        ScaleInput { layer, dtype: None, values: values.iter().collect() }
    }

    fn texts(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::from(*s)).collect()
    }

    fn numbers(items: &[f64]) -> Vec<Value> {
        items.iter().map(|n| Value::from(*n)).collect()
    }

    #[test]
    fn test_continuous_union_domain() {
        let a = numbers(&[0.0, 10.0]);
        let b = numbers(&[5.0, 20.0]);
        let scale = fit(Channel::Y, &ScaleSpec::default(), &[input(0, &a), input(1, &b)]).unwrap();
        assert_eq!(scale.domain, Domain::Continuous { min: 0.0, max: 20.0 });
        assert_eq!(scale.apply(&Value::from(25.0)).unwrap(), 20.0);
    }

    #[test]
    fn test_categorical_first_seen_and_sorted() {
        let v = texts(&["b", "a", "b", "c"]);
        let scale = fit(Channel::X, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.levels().unwrap(), texts(&["b", "a", "c"]).as_slice());

        let scale = fit(Channel::X, &ScaleSpec::default().sorted(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.apply(&Value::from("a")).unwrap(), 0.0);
    }

    #[test]
    fn test_native_order_sorts_numbers() {
        let v = numbers(&[3.0, 1.0, 2.0]);
        let scale = fit(Channel::X, &ScaleSpec::categorical(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.apply(&Value::from(1.0)).unwrap(), 0.0);
        assert_eq!(scale.apply(&Value::from(3.0)).unwrap(), 2.0);
    }

    #[test]
    fn test_explicit_order_overrides_first_seen() {
        let v = texts(&["high", "low"]);
        let spec = ScaleSpec::default().order(vec!["low", "high"]);
        let scale = fit(Channel::X, &spec, &[input(0, &v)]).unwrap();
        assert_eq!(scale.apply(&Value::from("low")).unwrap(), 0.0);
        assert_eq!(scale.apply(&Value::from("high")).unwrap(), 1.0);
    }

    #[test]
    fn test_unknown_category_is_mismatch() {
        let v = texts(&["a", "b"]);
        let scale = fit(Channel::Color, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        let err = scale.apply(&Value::from("z")).unwrap_err();
        assert!(matches!(err, PlotError::ScaleMismatch { channel: Channel::Color, .. }));
    }

    #[test]
    fn test_mixed_layers_fail_to_fit() {
        let a = numbers(&[1.0, 2.0]);
        let b = texts(&["a"]);
        let err = fit(Channel::X, &ScaleSpec::default(), &[input(0, &a), input(3, &b)]).unwrap_err();
        match err {
            PlotError::ScaleFit { channel, layer, .. } => {
                assert_eq!(channel, Channel::X);
                assert_eq!(layer, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mixed_values_in_one_input_fail() {
        let v = vec![Value::from(1.0), Value::from("a")];
        assert!(fit(Channel::Y, &ScaleSpec::default(), &[input(0, &v)]).is_err());
    }

    #[test]
    fn test_declared_dtype_wins_over_values() {
        let v = numbers(&[1.0, 2.0]);
        let inp = ScaleInput { layer: 0, dtype: Some(DType::Categorical), values: v.iter().collect() };
        assert_eq!(infer_kind(Channel::X, &ScaleSpec::default(), &[inp]).unwrap(), ScaleKind::Categorical);
    }

    #[test]
    fn test_explicit_continuous_rejects_text() {
        let v = texts(&["a"]);
        assert!(fit(Channel::X, &ScaleSpec::continuous(), &[input(0, &v)]).is_err());
    }

    #[test]
    fn test_log_transform_ignores_nonpositive_in_fit() {
        let v = numbers(&[0.0, 1.0, 100.0]);
        let scale = fit(Channel::Y, &ScaleSpec::default().log(10.0), &[input(0, &v)]).unwrap();
        assert_eq!(scale.domain, Domain::Continuous { min: 1.0, max: 100.0 });
        assert!((scale.apply(&Value::from(100.0)).unwrap() - 2.0).abs() < 1e-12);
        assert!((scale.normalize(&Value::from(10.0)).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reverse_normalize() {
        let v = numbers(&[0.0, 10.0]);
        let scale = fit(Channel::X, &ScaleSpec::default().reverse(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.normalize(&Value::from(0.0)).unwrap(), 1.0);
        assert_eq!(scale.normalize(&Value::from(10.0)).unwrap(), 0.0);
    }

    #[test]
    fn test_temporal_scale() {
        let v = vec![Value::Time(0), Value::Time(86_400_000 * 10)];
        let scale = fit(Channel::X, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.kind(), ScaleKind::Temporal);
        match &scale.domain {
            Domain::Temporal { format, .. } => assert_eq!(format, "%Y-%m-%d"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!scale.ticks(5).is_empty());
    }

    #[test]
    fn test_invert_roundtrips_position() {
        let v = texts(&["a", "b", "c"]);
        let scale = fit(Channel::X, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.invert(1.2), Value::from("b"));
        let v = numbers(&[1.0, 1000.0]);
        let scale = fit(Channel::X, &ScaleSpec::default().log(10.0), &[input(0, &v)]).unwrap();
        match scale.invert(2.0) {
            Value::Number(n) => assert!((n - 100.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_visual_mapping() {
        let theme = Theme::default();
        let v = texts(&["a", "b"]);
        let scale = fit(Channel::Color, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.visual(&Value::from("b"), &theme).unwrap(), Visual::Color(theme.palette_color(1)));

        let v = numbers(&[0.0, 10.0]);
        let scale = fit(Channel::Size, &ScaleSpec::default().range(1.0, 3.0), &[input(0, &v)]).unwrap();
        assert_eq!(scale.visual(&Value::from(5.0), &theme).unwrap(), Visual::Number(2.0));

        let v = numbers(&[1.0, 2.0]);
        let scale = fit(Channel::Shape, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert!(scale.is_categorical());
        assert_eq!(scale.visual(&Value::from(2.0), &theme).unwrap(), Visual::Shape(theme.shape(1)));
    }

    #[test]
    fn test_nice_breaks() {
        assert_eq!(nice_breaks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(nice_breaks(3.0, 3.0, 5), vec![3.0]);
        assert_eq!(log_breaks(1.0, 1000.0, 10.0), vec![1.0, 10.0, 100.0, 1000.0]);
    }

    #[test]
    fn test_nice_breaks_on_ulp_wide_domain() {
        let (lo, hi) = (0.3, 0.1 + 0.2);
        assert!(hi > lo);
        assert_eq!(nice_breaks(lo, hi, 5), vec![lo]);

        let v = numbers(&[lo, hi]);
        let scale = fit(Channel::Y, &ScaleSpec::default(), &[input(0, &v)]).unwrap();
        assert_eq!(scale.ticks(5).len(), 1);
    }

    #[test]
    fn test_nice_breaks_count_is_bounded() {
        assert_eq!(nice_breaks(0.0, 1.0, usize::MAX).len() as i64, MAX_BREAKS);
        assert_eq!(nice_breaks(0.0, f64::INFINITY, 5), vec![0.0]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn transform_strategy() -> impl Strategy<Value = Transform> {
            prop_oneof![
                Just(Transform::Identity),
                Just(Transform::Symlog(1.0)),
                Just(Transform::Pow(0.5)),
                Just(Transform::Pow(2.0)),
            ]
        }

        proptest! {
            #[test]
            fn prop_continuous_apply_is_monotonic(
                values in prop::collection::vec(-1e6f64..1e6, 2..50),
                transform in transform_strategy(),
            ) {
                let data: Vec<Value> = values.iter().map(|v| Value::from(*v)).collect();
                let spec = ScaleSpec { transform, ..Default::default() };
                let scale = fit(Channel::Y, &spec, &[input(0, &data)]).unwrap();
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mapped: Vec<f64> = sorted.iter().map(|v| scale.apply(&Value::from(*v)).unwrap()).collect();
                for w in mapped.windows(2) {
                    prop_assert!(w[0] <= w[1]);
                }
            }

            #[test]
            fn prop_categorical_apply_in_range_and_stable(
                values in prop::collection::vec("[a-e]{1,2}", 1..40),
            ) {
                let data: Vec<Value> = values.iter().map(|s| Value::from(s.as_str())).collect();
                let first = fit(Channel::X, &ScaleSpec::default(), &[input(0, &data)]).unwrap();
                let again = fit(Channel::X, &ScaleSpec::default(), &[input(0, &data)]).unwrap();
                prop_assert_eq!(first.levels(), again.levels());
                let n = first.levels().unwrap().len();
                for (i, level) in first.levels().unwrap().iter().enumerate() {
                    let pos = first.apply(level).unwrap();
                    prop_assert_eq!(pos, i as f64);
                    prop_assert!(pos >= 0.0 && pos <= (n - 1) as f64);
                }
            }
        }
    }
}
