// Builds a Plot from a parsed pipeline

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use super::ast::{named, named_or_positional, Arg, ArgValue, Call, PlotSpec};
use crate::aes::{Axis, Channel};
use crate::data::{Dataset, Value};
use crate::facet::{FacetSpec, Share};
use crate::mark::Mark;
use crate::moves::{DodgeEmpty, Move, NormFunc};
use crate::plot::{Layer, Plot};
use crate::scale::{Order, ScaleKind, ScaleSpec, Transform};
use crate::transform::{ErrorBar, Estimator, HistStat, Stat, ViolinNorm};

/// Apply every pipeline component to a plot over `data`, in order.
pub fn build_plot(spec: &PlotSpec, data: Dataset) -> Result<Plot> {
    let mut plot = Plot::new(data);
    for component in &spec.components {
        plot = match component.name.as_str() {
            "aes" => build_aes(&plot, component)?,
            "facet" | "facet_wrap" | "facet_grid" => plot.facet(build_facet(component)?),
            "theme" => plot.theme(merge_config(plot.current_theme(), component)?),
            "options" => plot.options(merge_config(plot.pipeline_options(), component)?),
            name => match name.strip_prefix("scale_") {
                Some(suffix) => {
                    let channel = Channel::parse(suffix).ok_or_else(|| anyhow!("unknown scale '{}'", name))?;
                    plot.scale(channel, build_scale(component)?)
                }
                None => plot.add(build_layer(component)?),
            },
        };
    }
    if plot.layers().is_empty() {
        bail!("Plot requires at least one layer (point, line, bar, ...)");
    }
    Ok(plot)
}

enum Source {
    Column(String),
    Literal(Value),
}

/// Bare names are columns; quoted strings and numbers are literals.
fn source(value: &ArgValue) -> Result<Source> {
    match value {
        ArgValue::Ident(name) => Ok(Source::Column(name.clone())),
        ArgValue::Str(s) => Ok(Source::Literal(Value::Text(s.clone()))),
        ArgValue::Number(n) => Ok(Source::Literal(Value::Number(*n))),
        other => Err(anyhow!("expected a column or literal, found {:?}", other)),
    }
}

fn build_aes(plot: &Plot, call: &Call) -> Result<Plot> {
    let mut plot = plot.clone();
    let mut positional = [Channel::X, Channel::Y].into_iter();
    for arg in &call.args {
        let channel = match &arg.key {
            Some(key) => Channel::parse(key).ok_or_else(|| anyhow!("aes(): unknown channel '{}'", key))?,
            None => positional.next().ok_or_else(|| anyhow!("aes(): only x and y may be positional"))?,
        };
        plot = match source(&arg.value)? {
            Source::Column(column) => plot.map(channel, column),
            Source::Literal(value) => plot.set(channel, value),
        };
    }
    Ok(plot)
}

fn build_layer(call: &Call) -> Result<Layer> {
    let (mark, default_stat) = match call.name.as_str() {
        "histogram" | "hist" => (Mark::bar(), "hist"),
        "density" | "kde" => (Mark::Line, "kde"),
        "smooth" | "regression" => (Mark::Line, "polyfit"),
        "countplot" | "count" => (Mark::bar(), "count"),
        "boxplot" | "box" => (Mark::Box { width: None }, "box"),
        "violinplot" | "violin" => (Mark::Violin { width: None }, "violin"),
        "swarmplot" | "swarm" => (Mark::Point, "identity"),
        name => (Mark::parse(name).ok_or_else(|| anyhow!("unknown layer '{}'", name))?, "identity"),
    };
    let mut layer = Layer::new(mark);
    if matches!(call.name.as_str(), "swarmplot" | "swarm") {
        layer = layer.with_move(Move::swarm());
    }
    let mut stat_name = default_stat.to_string();
    let mut stat_args: Vec<Arg> = Vec::new();

    for arg in &call.args {
        let key = arg
            .key
            .as_deref()
            .ok_or_else(|| anyhow!("{}(): arguments must be named", call.name))?;
        match key {
            "stat" => {
                let (name, args) = arg
                    .value
                    .as_call()
                    .ok_or_else(|| anyhow!("{}(): stat must be a name such as mean or hist(bins: 10)", call.name))?;
                stat_name = name.to_string();
                stat_args.extend_from_slice(args);
            }
            "move" | "position" => {
                for item in arg.value.items() {
                    layer = layer.with_move(build_move(item)?);
                }
            }
            "orient" => {
                let axis = match arg.value.as_name() {
                    Some("x" | "v" | "vertical") => Axis::X,
                    Some("y" | "h" | "horizontal") => Axis::Y,
                    _ => bail!("{}(): orient must be x or y", call.name),
                };
                layer = layer.orient(axis);
            }
            "width" if layer.mark.has_width() => {
                let width = arg
                    .value
                    .as_f64()
                    .ok_or_else(|| anyhow!("{}(): width must be a number", call.name))?;
                layer.mark = match layer.mark {
                    Mark::Box { .. } => Mark::Box { width: Some(width) },
                    Mark::Violin { .. } => Mark::Violin { width: Some(width) },
                    _ => Mark::Bar { width: Some(width) },
                };
            }
            "inherit" => {
                if arg.value.as_bool() == Some(false) {
                    layer = layer.no_inherit();
                }
            }
            key => match Channel::parse(key) {
                Some(channel) => {
                    layer = match source(&arg.value)? {
                        Source::Column(column) => layer.map(channel, column),
                        Source::Literal(value) => layer.set(channel, value),
                    }
                }
                // Anything else configures the stat, e.g. histogram(bins: 20).
                None => stat_args.push(arg.clone()),
            },
        }
    }

    layer.stat = build_stat(&stat_name, &stat_args).with_context(|| format!("in {}()", call.name))?;
    Ok(layer)
}

fn check_keys(context: &str, args: &[Arg], allowed: &[&str]) -> Result<()> {
    for key in args.iter().filter_map(|a| a.key.as_deref()) {
        if !allowed.contains(&key) {
            bail!("{}: unknown parameter '{}'", context, key);
        }
    }
    Ok(())
}

fn number(args: &[Arg], key: &str, index: usize) -> Result<Option<f64>> {
    match named_or_positional(args, key, index) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be a number", key)),
    }
}

fn flag(args: &[Arg], key: &str) -> Result<bool> {
    match named(args, key) {
        None => Ok(false),
        Some(value) => value.as_bool().ok_or_else(|| anyhow!("'{}' must be true or false", key)),
    }
}

fn channels(args: &[Arg], key: &str) -> Result<Option<Vec<Channel>>> {
    let Some(value) = named(args, key) else { return Ok(None) };
    value
        .items()
        .iter()
        .map(|item| {
            item.as_name()
                .and_then(Channel::parse)
                .ok_or_else(|| anyhow!("'{}' must list channels", key))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn values(value: &ArgValue) -> Vec<Value> {
    value
        .items()
        .iter()
        .map(|item| match item {
            ArgValue::Number(n) => Value::Number(*n),
            other => other.as_name().map(Value::parse).unwrap_or(Value::Null),
        })
        .collect()
}

fn build_stat(name: &str, args: &[Arg]) -> Result<Stat> {
    let stat = match name {
        "identity" => {
            check_keys(name, args, &[])?;
            Stat::Identity
        }
        "count" => {
            check_keys(name, args, &[])?;
            Stat::Count
        }
        "hist" | "bin" => {
            check_keys(name, args, &["bins", "binwidth", "measure"])?;
            let measure = match named(args, "measure").and_then(ArgValue::as_name) {
                None | Some("count") => HistStat::Count,
                Some("density") => HistStat::Density,
                Some("proportion" | "probability") => HistStat::Proportion,
                Some(other) => bail!("hist: unknown measure '{}'", other),
            };
            Stat::Hist {
                bins: number(args, "bins", 0)?.map(|n| n.max(1.0) as usize),
                binwidth: number(args, "binwidth", usize::MAX)?,
                stat: measure,
            }
        }
        "kde" | "density" => {
            check_keys(name, args, &["bw_adjust", "gridsize", "cut"])?;
            Stat::Kde {
                bw_adjust: number(args, "bw_adjust", 0)?.unwrap_or(1.0),
                gridsize: number(args, "gridsize", usize::MAX)?.map_or(200, |n| n as usize),
                cut: number(args, "cut", usize::MAX)?.unwrap_or(3.0),
            }
        }
        "box" | "boxplot" => {
            check_keys(name, args, &["whis"])?;
            Stat::Box { whis: number(args, "whis", 0)?.unwrap_or(1.5) }
        }
        "violin" => {
            check_keys(name, args, &["bw_adjust", "gridsize", "cut", "norm"])?;
            let norm = match named(args, "norm").and_then(ArgValue::as_name) {
                None | Some("area") => ViolinNorm::Area,
                Some("width") => ViolinNorm::Width,
                Some(other) => bail!("violin: unknown norm '{}'", other),
            };
            Stat::Violin {
                bw_adjust: number(args, "bw_adjust", 0)?.unwrap_or(1.0),
                gridsize: number(args, "gridsize", usize::MAX)?.map_or(100, |n| n.max(2.0) as usize),
                cut: number(args, "cut", usize::MAX)?.unwrap_or(2.0),
                norm,
            }
        }
        "polyfit" | "smooth" | "regression" => {
            check_keys(name, args, &["order", "gridsize"])?;
            Stat::PolyFit {
                order: number(args, "order", 0)?.map_or(1, |n| n as usize),
                gridsize: number(args, "gridsize", usize::MAX)?.map_or(100, |n| n as usize),
            }
        }
        name => {
            check_keys(name, args, &["func", "errorbar"])?;
            let func = if name == "aggregate" {
                match named(args, "func").and_then(ArgValue::as_name) {
                    Some(func) => Estimator::parse(func),
                    None => Some(Estimator::Mean),
                }
            } else {
                Estimator::parse(name)
            }
            .ok_or_else(|| anyhow!("unknown stat '{}'", name))?;
            let errorbar = named(args, "errorbar").map(build_errorbar).transpose()?;
            Stat::Aggregate { func, errorbar }
        }
    };
    Ok(stat)
}

/// `sd`, `se(2)`, `pi(50)`, `ci(level: 95)`.
fn build_errorbar(value: &ArgValue) -> Result<ErrorBar> {
    let (name, args) = value.as_call().ok_or_else(|| anyhow!("errorbar must be sd, se, pi or ci"))?;
    let param = number(args, "level", 0)?;
    Ok(match name {
        "sd" => ErrorBar::Sd(param.unwrap_or(1.0)),
        "se" => ErrorBar::Se(param.unwrap_or(1.0)),
        "pi" => ErrorBar::Pi(param.unwrap_or(95.0)),
        "ci" => ErrorBar::Ci(param.unwrap_or(95.0)),
        other => bail!("unknown errorbar '{}'", other),
    })
}

fn build_move(value: &ArgValue) -> Result<Move> {
    let (name, args) = value.as_call().ok_or_else(|| anyhow!("move must be a name such as dodge or stack"))?;
    let adjustment = match name {
        "identity" => Move::Identity,
        "dodge" => {
            check_keys(name, args, &["empty", "gap", "by"])?;
            let empty = match named(args, "empty").and_then(ArgValue::as_name) {
                None | Some("keep") => DodgeEmpty::Keep,
                Some("drop") => DodgeEmpty::Drop,
                Some("fill") => DodgeEmpty::Fill,
                Some(other) => bail!("dodge: unknown empty policy '{}'", other),
            };
            Move::Dodge {
                empty,
                gap: number(args, "gap", 0)?.unwrap_or(0.0),
                by: channels(args, "by")?,
            }
        }
        "stack" => {
            check_keys(name, args, &["diverging"])?;
            Move::Stack { diverging: flag(args, "diverging")? }
        }
        "jitter" => {
            check_keys(name, args, &["width", "x", "y", "seed"])?;
            Move::Jitter {
                width: number(args, "width", 0)?.unwrap_or(0.4),
                x: number(args, "x", usize::MAX)?.unwrap_or(0.0),
                y: number(args, "y", usize::MAX)?.unwrap_or(0.0),
                seed: number(args, "seed", usize::MAX)?.map(|s| s as u64),
            }
        }
        "shift" => {
            check_keys(name, args, &["x", "y"])?;
            Move::Shift {
                x: number(args, "x", 0)?.unwrap_or(0.0),
                y: number(args, "y", 1)?.unwrap_or(0.0),
            }
        }
        "norm" => {
            check_keys(name, args, &["func", "percent", "by"])?;
            let func = match named(args, "func").and_then(ArgValue::as_name) {
                None | Some("max") => NormFunc::Max,
                Some("min") => NormFunc::Min,
                Some("sum") => NormFunc::Sum,
                Some("mean") => NormFunc::Mean,
                Some(other) => bail!("norm: unknown func '{}'", other),
            };
            Move::Norm {
                func,
                percent: flag(args, "percent")?,
                by: channels(args, "by")?,
            }
        }
        "swarm" | "beeswarm" => {
            check_keys(name, args, &["size"])?;
            Move::Swarm { size: number(args, "size", 0)?.unwrap_or(0.02) }
        }
        other => bail!("unknown move '{}'", other),
    };
    Ok(adjustment)
}

fn build_facet(call: &Call) -> Result<FacetSpec> {
    check_keys(
        &call.name,
        &call.args,
        &["by", "col", "row", "wrap", "ncol", "share_x", "share_y", "scales", "drop", "col_order", "row_order"],
    )?;
    let column = |key: &str| call.get(key).and_then(ArgValue::as_name).map(str::to_string);
    let share = |key: &str| -> Result<Option<Share>> {
        match call.get(key).and_then(ArgValue::as_name) {
            None => Ok(None),
            Some(name) => Share::parse(name).map(Some).ok_or_else(|| anyhow!("unknown share policy '{}'", name)),
        }
    };

    let mut spec = FacetSpec {
        col: column("col").or_else(|| column("by")),
        row: column("row"),
        wrap: number(&call.args, "wrap", usize::MAX)?
            .or(number(&call.args, "ncol", usize::MAX)?)
            .map(|n| n.max(1.0) as usize),
        drop_empty: flag(&call.args, "drop")?,
        col_order: call.get("col_order").map(values),
        row_order: call.get("row_order").map(values),
        ..FacetSpec::default()
    };
    if let Some(scales) = call.get("scales").and_then(ArgValue::as_name) {
        let (x, y) = match scales {
            "fixed" => (Share::All, Share::All),
            "free" => (Share::None, Share::None),
            "free_x" => (Share::None, Share::All),
            "free_y" => (Share::All, Share::None),
            other => bail!("unknown facet scales '{}'", other),
        };
        spec = spec.share(x, y);
    }
    if let Some(x) = share("share_x")? {
        spec.share_x = x;
    }
    if let Some(y) = share("share_y")? {
        spec.share_y = y;
    }
    if spec.col.is_none() && spec.row.is_none() {
        bail!("{}(): needs a row or col variable", call.name);
    }
    Ok(spec)
}

fn pair(value: &ArgValue, key: &str) -> Result<(f64, f64)> {
    match value.items() {
        [a, b] => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => bail!("'{}' must hold two numbers", key),
        },
        _ => bail!("'{}' must be [min, max]", key),
    }
}

fn build_scale(call: &Call) -> Result<ScaleSpec> {
    check_keys(
        &call.name,
        &call.args,
        &["kind", "log", "symlog", "pow", "sqrt", "limits", "range", "reverse", "order", "sorted", "palette"],
    )?;
    let mut spec = ScaleSpec::default();
    if let Some(kind) = call.get("kind").and_then(ArgValue::as_name) {
        spec.kind = Some(match kind {
            "continuous" | "linear" => ScaleKind::Continuous,
            "categorical" | "discrete" | "ordinal" => ScaleKind::Categorical,
            "temporal" | "date" | "time" => ScaleKind::Temporal,
            other => bail!("unknown scale kind '{}'", other),
        });
    }
    if let Some(value) = call.get("log") {
        spec.transform = match (value.as_f64(), value.as_bool()) {
            (Some(base), _) => Transform::Log(base),
            (_, Some(true)) => Transform::Log(10.0),
            _ => Transform::Identity,
        };
    }
    if let Some(value) = call.get("symlog") {
        spec.transform = Transform::Symlog(value.as_f64().unwrap_or(1.0));
    }
    if let Some(exp) = number(&call.args, "pow", usize::MAX)? {
        spec.transform = Transform::Pow(exp);
    }
    if flag(&call.args, "sqrt")? {
        spec.transform = Transform::Pow(0.5);
    }
    if let Some(value) = call.get("limits") {
        spec.limits = Some(pair(value, "limits")?);
    }
    if let Some(value) = call.get("range") {
        spec.range = Some(pair(value, "range")?);
    }
    spec.reverse = flag(&call.args, "reverse")?;
    if let Some(value) = call.get("order") {
        spec.order = Order::Explicit(values(value));
    } else if flag(&call.args, "sorted")? {
        spec.order = Order::Sorted;
    }
    if let Some(value) = call.get("palette") {
        spec.palette = Some(value.items().iter().filter_map(ArgValue::as_name).map(str::to_string).collect());
    }
    Ok(spec)
}

/// Overlay named arguments on a serde configuration struct.
fn merge_config<T: Serialize + DeserializeOwned>(current: &T, call: &Call) -> Result<T> {
    let mut json = serde_json::to_value(current)?;
    let object = json
        .as_object_mut()
        .ok_or_else(|| anyhow!("{}(): not a settings object", call.name))?;
    for arg in &call.args {
        let key = arg
            .key
            .as_ref()
            .ok_or_else(|| anyhow!("{}(): arguments must be named", call.name))?;
        if !object.contains_key(key) {
            bail!("{}(): unknown setting '{}'", call.name, key);
        }
        object.insert(key.clone(), to_json(&arg.value)?);
    }
    serde_json::from_value(json).with_context(|| format!("{}(): invalid settings", call.name))
}

fn to_json(value: &ArgValue) -> Result<JsonValue> {
    Ok(match value {
        ArgValue::Str(s) => JsonValue::from(s.as_str()),
        ArgValue::Ident(s) => match value.as_bool() {
            Some(b) => JsonValue::from(b),
            None => JsonValue::from(s.as_str()),
        },
        ArgValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => JsonValue::from(*n as i64),
        ArgValue::Number(n) => JsonValue::from(*n),
        ArgValue::List(items) => JsonValue::Array(items.iter().map(to_json).collect::<Result<_>>()?),
        ArgValue::Call(call) => bail!("unexpected call '{}' in settings", call.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_plot_spec;

    fn make_data() -> Dataset {
        Dataset::new()
            .with_column("category", vec!["A", "A", "B", "B"])
            .unwrap()
            .with_column("value", vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_column("g", vec!["u", "v", "u", "v"])
            .unwrap()
    }

    fn build(dsl: &str) -> Result<Plot> {
        let (_, spec) = parse_plot_spec(dsl).map_err(|e| anyhow!("{:?}", e))?;
        build_plot(&spec, make_data())
    }

    #[test]
    fn test_build_layer_with_stat_and_moves() {
        let plot = build("aes(x: category, y: value) | bar(stat: mean(errorbar: ci(90)), color: g, move: [dodge(gap: 0.1), stack])").unwrap();
        let layer = &plot.layers()[0];
        assert_eq!(
            layer.stat,
            Stat::Aggregate { func: Estimator::Mean, errorbar: Some(ErrorBar::Ci(90.0)) }
        );
        assert_eq!(layer.moves.len(), 2);
        assert_eq!(layer.moves[0], Move::Dodge { empty: DodgeEmpty::Keep, gap: 0.1, by: None });
        assert!(layer.aes.contains(Channel::Color));
    }

    #[test]
    fn test_build_shortcut_layers() {
        let plot = build("aes(x: value) | histogram(bins: 4) | density(bw_adjust: 0.5)").unwrap();
        assert_eq!(
            plot.layers()[0].stat,
            Stat::Hist { bins: Some(4), binwidth: None, stat: HistStat::Count }
        );
        assert!(matches!(plot.layers()[1].stat, Stat::Kde { bw_adjust, .. } if bw_adjust == 0.5));
    }

    #[test]
    fn test_build_categorical_distributions() {
        let plot = build(
            "aes(x: category, y: value) | boxplot(whis: 2, width: 0.5) | violin(norm: width) | swarm() | point(move: beeswarm(size: 0.05))",
        )
        .unwrap();
        let layers = plot.layers();
        assert_eq!(layers[0].mark, Mark::Box { width: Some(0.5) });
        assert_eq!(layers[0].stat, Stat::Box { whis: 2.0 });
        assert!(matches!(layers[1].stat, Stat::Violin { norm: ViolinNorm::Width, gridsize: 100, .. }));
        assert_eq!(layers[2].moves, vec![Move::swarm()]);
        assert_eq!(layers[3].moves, vec![Move::Swarm { size: 0.05 }]);

        let scene = plot.render().unwrap();
        let layers = &scene.panels[0].layers;
        assert_eq!(layers[0].mark, "box");
        // two boxes, each a rect and three segments
        assert_eq!(layers[0].commands.len(), 8);
        assert_eq!(layers[1].commands.len(), 2);
        assert_eq!(layers[2].commands.len(), 4);
    }

    #[test]
    fn test_build_literals_and_positional_aes() {
        let plot = build(r#"aes(category, value) | point(color: "red", size: 3)"#).unwrap();
        assert!(plot.defaults().contains(Channel::X));
        let layer = &plot.layers()[0];
        assert_eq!(
            layer.aes.get(Channel::Color),
            Some(&crate::aes::Mapping::Constant(Value::Text("red".to_string())))
        );
    }

    #[test]
    fn test_build_facet_and_scales() {
        let plot = build(
            "aes(x: category, y: value) | point() | facet(col: g, scales: free_y) | scale_y(log: 10, limits: [1, 10]) | scale_x(order: [B, A])",
        )
        .unwrap();
        let facet = plot.facet_spec().unwrap();
        assert_eq!(facet.col.as_deref(), Some("g"));
        assert_eq!((facet.share_x, facet.share_y), (Share::All, Share::None));
        let y = &plot.scale_specs()[&Channel::Y];
        assert_eq!(y.transform, Transform::Log(10.0));
        assert_eq!(y.limits, Some((1.0, 10.0)));
        let x = &plot.scale_specs()[&Channel::X];
        assert_eq!(x.order, Order::Explicit(vec![Value::from("B"), Value::from("A")]));
    }

    #[test]
    fn test_build_options_and_theme() {
        let plot = build("aes(x: category, y: value) | point() | options(seed: 7) | theme(bar_width: 0.5)").unwrap();
        assert_eq!(plot.pipeline_options().seed, 7);
        assert_eq!(plot.current_theme().bar_width, 0.5);
        assert!(build("point() | options(speed: 3)").is_err());
    }

    #[test]
    fn test_build_errors() {
        assert!(build("aes(x: a, y: b)").is_err());
        assert!(build("aes(x: a) | blob()").is_err());
        assert!(build("aes(x: a) | bar(stat: mean(bins: 3))").is_err());
        assert!(build("aes(x: a) | bar(move: wiggle)").is_err());
        assert!(build("aes(colour_of_sky: a) | point()").is_err());
        assert!(build("aes(x: a) | point() | facet(share_x: none)").is_err());
    }

    #[test]
    fn test_build_and_render() {
        let scene = build("aes(x: category, y: value) | bar(stat: mean)").unwrap().render().unwrap();
        assert_eq!(scene.panels.len(), 1);
        assert_eq!(scene.panels[0].layers[0].commands.len(), 2);
    }
}
