use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use gramflow::ir::DrawCommand;
use gramflow::scale::Domain;
use gramflow::transform::Estimator;
use gramflow::{
    Channel, Dataset, FacetSpec, Layer, Mark, Move, Plot, ScaleSpec, ScaleState, SceneGraph, Session, Share, Stat,
    Value, Warning,
};

/// Helper function to run gramflow with DSL and CSV input
fn run_gramflow(args: &[&str], input: &str) -> Result<serde_json::Value, String> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_gramflow"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to spawn process: {}", e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .map_err(|e| format!("Failed to write to stdin: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("Failed to wait for process: {}", e))?;

    if output.status.success() {
        serde_json::from_slice(&output.stdout).map_err(|e| format!("Output is not JSON: {}", e))
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

fn read_fixture(name: &str) -> String {
    fs::read_to_string(format!("{}/tests/data/{}", env!("CARGO_MANIFEST_DIR"), name)).expect("Failed to read test CSV")
}

fn category_data() -> Dataset {
    Dataset::new()
        .with_column("category", vec!["A", "A", "B", "B"])
        .unwrap()
        .with_column("value", vec![1.0, 2.0, 3.0, 4.0])
        .unwrap()
}

fn rects(scene: &SceneGraph, panel: usize, layer: usize) -> Vec<((f64, f64), (f64, f64))> {
    scene.panels[panel].layers[layer]
        .commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::DrawRect { tl, br, .. } => Some((*tl, *br)),
            _ => None,
        })
        .collect()
}

fn continuous_domain(domain: &Domain) -> (f64, f64) {
    match domain {
        Domain::Continuous { min, max } => (*min, *max),
        other => panic!("expected a continuous domain, got {:?}", other),
    }
}

#[test]
fn test_mean_bars_per_category() {
    let scene = Plot::new(category_data())
        .map(Channel::X, "category")
        .map(Channel::Y, "value")
        .add(Layer::new(Mark::bar()).stat(Stat::Aggregate { func: Estimator::Mean, errorbar: None }))
        .render()
        .unwrap();

    let bars = rects(&scene, 0, 0);
    assert_eq!(bars.len(), 2);
    // Categories sit at 0 and 1; bar tops are the group means.
    let mut tops: Vec<(f64, f64)> = bars.iter().map(|(tl, br)| (((tl.0 + br.0) / 2.0).round(), tl.1)).collect();
    tops.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(tops, vec![(0.0, 1.5), (1.0, 3.5)]);
}

#[test]
fn test_stacked_bars_start_at_zero() {
    let scene = Plot::new(category_data())
        .map(Channel::X, "category")
        .map(Channel::Y, "value")
        .add(Layer::new(Mark::bar()).with_move(Move::Stack { diverging: false }))
        .render()
        .unwrap();

    let bars = rects(&scene, 0, 0);
    assert_eq!(bars.len(), 4);
    for (x, total) in [(0.0, 3.0), (1.0, 7.0)] {
        let column: Vec<_> = bars.iter().filter(|(tl, br)| ((tl.0 + br.0) / 2.0).round() == x).collect();
        assert_eq!(column.len(), 2);
        let bottom = column.iter().map(|(_, br)| br.1).fold(f64::INFINITY, f64::min);
        let top = column.iter().map(|(tl, _)| tl.1).fold(f64::NEG_INFINITY, f64::max);
        assert_eq!((bottom, top), (0.0, total));
    }
}

#[test]
fn test_layers_share_union_domain() {
    let low = Dataset::new()
        .with_column("x", vec![1.0, 2.0])
        .unwrap()
        .with_column("y", vec![0.0, 10.0])
        .unwrap();
    let high = Dataset::new()
        .with_column("x", vec![1.0, 2.0])
        .unwrap()
        .with_column("y", vec![5.0, 20.0])
        .unwrap();

    let scene = Plot::new(low)
        .map(Channel::X, "x")
        .map(Channel::Y, "y")
        .add(Layer::new(Mark::Point))
        .add(Layer::new(Mark::Line).data(Arc::new(high)))
        .render()
        .unwrap();

    assert_eq!(continuous_domain(&scene.panels[0].coord.y.scale.domain), (0.0, 20.0));
}

#[test]
fn test_shared_facet_scale_spans_all_panels() {
    let data = Dataset::new()
        .with_column("g", vec!["a", "a", "b", "b"])
        .unwrap()
        .with_column("x", vec![1.0, 2.0, 1.0, 2.0])
        .unwrap()
        .with_column("y", vec![0.0, 10.0, 5.0, 20.0])
        .unwrap();
    let plot = Plot::new(data)
        .map(Channel::X, "x")
        .map(Channel::Y, "y")
        .add(Layer::new(Mark::Point));

    let shared = plot.facet(FacetSpec::cols("g")).render().unwrap();
    assert_eq!(shared.panels.len(), 2);
    for panel in &shared.panels {
        assert_eq!(continuous_domain(&panel.coord.y.scale.domain), (0.0, 20.0));
    }

    let free = plot.facet(FacetSpec::cols("g").share(Share::All, Share::None)).render().unwrap();
    assert_eq!(continuous_domain(&free.panels[0].coord.y.scale.domain), (0.0, 10.0));
    assert_eq!(continuous_domain(&free.panels[1].coord.y.scale.domain), (5.0, 20.0));
    assert_eq!(free.panels[0].title.as_deref(), Some("g = a"));
}

#[test]
fn test_explicit_order_overrides_first_seen() {
    let data = Dataset::new()
        .with_column("level", vec!["high", "low"])
        .unwrap()
        .with_column("n", vec![1.0, 2.0])
        .unwrap();
    let scene = Plot::new(data)
        .map(Channel::X, "level")
        .map(Channel::Y, "n")
        .scale(Channel::X, ScaleSpec::categorical().order(vec!["low", "high"]))
        .add(Layer::new(Mark::Point))
        .render()
        .unwrap();

    let x = &scene.panels[0].coord.x.scale;
    assert_eq!(x.apply(&Value::from("low")).unwrap(), 0.0);
    assert_eq!(x.apply(&Value::from("high")).unwrap(), 1.0);
}

#[test]
fn test_missing_values_are_dropped_with_warning() {
    let data = Dataset::from_csv(read_fixture("sales.csv").as_bytes()).unwrap();
    let scene = Plot::new(data)
        .map(Channel::X, "quarter")
        .map(Channel::Y, "revenue")
        .add(Layer::new(Mark::Point))
        .render()
        .unwrap();

    assert_eq!(scene.panels[0].layers[0].commands.len(), 7);
    assert!(scene
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::DroppedRows { channel: Channel::Y, count: 1, .. })));
}

#[test]
fn test_box_violin_and_swarm_layers() {
    let data = Dataset::new()
        .with_column("g", vec!["A", "A", "A", "A", "A", "B", "B", "B"])
        .unwrap()
        .with_column("v", vec![1.0, 2.0, 3.0, 4.0, 100.0, 5.0, 6.0, 7.0])
        .unwrap();
    let scene = Plot::new(data)
        .map(Channel::X, "v")
        .map(Channel::Y, "g")
        .add(Layer::new(Mark::Box { width: None }).stat(Stat::boxplot()))
        .add(Layer::new(Mark::Violin { width: None }).stat(Stat::violin()))
        .add(Layer::new(Mark::Point).with_move(Move::swarm()))
        .render()
        .unwrap();

    let layers = &scene.panels[0].layers;
    // horizontal boxes: A has one outlier beyond its right whisker
    let outliers: Vec<_> = layers[0]
        .commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::DrawPoint { at, .. } => Some(*at),
            _ => None,
        })
        .collect();
    assert_eq!(outliers, vec![(100.0, 0.0)]);
    assert_eq!(layers[0].commands.len(), 9);

    assert_eq!(layers[1].commands.len(), 2);
    for command in &layers[1].commands {
        let DrawCommand::DrawPolygon { points, .. } = command else { panic!("expected a polygon") };
        let centre = points.iter().map(|p| p.1).sum::<f64>() / points.len() as f64;
        assert!(points.iter().all(|p| (p.1 - centre).abs() <= 0.4 + 1e-9));
    }

    assert_eq!(layers[2].commands.len(), 8);
}

#[test]
fn test_session_reuses_fits_until_edited() {
    let plot = Plot::new(category_data())
        .map(Channel::X, "category")
        .map(Channel::Y, "value")
        .add(Layer::new(Mark::bar()));
    let mut session = Session::new(plot);

    session.render().unwrap();
    let fits = session.fits();
    session.render().unwrap();
    assert_eq!(session.fits(), fits);

    session.update(|p| p.scale(Channel::Y, ScaleSpec::continuous().limits(0.0, 10.0)));
    assert_eq!(session.state(Channel::Y), ScaleState::Stale);
    assert_eq!(session.state(Channel::X), ScaleState::Fit);

    let scene = session.render().unwrap();
    assert_eq!(session.fits(), fits + 1);
    assert_eq!(continuous_domain(&scene.panels[0].coord.y.scale.domain), (0.0, 10.0));
}

#[test]
fn test_dsl_to_scene() {
    let (_, spec) = gramflow::parser::parse_plot_spec(
        "aes(x: category, y: value) | bar(stat: mean) | point(color: category, size: 4)",
    )
    .unwrap();
    let scene = gramflow::parser::build_plot(&spec, category_data())
        .unwrap()
        .render()
        .unwrap();

    assert_eq!(scene.panels[0].layers.len(), 2);
    assert_eq!(scene.panels[0].layers[0].mark, "bar");
    assert_eq!(scene.panels[0].layers[1].commands.len(), 4);
    let legend = scene.legends.iter().find(|l| l.channel == Channel::Color).unwrap();
    assert_eq!(legend.title, "category");
    assert_eq!(legend.entries.len(), 2);
}

#[test]
fn test_end_to_end_cli_faceted_dodge() {
    let csv = read_fixture("sales.csv");
    let result = run_gramflow(
        &["aes(x: quarter, y: revenue) | bar(stat: sum, color: product, move: dodge) | facet(col: region)"],
        &csv,
    );
    let scene = result.unwrap_or_else(|e| panic!("Failed: {}", e));
    let panels = scene["panels"].as_array().unwrap();
    assert_eq!(panels.len(), 2);
    assert_eq!(panels[0]["layers"][0]["commands"].as_array().unwrap().len(), 4);
    let warnings = scene["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w["kind"] == "dropped_rows"));
}

#[test]
fn test_end_to_end_cli_json_input() {
    let json = r#"[{"t": 1, "v": 2}, {"t": 2, "v": 5}, {"t": 3, "v": 4}]"#;
    let scene = run_gramflow(&["--json-input", "aes(x: t, y: v) | line()"], json).unwrap();
    let command = &scene["panels"][0]["layers"][0]["commands"][0];
    assert_eq!(command["type"], "draw_line");
    assert_eq!(command["points"].as_array().unwrap().len(), 3);
}

#[test]
fn test_end_to_end_cli_parse_error() {
    let result = run_gramflow(&["aes(x: a, y: b) | line("], "a,b\n1,2\n");
    assert!(result.is_err());
}

#[test]
fn test_end_to_end_cli_unknown_column() {
    let result = run_gramflow(&["aes(x: a, y: missing) | point()"], "a,b\n1,2\n");
    let err = result.unwrap_err();
    assert!(err.contains("missing"), "unexpected error: {}", err);
}
