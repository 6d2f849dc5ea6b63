//! Geometric marks: turn a moved, scaled frame into draw commands.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::aes::{Axis, Channel};
use crate::ir::{DrawCommand, ScaledFrame, Style, Visual};
use crate::theme::Theme;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mark", rename_all = "snake_case")]
pub enum Mark {
    Point,
    /// Connected in orient-axis order within each group.
    Line,
    /// Connected in data order within each group.
    Path,
    Bar {
        /// Bar width as a fraction of the categorical spacing.
        width: Option<f64>,
    },
    Area,
    Band,
    /// Interval segments (error bars).
    Range,
    Text,
    /// Box and whiskers from quartile rows; rows without quartiles are
    /// outliers and drawn as points.
    Box {
        width: Option<f64>,
    },
    /// Density mirrored around the orient position.
    Violin {
        width: Option<f64>,
    },
}

/// Inputs a mark draws with besides its frame.
pub struct MarkContext<'a> {
    pub orient: Axis,
    pub theme: &'a Theme,
    /// Visual properties set to a literal rather than mapped.
    pub literals: &'a BTreeMap<Channel, Visual>,
}

impl Mark {
    pub fn bar() -> Mark {
        Mark::Bar { width: None }
    }

    pub fn parse(name: &str) -> Option<Mark> {
        Some(match name {
            "point" | "scatter" => Mark::Point,
            "line" => Mark::Line,
            "path" => Mark::Path,
            "bar" => Mark::Bar { width: None },
            "area" => Mark::Area,
            "band" | "ribbon" => Mark::Band,
            "range" | "errorbar" => Mark::Range,
            "text" => Mark::Text,
            "box" | "boxplot" => Mark::Box { width: None },
            "violin" => Mark::Violin { width: None },
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mark::Point => "point",
            Mark::Line => "line",
            Mark::Path => "path",
            Mark::Bar { .. } => "bar",
            Mark::Area => "area",
            Mark::Band => "band",
            Mark::Range => "range",
            Mark::Text => "text",
            Mark::Box { .. } => "box",
            Mark::Violin { .. } => "violin",
        }
    }

    /// Channels that must be mapped or produced by the stat.
    pub fn required(&self, orient: Axis) -> Vec<Channel> {
        let value = orient.other();
        match self {
            Mark::Band | Mark::Range => vec![orient.channel(), value.min_channel(), value.max_channel()],
            Mark::Text => vec![Channel::X, Channel::Y, Channel::Text],
            Mark::Box { .. } => vec![Channel::X, Channel::Y, Channel::Lower, Channel::Upper],
            Mark::Violin { .. } => vec![Channel::X, Channel::Y, Channel::Density],
            _ => vec![Channel::X, Channel::Y],
        }
    }

    /// Non-position channels the mark can encode.
    pub fn encodes(&self) -> &'static [Channel] {
        match self {
            Mark::Point => &[Channel::Color, Channel::Size, Channel::Alpha, Channel::Shape, Channel::Group],
            Mark::Line | Mark::Path | Mark::Range => &[Channel::Color, Channel::Size, Channel::Alpha, Channel::Group],
            Mark::Bar { .. } | Mark::Area | Mark::Band | Mark::Box { .. } | Mark::Violin { .. } => {
                &[Channel::Color, Channel::Alpha, Channel::Group]
            }
            Mark::Text => &[Channel::Color, Channel::Size, Channel::Alpha, Channel::Text, Channel::Group],
        }
    }

    pub fn can_encode(&self, channel: Channel) -> bool {
        channel.is_position() || self.encodes().contains(&channel)
    }

    /// Whether the value axis should include the baseline.
    pub fn has_baseline(&self) -> bool {
        matches!(self, Mark::Bar { .. } | Mark::Area)
    }

    /// Whether the mark spans `Width` along the orient axis.
    pub fn has_width(&self) -> bool {
        matches!(self, Mark::Bar { .. } | Mark::Box { .. } | Mark::Violin { .. })
    }

    pub fn draw(&self, frame: &ScaledFrame, ctx: &MarkContext) -> Vec<DrawCommand> {
        let orient = ctx.orient;
        let value = orient.other();
        let column = |c: Channel| frame.get(c).map(|v| v.to_vec()).unwrap_or_else(|| vec![f64::NAN; frame.len]);
        let pos = column(orient.channel());
        let legend = |row: usize| if frame.keys.is_empty() { None } else { Some(frame.group_key(row)) };
        let xy = |p: f64, v: f64| match orient {
            Axis::X => (p, v),
            Axis::Y => (v, p),
        };

        let mut commands = Vec::new();
        match self {
            Mark::Point => {
                let (x, y) = (column(Channel::X), column(Channel::Y));
                for row in 0..frame.len {
                    if x[row].is_finite() && y[row].is_finite() {
                        commands.push(DrawCommand::DrawPoint {
                            at: (x[row], y[row]),
                            style: self.style(frame, row, ctx),
                            legend: legend(row),
                        });
                    }
                }
            }
            Mark::Line | Mark::Path => {
                let (x, y) = (column(Channel::X), column(Channel::Y));
                for (_, mut rows) in frame.groups(&self.group_channels(frame)) {
                    rows.retain(|&r| x[r].is_finite() && y[r].is_finite());
                    if let Mark::Line = self {
                        rows.sort_by(|&a, &b| pos[a].total_cmp(&pos[b]));
                    }
                    let Some(&first) = rows.first() else { continue };
                    commands.push(DrawCommand::DrawLine {
                        points: rows.iter().map(|&r| (x[r], y[r])).collect(),
                        style: self.style(frame, first, ctx),
                        legend: legend(first),
                    });
                }
            }
            Mark::Bar { .. } => {
                let val = column(value.channel());
                let base = frame.get(Channel::Baseline).map(|b| b.to_vec()).unwrap_or_else(|| vec![0.0; frame.len]);
                let width = column(Channel::Width);
                let (lo, hi) = (frame.get(orient.min_channel()), frame.get(orient.max_channel()));
                for row in 0..frame.len {
                    let (start, end) = match (lo, hi) {
                        (Some(lo), Some(hi)) => (lo[row], hi[row]),
                        _ => (pos[row] - width[row] / 2.0, pos[row] + width[row] / 2.0),
                    };
                    if ![start, end, val[row], base[row]].iter().all(|v| v.is_finite()) {
                        continue;
                    }
                    let (x0, y0) = xy(start, val[row].min(base[row]));
                    let (x1, y1) = xy(end, val[row].max(base[row]));
                    commands.push(DrawCommand::DrawRect {
                        tl: (x0.min(x1), y0.max(y1)),
                        br: (x0.max(x1), y0.min(y1)),
                        style: self.style(frame, row, ctx),
                        legend: legend(row),
                    });
                }
            }
            Mark::Area | Mark::Band => {
                let (upper, lower) = match self {
                    Mark::Area => (
                        column(value.channel()),
                        frame.get(Channel::Baseline).map(|b| b.to_vec()).unwrap_or_else(|| vec![0.0; frame.len]),
                    ),
                    _ => (column(value.max_channel()), column(value.min_channel())),
                };
                for (_, mut rows) in frame.groups(&self.group_channels(frame)) {
                    rows.retain(|&r| pos[r].is_finite() && upper[r].is_finite() && lower[r].is_finite());
                    rows.sort_by(|&a, &b| pos[a].total_cmp(&pos[b]));
                    let Some(&first) = rows.first() else { continue };
                    let mut points: Vec<(f64, f64)> = rows.iter().map(|&r| xy(pos[r], upper[r])).collect();
                    points.extend(rows.iter().rev().map(|&r| xy(pos[r], lower[r])));
                    commands.push(DrawCommand::DrawPolygon {
                        points,
                        style: self.style(frame, first, ctx),
                        legend: legend(first),
                    });
                }
            }
            Mark::Range => {
                let (lo, hi) = (column(value.min_channel()), column(value.max_channel()));
                for row in 0..frame.len {
                    if pos[row].is_finite() && lo[row].is_finite() && hi[row].is_finite() {
                        commands.push(DrawCommand::DrawSegment {
                            from: xy(pos[row], lo[row]),
                            to: xy(pos[row], hi[row]),
                            style: self.style(frame, row, ctx),
                            legend: legend(row),
                        });
                    }
                }
            }
            Mark::Box { .. } => {
                let (val, lo, hi) = (column(value.channel()), column(value.min_channel()), column(value.max_channel()));
                let (q1, q3, width) = (column(Channel::Lower), column(Channel::Upper), column(Channel::Width));
                for row in 0..frame.len {
                    if !pos[row].is_finite() || !val[row].is_finite() {
                        continue;
                    }
                    let style = self.style(frame, row, ctx);
                    if ![q1[row], q3[row], lo[row], hi[row], width[row]].iter().all(|v| v.is_finite()) {
                        let size = ctx.theme.point_size;
                        commands.push(DrawCommand::DrawPoint {
                            at: xy(pos[row], val[row]),
                            style: Style { size, shape: Some(ctx.theme.shape(0)), ..style },
                            legend: legend(row),
                        });
                        continue;
                    }
                    let (left, right) = (pos[row] - width[row] / 2.0, pos[row] + width[row] / 2.0);
                    let (x0, y0) = xy(left, q1[row].min(q3[row]));
                    let (x1, y1) = xy(right, q1[row].max(q3[row]));
                    commands.push(DrawCommand::DrawRect {
                        tl: (x0.min(x1), y0.max(y1)),
                        br: (x0.max(x1), y0.min(y1)),
                        style: style.clone(),
                        legend: legend(row),
                    });
                    let segments = [
                        (xy(left, val[row]), xy(right, val[row])),
                        (xy(pos[row], lo[row]), xy(pos[row], q1[row])),
                        (xy(pos[row], q3[row]), xy(pos[row], hi[row])),
                    ];
                    for (from, to) in segments {
                        commands.push(DrawCommand::DrawSegment { from, to, style: style.clone(), legend: legend(row) });
                    }
                }
            }
            Mark::Violin { .. } => {
                let (val, density, width) = (column(value.channel()), column(Channel::Density), column(Channel::Width));
                let half = |r: usize| density[r] * width[r] / 2.0;
                for (_, rows) in frame.groups(&self.group_channels(frame)) {
                    // one violin per orient position within the group
                    let mut violins: Vec<(u64, Vec<usize>)> = Vec::new();
                    for r in rows {
                        if ![pos[r], val[r], density[r], width[r]].iter().all(|v| v.is_finite()) {
                            continue;
                        }
                        match violins.iter_mut().find(|(p, _)| *p == pos[r].to_bits()) {
                            Some((_, members)) => members.push(r),
                            None => violins.push((pos[r].to_bits(), vec![r])),
                        }
                    }
                    for (_, mut rows) in violins {
                        rows.sort_by(|&a, &b| val[a].total_cmp(&val[b]));
                        let first = rows[0];
                        let mut points: Vec<(f64, f64)> = rows.iter().map(|&r| xy(pos[r] + half(r), val[r])).collect();
                        points.extend(rows.iter().rev().map(|&r| xy(pos[r] - half(r), val[r])));
                        commands.push(DrawCommand::DrawPolygon {
                            points,
                            style: self.style(frame, first, ctx),
                            legend: legend(first),
                        });
                    }
                }
            }
            Mark::Text => {
                let (x, y) = (column(Channel::X), column(Channel::Y));
                for row in 0..frame.len {
                    let text = frame.labels.as_ref().map(|l| l[row].clone()).unwrap_or_default();
                    if x[row].is_finite() && y[row].is_finite() {
                        commands.push(DrawCommand::DrawText {
                            at: (x[row], y[row]),
                            text,
                            style: self.style(frame, row, ctx),
                            legend: legend(row),
                        });
                    }
                }
            }
        }
        commands
    }

    fn group_channels(&self, frame: &ScaledFrame) -> Vec<Channel> {
        frame.keys.keys().copied().collect()
    }

    /// Resolve a row's style: mapped value, then literal, then theme default.
    fn style(&self, frame: &ScaledFrame, row: usize, ctx: &MarkContext) -> Style {
        let theme = ctx.theme;
        let visual = |channel: Channel| {
            frame.visuals.get(&channel).map(|v| &v[row]).or_else(|| ctx.literals.get(&channel))
        };
        let number = |channel: Channel, default: f64| match visual(channel) {
            Some(Visual::Number(n)) => *n,
            _ => default,
        };

        let color = match visual(Channel::Color) {
            Some(Visual::Color(c)) => *c,
            _ => theme.default_color(),
        };
        let (alpha, size) = match self {
            Mark::Point => (theme.alpha, theme.point_size),
            Mark::Line | Mark::Path | Mark::Range => (theme.alpha, theme.line_width),
            Mark::Bar { .. } | Mark::Area | Mark::Violin { .. } => (theme.fill_alpha, 0.0),
            Mark::Box { .. } => (theme.fill_alpha, theme.line_width),
            Mark::Band => (theme.band_alpha, 0.0),
            Mark::Text => (theme.alpha, theme.text_size),
        };
        let shape = match self {
            Mark::Point => Some(match visual(Channel::Shape) {
                Some(Visual::Shape(s)) => s.clone(),
                _ => theme.shape(0),
            }),
            _ => None,
        };
        Style { color, alpha: number(Channel::Alpha, alpha), size: number(Channel::Size, size), shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Rgb;

    fn frame(positions: Vec<(Channel, Vec<f64>)>) -> ScaledFrame {
        let len = positions[0].1.len();
        ScaledFrame { len, positions: positions.into_iter().collect(), ..Default::default() }
    }

    fn draw(mark: &Mark, frame: &ScaledFrame, orient: Axis) -> Vec<DrawCommand> {
        let theme = Theme::default();
        let literals = BTreeMap::new();
        mark.draw(frame, &MarkContext { orient, theme: &theme, literals: &literals })
    }

    #[test]
    fn test_bar_from_baseline() {
        let f = frame(vec![
            (Channel::X, vec![0.0, 1.0]),
            (Channel::Y, vec![1.5, 3.5]),
            (Channel::Width, vec![0.5, 0.5]),
            (Channel::Baseline, vec![0.0, 0.0]),
        ]);
        let commands = draw(&Mark::Bar { width: None }, &f, Axis::X);
        assert_eq!(commands.len(), 2);
        match &commands[1] {
            DrawCommand::DrawRect { tl, br, .. } => {
                assert_eq!(*tl, (0.75, 3.5));
                assert_eq!(*br, (1.25, 0.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_horizontal_bar_swaps_axes() {
        let f = frame(vec![
            (Channel::Y, vec![0.0]),
            (Channel::X, vec![2.0]),
            (Channel::Width, vec![0.5]),
            (Channel::Baseline, vec![0.0]),
        ]);
        match &draw(&Mark::Bar { width: None }, &f, Axis::Y)[0] {
            DrawCommand::DrawRect { tl, br, .. } => {
                assert_eq!(*tl, (0.0, 0.25));
                assert_eq!(*br, (2.0, -0.25));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_line_sorted_path_not() {
        let f = frame(vec![(Channel::X, vec![2.0, 0.0, 1.0]), (Channel::Y, vec![1.0, 2.0, 3.0])]);
        match &draw(&Mark::Line, &f, Axis::X)[0] {
            DrawCommand::DrawLine { points, .. } => assert_eq!(points, &vec![(0.0, 2.0), (1.0, 3.0), (2.0, 1.0)]),
            other => panic!("unexpected {:?}", other),
        }
        match &draw(&Mark::Path, &f, Axis::X)[0] {
            DrawCommand::DrawLine { points, .. } => assert_eq!(points[0], (2.0, 1.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_band_polygon() {
        let f = frame(vec![
            (Channel::X, vec![0.0, 1.0]),
            (Channel::Ymin, vec![1.0, 2.0]),
            (Channel::Ymax, vec![3.0, 4.0]),
        ]);
        match &draw(&Mark::Band, &f, Axis::X)[0] {
            DrawCommand::DrawPolygon { points, style, .. } => {
                assert_eq!(points, &vec![(0.0, 3.0), (1.0, 4.0), (1.0, 2.0), (0.0, 1.0)]);
                assert_eq!(style.alpha, Theme::default().band_alpha);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_style_precedence() {
        let mut f = frame(vec![(Channel::X, vec![0.0, 1.0]), (Channel::Y, vec![0.0, 1.0])]);
        f.visuals.insert(Channel::Color, vec![Visual::Color(Rgb(1, 2, 3)), Visual::Color(Rgb(4, 5, 6))]);
        let theme = Theme::default();
        let mut literals = BTreeMap::new();
        literals.insert(Channel::Size, Visual::Number(9.0));
        literals.insert(Channel::Color, Visual::Color(Rgb(0, 0, 0)));
        let commands = Mark::Point.draw(&f, &MarkContext { orient: Axis::X, theme: &theme, literals: &literals });
        match &commands[1] {
            DrawCommand::DrawPoint { style, .. } => {
                assert_eq!(style.color, Rgb(4, 5, 6));
                assert_eq!(style.size, 9.0);
                assert_eq!(style.shape.as_deref(), Some("circle"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_range_and_missing_values() {
        let f = frame(vec![
            (Channel::X, vec![0.0, 1.0]),
            (Channel::Ymin, vec![1.0, f64::NAN]),
            (Channel::Ymax, vec![2.0, 3.0]),
        ]);
        let commands = draw(&Mark::Range, &f, Axis::X);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_box_with_outlier() {
        let nan = f64::NAN;
        let f = frame(vec![
            (Channel::X, vec![0.0, 0.0]),
            (Channel::Y, vec![3.0, 100.0]),
            (Channel::Ymin, vec![1.0, nan]),
            (Channel::Ymax, vec![4.0, nan]),
            (Channel::Lower, vec![2.0, nan]),
            (Channel::Upper, vec![4.0, nan]),
            (Channel::Width, vec![0.8, 0.8]),
        ]);
        let commands = draw(&Mark::Box { width: None }, &f, Axis::X);
        // box, median, two whiskers, one outlier
        assert_eq!(commands.len(), 5);
        match &commands[0] {
            DrawCommand::DrawRect { tl, br, .. } => {
                assert_eq!(*tl, (-0.4, 4.0));
                assert_eq!(*br, (0.4, 2.0));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &commands[2] {
            DrawCommand::DrawSegment { from, to, .. } => assert_eq!((*from, *to), ((0.0, 1.0), (0.0, 2.0))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&commands[4], DrawCommand::DrawPoint { at: (x, y), .. } if *x == 0.0 && *y == 100.0));
    }

    #[test]
    fn test_violin_mirrors_density() {
        let f = frame(vec![
            (Channel::Y, vec![0.0, 0.0, 0.0, 1.0]),
            (Channel::X, vec![0.0, 1.0, 2.0, 1.0]),
            (Channel::Density, vec![0.5, 1.0, 0.5, 1.0]),
            (Channel::Width, vec![0.8; 4]),
        ]);
        let commands = draw(&Mark::Violin { width: None }, &f, Axis::Y);
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            DrawCommand::DrawPolygon { points, .. } => {
                assert_eq!(points.len(), 6);
                assert_eq!(points[1], (1.0, 0.4));
                assert_eq!(points[4], (1.0, -0.4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_required_channels() {
        assert_eq!(Mark::Range.required(Axis::Y), vec![Channel::Y, Channel::Xmin, Channel::Xmax]);
        assert!(Mark::Text.required(Axis::X).contains(&Channel::Text));
        assert!(!Mark::Line.can_encode(Channel::Shape));
        assert!(Mark::Line.can_encode(Channel::Ymax));
        assert!(Mark::Violin { width: None }.required(Axis::X).contains(&Channel::Density));
        assert_eq!(Mark::parse("boxplot"), Some(Mark::Box { width: None }));
    }
}
