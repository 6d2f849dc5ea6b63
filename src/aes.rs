//! Visual channels and variable mappings.

use crate::data::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A visual property a mark can encode.
///
/// `Width`, `Baseline`, `Lower`, `Upper` and `Density` are internal columns
/// produced by stats and moves; they are never mapped by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    X,
    Y,
    Xmin,
    Xmax,
    Ymin,
    Ymax,
    Color,
    Size,
    Alpha,
    Shape,
    Text,
    Group,
    Width,
    Baseline,
    /// First quartile of a box, on the value axis.
    Lower,
    /// Third quartile of a box, on the value axis.
    Upper,
    /// Violin half-width as a fraction of the mark width.
    Density,
}

/// Position axis. Also used as the orientation of a layer: the axis holding
/// the independent (grouping) variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }

    /// The primary channel on this axis.
    pub fn channel(self) -> Channel {
        match self {
            Axis::X => Channel::X,
            Axis::Y => Channel::Y,
        }
    }

    pub fn min_channel(self) -> Channel {
        match self {
            Axis::X => Channel::Xmin,
            Axis::Y => Channel::Ymin,
        }
    }

    pub fn max_channel(self) -> Channel {
        match self {
            Axis::X => Channel::Xmax,
            Axis::Y => Channel::Ymax,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
        })
    }
}

impl Channel {
    pub const VISUAL: [Channel; 4] = [Channel::Color, Channel::Size, Channel::Alpha, Channel::Shape];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::X => "x",
            Channel::Y => "y",
            Channel::Xmin => "xmin",
            Channel::Xmax => "xmax",
            Channel::Ymin => "ymin",
            Channel::Ymax => "ymax",
            Channel::Color => "color",
            Channel::Size => "size",
            Channel::Alpha => "alpha",
            Channel::Shape => "shape",
            Channel::Text => "text",
            Channel::Group => "group",
            Channel::Width => "width",
            Channel::Baseline => "baseline",
            Channel::Lower => "lower",
            Channel::Upper => "upper",
            Channel::Density => "density",
        }
    }

    pub fn parse(name: &str) -> Option<Channel> {
        let channel = match name.to_ascii_lowercase().as_str() {
            "x" => Channel::X,
            "y" => Channel::Y,
            "xmin" => Channel::Xmin,
            "xmax" => Channel::Xmax,
            "ymin" => Channel::Ymin,
            "ymax" => Channel::Ymax,
            "color" | "colour" | "fill" | "hue" => Channel::Color,
            "size" | "linewidth" => Channel::Size,
            "alpha" => Channel::Alpha,
            "shape" | "marker" => Channel::Shape,
            "text" | "label" => Channel::Text,
            "group" => Channel::Group,
            _ => return None,
        };
        Some(channel)
    }

    /// The position axis this channel lives on, if any.
    pub fn axis(&self) -> Option<Axis> {
        match self {
            Channel::X | Channel::Xmin | Channel::Xmax => Some(Axis::X),
            Channel::Y | Channel::Ymin | Channel::Ymax => Some(Axis::Y),
            _ => None,
        }
    }

    /// The channel whose scale this channel is mapped through.
    ///
    /// `xmin`/`xmax` share the `x` scale; text, group and internal columns
    /// have no scale.
    pub fn scale_channel(&self) -> Option<Channel> {
        match self {
            Channel::X | Channel::Xmin | Channel::Xmax => Some(Channel::X),
            Channel::Y | Channel::Ymin | Channel::Ymax => Some(Channel::Y),
            Channel::Color | Channel::Size | Channel::Alpha | Channel::Shape => Some(*self),
            Channel::Text
            | Channel::Group
            | Channel::Width
            | Channel::Baseline
            | Channel::Lower
            | Channel::Upper
            | Channel::Density => None,
        }
    }

    pub fn is_position(&self) -> bool {
        self.axis().is_some()
    }

    pub fn is_visual(&self) -> bool {
        Channel::VISUAL.contains(self)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of a channel: a data column or a fixed literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mapping {
    Column(String),
    Constant(Value),
}

impl Mapping {
    pub fn column(&self) -> Option<&str> {
        match self {
            Mapping::Column(c) => Some(c),
            Mapping::Constant(_) => None,
        }
    }
}

impl From<&str> for Mapping {
    fn from(column: &str) -> Self {
        Mapping::Column(column.to_string())
    }
}

impl From<String> for Mapping {
    fn from(column: String) -> Self {
        Mapping::Column(column)
    }
}

/// Channel → source table. A channel holds at most one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aesthetics {
    mappings: BTreeMap<Channel, Mapping>,
}

impl Aesthetics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a channel to a column, replacing any previous source.
    pub fn with(mut self, channel: Channel, column: impl Into<String>) -> Self {
        self.mappings.insert(channel, Mapping::Column(column.into()));
        self
    }

    /// Map a channel to a literal value, replacing any previous source.
    pub fn with_constant(mut self, channel: Channel, value: impl Into<Value>) -> Self {
        self.mappings.insert(channel, Mapping::Constant(value.into()));
        self
    }

    pub fn set(&mut self, channel: Channel, mapping: Mapping) {
        self.mappings.insert(channel, mapping);
    }

    pub fn get(&self, channel: Channel) -> Option<&Mapping> {
        self.mappings.get(&channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.mappings.contains_key(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &Mapping)> {
        self.mappings.iter().map(|(c, m)| (*c, m))
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Layer mappings layered over plot-level defaults.
    pub fn inherit(&self, defaults: &Aesthetics) -> Aesthetics {
        let mut merged = defaults.clone();
        for (channel, mapping) in &self.mappings {
            merged.mappings.insert(*channel, mapping.clone());
        }
        merged
    }
}
