//! Error taxonomy for the grammar pipeline.
//!
//! Fatal errors are surfaced from `Plot::render` before any drawing happens.
//! Per-group shortfalls in stat transforms are recovered locally and reported
//! as [`Warning`]s on the resulting scene graph.

use crate::aes::Channel;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlotError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlotError {
    /// Contributing data for a channel has incompatible or ambiguous types.
    #[error("cannot fit {channel} scale{}: {reason}", at_layer(.layer))]
    ScaleFit {
        channel: Channel,
        layer: Option<usize>,
        reason: String,
    },

    /// A value was looked up in a categorical scale that does not contain it.
    #[error("value '{value}' is not in the fitted {channel} scale domain{}", at_layer(.layer))]
    ScaleMismatch {
        channel: Channel,
        layer: Option<usize>,
        value: String,
    },

    /// A mark requires a channel that is neither mapped nor computed by the stat.
    #[error("layer {layer}: {mark} mark requires a `{channel}` mapping")]
    MissingMapping {
        channel: Channel,
        layer: usize,
        mark: &'static str,
    },

    /// A move cannot operate on the scale kind of the channel it adjusts.
    #[error("layer {layer}: {operation} cannot adjust `{channel}`: {reason}")]
    MoveApplicability {
        channel: Channel,
        layer: usize,
        operation: &'static str,
        reason: String,
    },

    /// A stat received input it cannot transform (e.g. binning text values).
    #[error("layer {layer}: {stat} stat cannot use `{channel}`: {reason}")]
    StatApplicability {
        channel: Channel,
        layer: usize,
        stat: &'static str,
        reason: String,
    },

    #[error("column '{column}' not found{}", at_layer(.layer))]
    ColumnNotFound {
        column: String,
        layer: Option<usize>,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

fn at_layer(layer: &Option<usize>) -> String {
    match layer {
        Some(i) => format!(" (layer {})", i),
        None => String::new(),
    }
}

/// A group that was too small for its stat and was dropped from the output.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("layer {layer}: {stat} dropped group '{group}' with {size} rows (needs at least {required})")]
pub struct TransformGroupError {
    pub layer: usize,
    pub stat: &'static str,
    pub group: String,
    pub size: usize,
    pub required: usize,
}

/// Non-fatal conditions collected while running the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    TransformGroup(TransformGroupError),
    DroppedRows {
        layer: usize,
        channel: Channel,
        count: usize,
        reason: String,
    },
    IgnoredChannel {
        layer: usize,
        channel: Channel,
        mark: &'static str,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::TransformGroup(e) => write!(f, "{}", e),
            Warning::DroppedRows { layer, channel, count, reason } => write!(
                f,
                "layer {}: dropped {} rows with {} `{}` values",
                layer, count, reason, channel
            ),
            Warning::IgnoredChannel { layer, channel, mark } => write!(
                f,
                "layer {}: {} mark cannot encode `{}`; mapping ignored",
                layer, mark, channel
            ),
        }
    }
}

/// Record a warning and emit it through `tracing`.
pub(crate) fn record(warnings: &mut Vec<Warning>, warning: Warning) {
    tracing::warn!("{}", warning);
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = PlotError::ScaleMismatch {
            channel: Channel::X,
            layer: Some(2),
            value: "zebra".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("zebra"));
        assert!(msg.contains("layer 2"));
        assert!(msg.contains("x"));

        let err = PlotError::MissingMapping { channel: Channel::Y, layer: 0, mark: "bar" };
        assert_eq!(err.to_string(), "layer 0: bar mark requires a `y` mapping");
    }

    #[test]
    fn test_scale_fit_without_layer() {
        let err = PlotError::ScaleFit {
            channel: Channel::Color,
            layer: None,
            reason: "mixed".to_string(),
        };
        assert_eq!(err.to_string(), "cannot fit color scale: mixed");
    }

    #[test]
    fn test_group_warning_display() {
        let w = Warning::TransformGroup(TransformGroupError {
            layer: 1,
            stat: "polyfit",
            group: "A".to_string(),
            size: 1,
            required: 2,
        });
        assert!(w.to_string().contains("dropped group 'A'"));
    }
}
