// Pipeline parser for the plot DSL

use super::ast::PlotSpec;
use super::lexer::{call, ws};
use nom::{
    bytes::complete::tag,
    combinator::{eof, opt},
    multi::separated_list1,
    sequence::terminated,
    IResult,
};

/// Parse a complete plot specification
/// Format: [df |] component | component | ...
pub fn parse_plot_spec(input: &str) -> IResult<&str, PlotSpec> {
    // Optional: consume leading "df |"
    let (input, _) = opt(terminated(ws(tag("df")), ws(tag("|"))))(input)?;

    let (input, components) = separated_list1(ws(tag("|")), call)(input)?;
    let (input, _) = ws(eof)(input)?;

    Ok((input, PlotSpec { components }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aes_and_bar() {
        let (_, spec) = parse_plot_spec("aes(x: category, y: value) | bar(stat: mean)").unwrap();
        assert_eq!(spec.components.len(), 2);
        assert_eq!(spec.components[0].name, "aes");
        assert_eq!(spec.components[1].name, "bar");
    }

    #[test]
    fn test_parse_with_df_prefix() {
        let (_, spec) = parse_plot_spec("df | aes(x: a, y: b) | line()").unwrap();
        assert_eq!(spec.components.len(), 2);
    }

    #[test]
    fn test_parse_multiline() {
        let input = "aes(x: a, y: b)\n  | point(color: g)\n  | facet(col: h, share_y: none)\n  | scale_y(log: 10)";
        let (_, spec) = parse_plot_spec(input).unwrap();
        assert_eq!(spec.components.len(), 4);
        assert_eq!(spec.components[3].name, "scale_y");
    }

    #[test]
    fn test_parse_trailing_pipe() {
        assert!(parse_plot_spec("aes(x: a, y: b) | line() |").is_err());
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse_plot_spec("").is_err());
    }

    #[test]
    fn test_parse_garbage_after_pipeline() {
        assert!(parse_plot_spec("line() extra").is_err());
    }
}
