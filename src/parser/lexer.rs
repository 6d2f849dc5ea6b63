// Lexical helpers for the plot DSL

use super::ast::{Arg, ArgValue, Call};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{map, opt, recognize},
    multi::{many0_count, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, terminated},
    IResult,
};

/// Wrap a parser so it skips surrounding whitespace.
pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// A bare name (`total_sales`) or a backquoted one (`` `unit price` ``).
pub fn identifier(input: &str) -> IResult<&str, String> {
    alt((
        map(
            recognize(pair(
                alt((alpha1, tag("_"))),
                many0_count(alt((alphanumeric1, tag("_"), tag(".")))),
            )),
            String::from,
        ),
        map(delimited(char('`'), is_not("`"), char('`')), String::from),
    ))(input)
}

/// A double-quoted string without escapes.
pub fn string_literal(input: &str) -> IResult<&str, String> {
    map(delimited(char('"'), opt(is_not("\"")), char('"')), |s: Option<&str>| {
        s.unwrap_or_default().to_string()
    })(input)
}

pub fn number_literal(input: &str) -> IResult<&str, f64> {
    double(input)
}

/// A single argument value. Calls are tried before bare names, and names
/// before numbers so `inf` stays a name.
pub fn value(input: &str) -> IResult<&str, ArgValue> {
    alt((
        map(string_literal, ArgValue::Str),
        map(
            delimited(ws(char('[')), separated_list0(ws(char(',')), ws(value)), ws(char(']'))),
            ArgValue::List,
        ),
        map(call, ArgValue::Call),
        map(identifier, ArgValue::Ident),
        map(number_literal, ArgValue::Number),
    ))(input)
}

/// `key: value` or a positional `value`.
pub fn arg(input: &str) -> IResult<&str, Arg> {
    map(
        pair(opt(terminated(ws(identifier), char(':'))), ws(value)),
        |(key, value)| Arg { key, value },
    )(input)
}

/// `name(arg, ...)`
pub fn call(input: &str) -> IResult<&str, Call> {
    map(
        pair(
            ws(identifier),
            delimited(ws(char('(')), separated_list0(ws(char(',')), arg), ws(char(')'))),
        ),
        |(name, args)| Call { name, args },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("total_sales rest"), Ok((" rest", "total_sales".to_string())));
        assert_eq!(identifier("`unit price`"), Ok(("", "unit price".to_string())));
        assert!(identifier("1abc").is_err());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal(r#""red""#), Ok(("", "red".to_string())));
        assert_eq!(string_literal(r#""""#), Ok(("", String::new())));
        assert!(string_literal(r#""unterminated"#).is_err());
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(value("2.5"), Ok(("", ArgValue::Number(2.5))));
        assert_eq!(value("inf"), Ok(("", ArgValue::Ident("inf".to_string()))));
        assert_eq!(
            value("[a, 1]"),
            Ok(("", ArgValue::List(vec![ArgValue::Ident("a".to_string()), ArgValue::Number(1.0)])))
        );
    }

    #[test]
    fn test_nested_call() {
        let (rest, parsed) = call("bar(stat: mean(errorbar: ci(95)), move: stack)").unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.name, "bar");
        assert_eq!(parsed.args.len(), 2);
        let ArgValue::Call(stat) = &parsed.args[0].value else { panic!("expected call") };
        assert_eq!(stat.name, "mean");
        assert_eq!(parsed.args[1].key.as_deref(), Some("move"));
    }

    #[test]
    fn test_call_positional_and_empty() {
        let (_, parsed) = call("ci(95)").unwrap();
        assert_eq!(parsed.args, vec![Arg { key: None, value: ArgValue::Number(95.0) }]);
        let (_, parsed) = call("line( )").unwrap();
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_call_unclosed_paren() {
        assert!(call("aes(x: a, y: b").is_err());
    }
}
