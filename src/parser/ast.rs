// Abstract syntax tree for the plot DSL

/// A parsed pipeline: `aes(...) | bar(...) | facet(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSpec {
    pub components: Vec<Call>,
}

/// One pipeline component or nested argument: `name(args...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    /// `None` for positional arguments.
    pub key: Option<String>,
    pub value: ArgValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Quoted string: a literal.
    Str(String),
    Number(f64),
    /// Bare name: a column, or a keyword such as `stack` or `true`.
    Ident(String),
    List(Vec<ArgValue>),
    Call(Call),
}

impl ArgValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text of a string or a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) | ArgValue::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_name()? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// The elements of a list, or the value itself.
    pub fn items(&self) -> &[ArgValue] {
        match self {
            ArgValue::List(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        }
    }

    /// Name and arguments of a call; a bare name is a call without arguments.
    pub fn as_call(&self) -> Option<(&str, &[Arg])> {
        match self {
            ArgValue::Call(call) => Some((call.name.as_str(), call.args.as_slice())),
            ArgValue::Ident(name) => Some((name.as_str(), &[][..])),
            _ => None,
        }
    }
}

impl Call {
    /// Value of a named argument.
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        named(&self.args, key)
    }
}

pub fn named<'a>(args: &'a [Arg], key: &str) -> Option<&'a ArgValue> {
    args.iter().find(|a| a.key.as_deref() == Some(key)).map(|a| &a.value)
}

/// Named argument, falling back to the `index`-th positional one.
pub fn named_or_positional<'a>(args: &'a [Arg], key: &str, index: usize) -> Option<&'a ArgValue> {
    named(args, key).or_else(|| args.iter().filter(|a| a.key.is_none()).nth(index).map(|a| &a.value))
}
