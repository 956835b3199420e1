//! Typed values crossing the host/interpreter boundary

use serde::Serialize;

/// Maximum number of values kept from a table result
pub const MAX_RESULT_VALUES: usize = 128;

/// One marshalled value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ResultValue {
    /// Execution failed or the value had no host representation
    #[default]
    Error,
    /// nil / unit
    Nil,
    /// Boolean
    Boolean(bool),
    /// Any numeric value, widened to a double
    Number(f64),
    /// String, copied out of the interpreter
    String(String),
    /// Nested table (contents are not flattened)
    Table,
}

impl ResultValue {
    /// Name of the value's type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table => "table",
        }
    }

    /// Whether this is an error value
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Whether this is a boolean
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    /// Whether this is a number
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Whether this is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Whether this is a nested table
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table)
    }

    /// String rendering used by `get_result`
    ///
    /// Booleans render as `true`/`false`, numbers like C's `%g`, strings
    /// verbatim. Other values have no rendering.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Boolean(b) => Some(b.to_string()),
            Self::Number(n) => Some(format_g(*n, 6)),
            Self::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Outcome of one script call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    /// A single scalar value
    Single(ResultValue),
    /// A sequence of at most [`MAX_RESULT_VALUES`] values
    Table(Vec<ResultValue>),
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self::error()
    }
}

impl ExecutionResult {
    /// Single error value
    pub fn error() -> Self {
        Self::Single(ResultValue::Error)
    }

    /// The scalar value, if this is not a table
    pub fn value(&self) -> Option<&ResultValue> {
        match self {
            Self::Single(value) => Some(value),
            Self::Table(_) => None,
        }
    }

    /// Whether this is a table result
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table(_))
    }

    /// Number of table values (0 for scalars)
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 0,
            Self::Table(values) => values.len(),
        }
    }

    /// Whether there are no table values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Table value at `index`
    pub fn get(&self, index: usize) -> Option<&ResultValue> {
        match self {
            Self::Single(_) => None,
            Self::Table(values) => values.get(index),
        }
    }
}

/// Render a double the way C's `%.<precision>g` does
pub fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };

    if exponent < -4 || exponent >= precision as i32 {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
