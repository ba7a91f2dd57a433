use crate::{AsValue, Value, separated_by, truncate_long};
use std::{
    borrow::Cow,
    fmt::{self, Display},
    sync::Arc,
    time::Duration,
};

/// Direction of a statement or procedure parameter.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
    Return,
}

/// A named, typed parameter. The wire type is the variant of `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name without the `@` prefix.
    pub name: Cow<'static, str>,
    pub value: Value,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub direction: Direction,
}

impl Parameter {
    pub fn new(name: impl Into<Cow<'static, str>>, value: impl AsValue) -> Self {
        Self {
            name: name.into(),
            value: value.as_value(),
            size: None,
            precision: None,
            scale: None,
            direction: Direction::In,
        }
    }
    pub fn input(name: impl Into<Cow<'static, str>>, value: impl AsValue) -> Self {
        Self::new(name, value)
    }
    /// Output parameter, `prototype` gives its type.
    pub fn output(name: impl Into<Cow<'static, str>>, prototype: Value) -> Self {
        Self {
            direction: Direction::Out,
            ..Self::new(name, prototype.as_null())
        }
    }
    pub fn input_output(name: impl Into<Cow<'static, str>>, value: impl AsValue) -> Self {
        Self {
            direction: Direction::InOut,
            ..Self::new(name, value)
        }
    }
    pub fn return_value(prototype: Value) -> Self {
        Self {
            direction: Direction::Return,
            ..Self::new("return_value", prototype.as_null())
        }
    }
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
    pub fn is_output(&self) -> bool {
        self.direction != Direction::In
    }
}

/// SQL text with its parameters, ready for an [`Executor`](crate::Executor).
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub parameters: Vec<Parameter>,
    pub timeout: Option<Duration>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }
    pub fn bind(mut self, name: impl Into<Cow<'static, str>>, value: impl AsValue) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query::new(value)
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query::new(value)
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", truncate_long!(self.sql))?;
        if !self.parameters.is_empty() {
            let mut out = String::new();
            separated_by(
                &mut out,
                &self.parameters,
                |out, p| {
                    out.push('@');
                    out.push_str(&p.name);
                    out.push_str(" = ");
                    out.push_str(&p.value.to_string());
                },
                ", ",
            );
            write!(f, "\n-- {}", out)?;
        }
        Ok(())
    }
}

/// Metadata about modify operations (INSERT/UPDATE/DELETE).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsAffected {
    /// Total number of rows impacted.
    pub rows_affected: u64,
    /// Backend-specific last inserted / affected identifier when available.
    pub last_affected_id: Option<i64>,
}

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;
/// Owned row value slice matching `RowNames` length.
pub type Row = Box<[Value]>;

/// A result row with its corresponding column labels.
#[derive(Debug, Clone)]
pub struct RowLabeled {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Row,
}

impl RowLabeled {
    pub fn new(names: RowNames, values: Row) -> Self {
        Self {
            labels: names,
            values,
        }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .position(|v| v == name)
            .map(|i| &self.values()[i])
    }
}

/// Items emitted by `Executor::run`.
#[derive(Debug)]
pub enum QueryResult {
    Row(RowLabeled),
    Affected(RowsAffected),
    /// Final value of an output, input-output or return parameter.
    Output(Parameter),
}

impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            if elem.last_affected_id.is_some() {
                self.last_affected_id = elem.last_affected_id;
            }
        }
    }
}

impl From<RowLabeled> for Row {
    fn from(value: RowLabeled) -> Self {
        value.values
    }
}

impl From<RowLabeled> for QueryResult {
    fn from(value: RowLabeled) -> Self {
        QueryResult::Row(value)
    }
}

impl From<RowsAffected> for QueryResult {
    fn from(value: RowsAffected) -> Self {
        QueryResult::Affected(value)
    }
}
