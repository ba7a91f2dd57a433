mod bulk;
mod call;
mod delete;
mod detail;
mod insert;
mod materialize;
mod merge;
mod select;
mod update;

pub use bulk::*;
pub use call::*;
pub use delete::*;
pub use insert::*;
pub use merge::*;
pub use select::*;
pub use update::*;

pub(crate) use detail::*;
pub(crate) use materialize::*;

use crate::{
    CancellationToken, EntityMetadata, Expression, Order, Ordered, Result, TableHints,
    UsageError, Value, Variant, and_all, col, error::raise, parse_filter,
};
use std::{borrow::Cow, time::Duration};

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub variant: Variant,
    /// Close a non ambient connection after the command instead of keeping it idle.
    pub close_connection: bool,
    pub timeout: Option<Duration>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub filters: Vec<Expression>,
    pub text_filters: Vec<String>,
    pub order: Vec<Ordered>,
    /// Partial columns and detail tables to load, all by default.
    pub partial: u64,
    pub hints: Option<TableHints>,
    pub cancel: Option<CancellationToken>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            variant: 0,
            close_connection: true,
            timeout: None,
            top: None,
            skip: None,
            filters: Vec::new(),
            text_filters: Vec::new(),
            order: Vec::new(),
            partial: u64::MAX,
            hints: None,
            cancel: None,
        }
    }
}

impl CommandOptions {
    /// Typed and text filters, parsed and ANDed together with `extra`.
    pub fn predicate(&self, extra: Option<Expression>) -> Result<Option<Expression>> {
        let mut filters = Vec::with_capacity(self.filters.len() + self.text_filters.len() + 1);
        filters.extend(extra);
        filters.extend(self.filters.iter().cloned());
        for text in &self.text_filters {
            filters.push(parse_filter(text)?);
        }
        Ok(and_all(filters))
    }

    pub(crate) fn timeout_or(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout.or(default)
    }
}

/// Fluent options available on every command builder.
pub trait CommandBuilder: Sized {
    fn options_mut(&mut self) -> &mut CommandOptions;

    fn variant(mut self, variant: Variant) -> Self {
        self.options_mut().variant = variant;
        self
    }

    fn close_connection(mut self, close: bool) -> Self {
        self.options_mut().close_connection = close;
        self
    }

    fn timeout(mut self, timeout: Duration) -> Self {
        self.options_mut().timeout = Some(timeout);
        self
    }

    fn top(mut self, top: u64) -> Self {
        self.options_mut().top = Some(top);
        self
    }

    fn skip(mut self, skip: u64) -> Self {
        self.options_mut().skip = Some(skip);
        self
    }

    /// Add a filter, several filters are ANDed.
    fn filter(mut self, filter: Expression) -> Self {
        self.options_mut().filters.push(filter);
        self
    }

    /// Add a filter in text form, parsed when the command is compiled.
    fn filter_text(mut self, filter: impl Into<String>) -> Self {
        self.options_mut().text_filters.push(filter.into());
        self
    }

    fn order_by(mut self, field: impl Into<Cow<'static, str>>, order: Order) -> Self {
        self.options_mut().order.push(Ordered {
            field: field.into(),
            order,
        });
        self
    }

    fn partial(mut self, mask: u64) -> Self {
        self.options_mut().partial = mask;
        self
    }

    fn hints(mut self, hints: TableHints) -> Self {
        self.options_mut().hints = Some(hints);
        self
    }

    fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.options_mut().cancel = Some(token);
        self
    }
}

/// `key1 = @p0 AND key2 = @p1` for the key columns of `metadata`.
pub(crate) fn key_predicate(metadata: &EntityMetadata, values: &[Value]) -> Result<Expression> {
    metadata.require_key()?;
    if values.len() != metadata.key.len() {
        return Err(raise(UsageError::KeyArity {
            entity: metadata.entity.clone(),
            expected: metadata.key.len(),
            actual: values.len(),
        }));
    }
    let predicates = metadata
        .key_columns()
        .zip(values)
        .map(|(c, v)| col(c.field.clone()).eq(Expression::Constant(v.clone())));
    and_all(predicates).ok_or_else(|| {
        raise(UsageError::MissingKey {
            entity: metadata.entity.clone(),
        })
    })
}

/// `value` as the integer variant of `prototype`.
pub(crate) fn typed_integer(prototype: &Value, value: i64) -> Value {
    match prototype {
        Value::Int8(..) => Value::Int8(i8::try_from(value).ok()),
        Value::Int16(..) => Value::Int16(i16::try_from(value).ok()),
        Value::Int32(..) => Value::Int32(i32::try_from(value).ok()),
        Value::UInt8(..) => Value::UInt8(u8::try_from(value).ok()),
        Value::UInt16(..) => Value::UInt16(u16::try_from(value).ok()),
        Value::UInt32(..) => Value::UInt32(u32::try_from(value).ok()),
        Value::UInt64(..) => Value::UInt64(u64::try_from(value).ok()),
        _ => Value::Int64(Some(value)),
    }
}
