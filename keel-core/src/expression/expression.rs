use crate::{AsValue, BinaryOpType, Method, UnaryOpType, Value};
use rust_decimal::Decimal;
use std::borrow::Cow;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Predicate and value expression over the fields of one entity.
///
/// Built with [`col`], [`val`], [`null`] and the combinator methods, or parsed
/// from a text filter with [`parse_filter`](crate::parse_filter). The
/// [`SqlWriter`](crate::SqlWriter) compiles it into parameterized SQL.
///
/// ```rust
/// use keel_core::{col, val};
/// let filter = col("age").ge(18).and(col("name").starts_with("A"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Member access, resolved against field names then column names.
    Column(Cow<'static, str>),
    Constant(Value),
    Binary(BinaryOpType, Box<Expression>, Box<Expression>),
    Unary(UnaryOpType, Box<Expression>),
    /// Conversion to the type of the prototype value.
    Cast(Box<Expression>, Value),
    /// Access to the primitive wrapped by a domain type or a nullable.
    Unwrap(Box<Expression>),
    Call(Method, Box<Expression>, Vec<Expression>),
    In(Box<Expression>, Vec<Value>),
    Conditional(Box<Expression>, Box<Expression>, Box<Expression>),
}

pub fn col(field: impl Into<Cow<'static, str>>) -> Expression {
    Expression::Column(field.into())
}

pub fn val(value: impl AsValue) -> Expression {
    Expression::Constant(value.as_value())
}

pub fn null() -> Expression {
    Expression::Constant(Value::Null)
}

/// Conjunction of every predicate, `None` when there is none.
pub fn and_all(predicates: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    predicates.into_iter().reduce(Expression::and)
}

/// Disjunction of every predicate, `None` when there is none.
pub fn or_any(predicates: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    predicates.into_iter().reduce(Expression::or)
}

macro_rules! binary {
    ($($name:ident => $op:ident),+ $(,)?) => {
        $(
            pub fn $name(self, rhs: impl Into<Expression>) -> Expression {
                Expression::Binary(BinaryOpType::$op, self.into(), Box::new(rhs.into()))
            }
        )+
    };
}

impl Expression {
    binary! {
        eq => Equal,
        ne => NotEqual,
        lt => Less,
        le => LessEqual,
        gt => Greater,
        ge => GreaterEqual,
        and => And,
        or => Or,
        add => Addition,
        sub => Subtraction,
        mul => Multiplication,
        div => Division,
        rem => Remainder,
        bit_and => BitwiseAnd,
        bit_or => BitwiseOr,
        concat => Concat,
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expression {
        Expression::Unary(UnaryOpType::Not, self.into())
    }
    pub fn neg(self) -> Expression {
        Expression::Unary(UnaryOpType::Negative, self.into())
    }
    pub fn is_null(self) -> Expression {
        self.eq(null())
    }
    pub fn is_not_null(self) -> Expression {
        self.ne(null())
    }
    pub fn contains(self, pattern: impl Into<Expression>) -> Expression {
        self.call(Method::Contains, [pattern.into()])
    }
    pub fn starts_with(self, pattern: impl Into<Expression>) -> Expression {
        self.call(Method::StartsWith, [pattern.into()])
    }
    pub fn ends_with(self, pattern: impl Into<Expression>) -> Expression {
        self.call(Method::EndsWith, [pattern.into()])
    }
    pub fn has_flag(self, flag: impl Into<Expression>) -> Expression {
        self.call(Method::HasFlag, [flag.into()])
    }
    pub fn call(self, method: Method, args: impl IntoIterator<Item = Expression>) -> Expression {
        Expression::Call(method, self.into(), args.into_iter().collect())
    }
    pub fn is_in<V: AsValue>(self, values: impl IntoIterator<Item = V>) -> Expression {
        Expression::In(self.into(), values.into_iter().map(AsValue::as_value).collect())
    }
    /// Cast to the type described by `prototype`, for example `Value::Int64(None)`.
    pub fn cast(self, prototype: Value) -> Expression {
        Expression::Cast(self.into(), prototype.as_null())
    }
    pub fn unwrap(self) -> Expression {
        Expression::Unwrap(self.into())
    }
    pub fn when(
        condition: Expression,
        then: impl Into<Expression>,
        otherwise: impl Into<Expression>,
    ) -> Expression {
        Expression::Conditional(
            condition.into(),
            Box::new(then.into()),
            Box::new(otherwise.into()),
        )
    }

    /// Whether the expression is the literal NULL.
    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expression::Constant(v) if v.is_null())
    }

    /// The column reached through casts and unwraps, if any.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expression::Column(name) => Some(name),
            Expression::Cast(inner, ..) | Expression::Unwrap(inner) => inner.as_column(),
            _ => None,
        }
    }
}

macro_rules! impl_from_constant {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Expression {
                fn from(value: $ty) -> Self {
                    Expression::Constant(value.as_value())
                }
            }
        )+
    };
}

impl_from_constant!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    char,
    String,
    &str,
    Vec<u8>,
    Decimal,
    Date,
    Time,
    PrimitiveDateTime,
    OffsetDateTime,
    Uuid,
    Value,
);

impl<T: AsValue> From<Option<T>> for Expression {
    fn from(value: Option<T>) -> Self {
        Expression::Constant(value.as_value())
    }
}
