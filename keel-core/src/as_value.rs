use crate::{Error, Result, Value};
use atoi::FromRadix10SignedChecked;
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::{any, borrow::Cow};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, macros::format_description};
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`].
///
/// Entity accessors, parameters and decoded rows all go through this trait.
/// Conversions out of a [`Value`] accept the canonical variant for the type and,
/// where it is lossless, neighbouring representations: any integer width with a
/// range check, and the text form of temporal, decimal and uuid values for
/// backends that store them as text.
///
/// # Examples
/// ```rust
/// use keel_core::{AsValue, Value};
/// let v = 42i32.as_value();
/// assert!(matches!(v, Value::Int32(Some(42))));
/// let n: i32 = AsValue::try_from_value(Value::Int64(Some(42))).unwrap();
/// assert_eq!(n, 42);
/// ```
pub trait AsValue {
    /// The typed NULL describing this type.
    fn as_empty_value() -> Value;
    /// Convert into the owned [`Value`] representation.
    fn as_value(self) -> Value;
    /// Attempt to convert a dynamic [`Value`] into `Self`.
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

fn mismatch<T>(value: &Value) -> Error {
    if value.is_null() {
        Error::msg(format!(
            "Unexpected NULL while decoding a value of type {}",
            any::type_name::<T>()
        ))
    } else {
        Error::msg(format!(
            "Cannot convert {:?} into {}",
            value,
            any::type_name::<T>()
        ))
    }
}

macro_rules! impl_as_value_integer {
    ($ty:ty, $variant:ident) => {
        impl AsValue for $ty {
            fn as_empty_value() -> Value {
                Value::$variant(None)
            }
            fn as_value(self) -> Value {
                Value::$variant(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                if let Value::$variant(Some(v)) = value {
                    return Ok(v);
                }
                if let Some(v) = value.as_i128() {
                    return <$ty>::try_from(v).map_err(|_| {
                        Error::msg(format!(
                            "Value {} is out of range for {}",
                            v,
                            any::type_name::<Self>()
                        ))
                    });
                }
                if let Value::Varchar(Some(text)) = &value {
                    let bytes = text.trim().as_bytes();
                    if let (Some(v), used) = <$ty>::from_radix_10_signed_checked(bytes) {
                        if used == bytes.len() && used > 0 {
                            return Ok(v);
                        }
                    }
                }
                Err(mismatch::<Self>(&value))
            }
        }
    };
}

impl_as_value_integer!(i8, Int8);
impl_as_value_integer!(i16, Int16);
impl_as_value_integer!(i32, Int32);
impl_as_value_integer!(i64, Int64);
impl_as_value_integer!(u8, UInt8);
impl_as_value_integer!(u16, UInt16);
impl_as_value_integer!(u32, UInt32);
impl_as_value_integer!(u64, UInt64);

macro_rules! impl_as_value_float {
    ($ty:ty, $variant:ident) => {
        impl AsValue for $ty {
            fn as_empty_value() -> Value {
                Value::$variant(None)
            }
            fn as_value(self) -> Value {
                Value::$variant(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match &value {
                    Value::Float32(Some(v)) => Ok(*v as $ty),
                    Value::Float64(Some(v)) => Ok(*v as $ty),
                    Value::Decimal(Some(v), ..) => v
                        .to_f64()
                        .map(|v| v as $ty)
                        .ok_or_else(|| mismatch::<Self>(&value)),
                    Value::Varchar(Some(v)) => {
                        fast_float::parse::<$ty, _>(v.trim()).map_err(|_| mismatch::<Self>(&value))
                    }
                    v if v.is_integer() => Ok(v.as_i128().unwrap_or_default() as $ty),
                    _ => Err(mismatch::<Self>(&value)),
                }
            }
        }
    };
}

impl_as_value_float!(f32, Float32);
impl_as_value_float!(f64, Float64);

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Boolean(Some(v)) => Ok(*v),
            Value::Varchar(Some(v)) => match v.trim() {
                "true" | "TRUE" | "1" => Ok(true),
                "false" | "FALSE" | "0" => Ok(false),
                _ => Err(mismatch::<Self>(&value)),
            },
            v => match v.as_i128() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(mismatch::<Self>(&value)),
            },
        }
    }
}

impl AsValue for char {
    fn as_empty_value() -> Value {
        Value::Char(None)
    }
    fn as_value(self) -> Value {
        Value::Char(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Char(Some(v)) => Ok(*v),
            Value::Varchar(Some(v)) => {
                let mut chars = v.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(mismatch::<Self>(&value)),
                }
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            Value::Char(Some(v)) => Ok(v.into()),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for &str {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.into()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Err(Error::msg(format!(
            "Cannot decode {:?} into a borrowed string, use String instead",
            value
        )))
    }
}

impl AsValue for Cow<'static, str> {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.into_owned()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        String::try_from_value(value).map(Into::into)
    }
}

impl AsValue for Vec<u8> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self.into()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v.into()),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Box<[u8]> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Decimal {
    fn as_empty_value() -> Value {
        Value::Decimal(None, 0, 0)
    }
    fn as_value(self) -> Value {
        Value::Decimal(Some(self), 0, 0)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Decimal(Some(v), ..) => Ok(*v),
            Value::Float32(Some(v)) => Decimal::from_f32(*v).ok_or_else(|| mismatch::<Self>(&value)),
            Value::Float64(Some(v)) => Decimal::from_f64(*v).ok_or_else(|| mismatch::<Self>(&value)),
            Value::Varchar(Some(v)) => v
                .trim()
                .parse::<Decimal>()
                .map_err(|e| Error::new(e).context(mismatch::<Self>(&value))),
            v => v
                .as_i128()
                .and_then(Decimal::from_i128)
                .ok_or_else(|| mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Date {
    fn as_empty_value() -> Value {
        Value::Date(None)
    }
    fn as_value(self) -> Value {
        Value::Date(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Date(Some(v)) => Ok(*v),
            Value::Timestamp(Some(v)) => Ok(v.date()),
            Value::Varchar(Some(v)) => Date::parse(v.trim(), format_description!("[year]-[month]-[day]"))
                .map_err(|e| Error::new(e).context(mismatch::<Self>(&value))),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Time {
    fn as_empty_value() -> Value {
        Value::Time(None)
    }
    fn as_value(self) -> Value {
        Value::Time(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Time(Some(v)) => Ok(*v),
            Value::Varchar(Some(v)) => {
                let v = v.trim();
                Time::parse(v, format_description!("[hour]:[minute]:[second].[subsecond]"))
                    .or_else(|_| Time::parse(v, format_description!("[hour]:[minute]:[second]")))
                    .map_err(|e| Error::new(e).context(mismatch::<Self>(&value)))
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for PrimitiveDateTime {
    fn as_empty_value() -> Value {
        Value::Timestamp(None)
    }
    fn as_value(self) -> Value {
        Value::Timestamp(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Timestamp(Some(v)) => Ok(*v),
            Value::Varchar(Some(v)) => {
                let v = v.trim();
                PrimitiveDateTime::parse(
                    v,
                    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
                )
                .or_else(|_| {
                    PrimitiveDateTime::parse(
                        v,
                        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
                    )
                })
                .map_err(|e| Error::new(e).context(mismatch::<Self>(&value)))
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for OffsetDateTime {
    fn as_empty_value() -> Value {
        Value::TimestampWithTimezone(None)
    }
    fn as_value(self) -> Value {
        Value::TimestampWithTimezone(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::TimestampWithTimezone(Some(v)) => Ok(*v),
            Value::Timestamp(Some(v)) => Ok(v.assume_utc()),
            Value::Varchar(Some(v)) => {
                let v = v.trim();
                OffsetDateTime::parse(
                    v,
                    format_description!(
                        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
                    ),
                )
                .or_else(|_| {
                    OffsetDateTime::parse(
                        v,
                        format_description!(
                            "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
                        ),
                    )
                })
                .map_err(|e| Error::new(e).context(mismatch::<Self>(&value)))
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Uuid {
    fn as_empty_value() -> Value {
        Value::Uuid(None)
    }
    fn as_value(self) -> Value {
        Value::Uuid(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Uuid(Some(v)) => Ok(*v),
            Value::Varchar(Some(v)) => {
                Uuid::parse_str(v.trim()).map_err(|e| Error::new(e).context(mismatch::<Self>(&value)))
            }
            Value::Blob(Some(v)) => {
                Uuid::from_slice(v).map_err(|e| Error::new(e).context(mismatch::<Self>(&value)))
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::try_from_value(value).map(Some)
        }
    }
}

impl AsValue for Value {
    fn as_empty_value() -> Value {
        Value::Null
    }
    fn as_value(self) -> Value {
        self
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}
