use crate::error_message_from_ptr;
use keel_core::{AsValue, Error, Result, Value, truncate_long};
use libsqlite3_sys::*;
use rust_decimal::prelude::ToPrimitive;
use std::{
    ffi::{CStr, c_char, c_int, c_void},
    slice,
};
use time::macros::format_description;
use uuid::Uuid;

pub(crate) fn extract_value(statement: *mut sqlite3_stmt, index: c_int) -> Result<Value> {
    unsafe {
        let column_type = sqlite3_column_type(statement, index);
        Ok(match column_type {
            SQLITE_NULL => Value::Null,
            SQLITE_INTEGER => sqlite3_column_int64(statement, index).as_value(),
            SQLITE_FLOAT => sqlite3_column_double(statement, index).as_value(),
            SQLITE_BLOB => {
                let ptr = sqlite3_column_blob(statement, index) as *const u8;
                let len = sqlite3_column_bytes(statement, index) as usize;
                if ptr.is_null() || len == 0 {
                    Value::Blob(Some(Box::default()))
                } else {
                    Value::Blob(Some(slice::from_raw_parts(ptr, len).into()))
                }
            }
            SQLITE_TEXT => {
                let ptr = sqlite3_column_text(statement, index);
                let len = sqlite3_column_bytes(statement, index) as usize;
                if ptr.is_null() || len == 0 {
                    String::new().as_value()
                } else {
                    String::from_utf8_lossy(slice::from_raw_parts(ptr, len))
                        .into_owned()
                        .as_value()
                }
            }
            _ => {
                return Err(Error::msg(format!(
                    "Unexpected column type {}",
                    column_type
                )));
            }
        })
    }
}

pub(crate) fn extract_name(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    unsafe {
        Ok(CStr::from_ptr(sqlite3_column_name(statement, index))
            .to_str()?
            .into())
    }
}

fn bind_text(statement: *mut sqlite3_stmt, index: c_int, value: &str) -> c_int {
    unsafe {
        sqlite3_bind_text(
            statement,
            index,
            value.as_ptr() as *const c_char,
            value.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}

/// Bind `value` to the parameter at `index` (1 based). Types without a native
/// sqlite counterpart are bound as their text form.
pub(crate) fn bind_value(statement: *mut sqlite3_stmt, index: c_int, value: &Value) -> Result<()> {
    let out_of_range = |v: &dyn std::fmt::Display| {
        let error = Error::msg(format!(
            "Cannot bind `{}` into a sqlite integer because it's out of bounds",
            v
        ));
        log::error!("{:#}", error);
        error
    };
    let rc = unsafe {
        match value {
            v if v.is_null() => sqlite3_bind_null(statement, index),
            Value::Boolean(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int8(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int16(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int32(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int64(Some(v)) => sqlite3_bind_int64(statement, index, *v),
            Value::UInt8(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::UInt16(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::UInt32(Some(v)) => sqlite3_bind_int64(statement, index, *v as sqlite3_int64),
            Value::UInt64(Some(v)) => {
                let v = sqlite3_int64::try_from(*v).map_err(|_| out_of_range(v))?;
                sqlite3_bind_int64(statement, index, v)
            }
            Value::Float32(Some(v)) => sqlite3_bind_double(statement, index, *v as f64),
            Value::Float64(Some(v)) => sqlite3_bind_double(statement, index, *v),
            Value::Decimal(Some(v), ..) => sqlite3_bind_double(
                statement,
                index,
                v.to_f64().ok_or_else(|| {
                    Error::msg(format!("Cannot convert the Decimal value `{}` to f64", v))
                })?,
            ),
            Value::Char(Some(v)) => bind_text(statement, index, &v.to_string()),
            Value::Varchar(Some(v)) => bind_text(statement, index, v),
            Value::Blob(Some(v)) => sqlite3_bind_blob(
                statement,
                index,
                v.as_ptr() as *const c_void,
                v.len() as c_int,
                SQLITE_TRANSIENT(),
            ),
            Value::Date(Some(v)) => {
                bind_text(statement, index, &v.format(format_description!("[year]-[month]-[day]"))?)
            }
            Value::Time(Some(v)) => bind_text(
                statement,
                index,
                &v.format(format_description!("[hour]:[minute]:[second].[subsecond]"))?,
            ),
            Value::Timestamp(Some(v)) => bind_text(
                statement,
                index,
                &v.format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"
                ))?,
            ),
            Value::TimestampWithTimezone(Some(v)) => bind_text(
                statement,
                index,
                &v.format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
                ))?,
            ),
            Value::Uuid(Some(v)) => {
                let mut buffer = Uuid::encode_buffer();
                bind_text(statement, index, v.hyphenated().encode_lower(&mut buffer))
            }
            _ => {
                let error = Error::msg(format!("Cannot use a {:?} as a query parameter", value));
                log::error!("{:#}", error);
                return Err(error);
            }
        }
    };
    if rc != SQLITE_OK {
        unsafe {
            let db = sqlite3_db_handle(statement);
            let query = CStr::from_ptr(sqlite3_sql(statement)).to_string_lossy();
            let error = Error::msg(error_message_from_ptr(&sqlite3_errmsg(db)).to_string())
                .context(format!(
                    "Cannot bind parameter {} to query:\n{}",
                    index,
                    truncate_long!(query)
                ));
            log::error!("{:#}", error);
            return Err(error);
        }
    }
    Ok(())
}
