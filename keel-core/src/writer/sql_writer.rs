use crate::{
    BinaryOpType, CallKind, CallStatement, ColumnDef, DeleteStatement, Direction, EntityMetadata,
    Expression, Fragment, InsertStatement, IsolationLevel, LockHint, Method, ObjectSource, Order,
    Projection, Result, SelectStatement, TableHints, TableRef, UnaryOpType, UpdateStatement,
    UsageError, Value, error::raise, is_parenthesized, possibly_parenthesized, separated_by,
    try_separated_by, writer::Context,
};
use std::fmt::Write;

macro_rules! write_integer {
    ($out:ident, $value:expr) => {{
        let mut buffer = itoa::Buffer::new();
        $out.push_str(buffer.format($value));
    }};
}

macro_rules! write_float {
    ($out:ident, $value:expr) => {{
        let mut buffer = ryu::Buffer::new();
        $out.push_str(buffer.format($value));
    }};
}

fn unsupported(message: impl Into<String>) -> crate::Error {
    raise(UsageError::UnsupportedExpression(message.into()))
}

/// Column referenced by a filter, detail fields have no SQL counterpart.
fn filter_column<'m>(metadata: &'m EntityMetadata, name: &str) -> Result<&'m ColumnDef> {
    let column = metadata.column_or_err(name)?;
    if column.is_detail() {
        return Err(raise(UsageError::DetailColumn {
            entity: metadata.entity.clone(),
            field: name.into(),
            usage: "filters",
        }));
    }
    Ok(column)
}

fn order_column<'m>(metadata: &'m EntityMetadata, name: &str) -> Result<&'m ColumnDef> {
    let column = filter_column(metadata, name)?;
    if !column.select {
        return Err(raise(UsageError::Unsupported(format!(
            "field `{}` of `{}` is not selectable and cannot be a sort key",
            name, metadata.entity
        ))));
    }
    Ok(column)
}

/// Zero of the same integer type as `flag`.
fn zero_like(flag: &Value) -> Value {
    match flag {
        Value::Int8(..) => Value::Int8(Some(0)),
        Value::Int16(..) => Value::Int16(Some(0)),
        Value::Int32(..) => Value::Int32(Some(0)),
        Value::UInt8(..) => Value::UInt8(Some(0)),
        Value::UInt16(..) => Value::UInt16(Some(0)),
        Value::UInt32(..) => Value::UInt32(Some(0)),
        Value::UInt64(..) => Value::UInt64(Some(0)),
        _ => Value::Int64(Some(0)),
    }
}

/// Dialect printer turning metadata, expressions and statements into SQL text.
///
/// Default methods implement the generic dialect (`[ident]`, `TOP`,
/// `OFFSET ... FETCH`, `OUTPUT INSERTED.`); drivers override what differs.
/// Every constant becomes a `@pN` parameter registered in the [`Context`].
pub trait SqlWriter: Send + Sync {
    fn as_dyn(&self) -> &dyn SqlWriter;

    /// Escape occurrences of `search` char with `replace` while copying into buffer.
    fn write_escaped(
        &self,
        _context: &mut Context,
        out: &mut String,
        value: &str,
        search: char,
        replace: &str,
    ) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == search {
                out.push_str(&value[position..i]);
                out.push_str(replace);
                position = i + c.len_utf8();
            }
        }
        out.push_str(&value[position..]);
    }

    fn write_identifier_quoted(&self, context: &mut Context, out: &mut String, value: &str) {
        out.push('[');
        self.write_escaped(context, out, value, ']', "]]");
        out.push(']');
    }

    fn write_table_ref(&self, context: &mut Context, out: &mut String, value: &TableRef) {
        if !value.schema.is_empty() {
            self.write_identifier_quoted(context, out, &value.schema);
            out.push('.');
        }
        self.write_identifier_quoted(context, out, &value.name);
    }

    fn write_source(&self, context: &mut Context, out: &mut String, source: &ObjectSource) {
        match source {
            ObjectSource::Table(table) | ObjectSource::View(table) => {
                self.write_table_ref(context, out, table)
            }
            ObjectSource::Sql { sql, alias } => {
                out.push('(');
                out.push_str(sql.trim().trim_end_matches(';'));
                out.push_str(") AS ");
                self.write_identifier_quoted(context, out, alias);
            }
        }
    }

    fn write_column(&self, context: &mut Context, out: &mut String, column: &ColumnDef) {
        if context.fragment == Fragment::SqlOutput {
            out.push_str("INSERTED.");
        }
        self.write_identifier_quoted(context, out, &column.name);
    }

    /// Parameter placeholder for `value`, literal `NULL` for nulls.
    fn write_parameter(&self, context: &mut Context, out: &mut String, value: Value) {
        if value.is_null() {
            out.push_str("NULL");
            return;
        }
        let name = context.parameter(value);
        out.push('@');
        out.push_str(&name);
    }

    /// Parameter bound to a column, typed nulls included.
    fn write_column_parameter(
        &self,
        context: &mut Context,
        out: &mut String,
        column: &ColumnDef,
        value: Value,
    ) {
        let value = if matches!(value, Value::Null) {
            column.value.as_null()
        } else {
            value
        };
        let name = context.column_parameter(column, value);
        out.push('@');
        out.push_str(&name);
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    /// Render the SQL type for a `Value` prototype.
    fn write_column_type(
        &self,
        _context: &mut Context,
        out: &mut String,
        value: &Value,
        size: Option<u32>,
    ) {
        let sized = |out: &mut String, name: &str| {
            out.push_str(name);
            match size {
                Some(size) => {
                    let _ = write!(out, "({})", size);
                }
                None => out.push_str("(MAX)"),
            }
        };
        match value {
            Value::Boolean(..) => out.push_str("BIT"),
            Value::Int8(..) | Value::Int16(..) => out.push_str("SMALLINT"),
            Value::Int32(..) | Value::UInt16(..) => out.push_str("INT"),
            Value::Int64(..) | Value::UInt32(..) => out.push_str("BIGINT"),
            Value::UInt8(..) => out.push_str("TINYINT"),
            Value::UInt64(..) => out.push_str("DECIMAL(20,0)"),
            Value::Float32(..) => out.push_str("REAL"),
            Value::Float64(..) => out.push_str("FLOAT"),
            Value::Decimal(.., precision, scale) => {
                out.push_str("DECIMAL");
                if (precision, scale) != (&0, &0) {
                    let _ = write!(out, "({},{})", precision, scale);
                }
            }
            Value::Char(..) => out.push_str("NCHAR(1)"),
            Value::Varchar(..) => sized(out, "NVARCHAR"),
            Value::Blob(..) => sized(out, "VARBINARY"),
            Value::Date(..) => out.push_str("DATE"),
            Value::Time(..) => out.push_str("TIME"),
            Value::Timestamp(..) => out.push_str("DATETIME2"),
            Value::TimestampWithTimezone(..) => out.push_str("DATETIMEOFFSET"),
            Value::Uuid(..) => out.push_str("UNIQUEIDENTIFIER"),
            Value::Null => {
                log::error!("Value::Null carries no type, using SQL_VARIANT");
                out.push_str("SQL_VARIANT");
            }
        }
    }

    /// Render a literal, only used for column defaults.
    fn write_value(&self, context: &mut Context, out: &mut String, value: &Value) {
        match value {
            v if v.is_null() => out.push_str("NULL"),
            Value::Boolean(Some(v)) => out.push(if *v { '1' } else { '0' }),
            Value::Int8(Some(v)) => write_integer!(out, *v),
            Value::Int16(Some(v)) => write_integer!(out, *v),
            Value::Int32(Some(v)) => write_integer!(out, *v),
            Value::Int64(Some(v)) => write_integer!(out, *v),
            Value::UInt8(Some(v)) => write_integer!(out, *v),
            Value::UInt16(Some(v)) => write_integer!(out, *v),
            Value::UInt32(Some(v)) => write_integer!(out, *v),
            Value::UInt64(Some(v)) => write_integer!(out, *v),
            Value::Float32(Some(v)) => write_float!(out, *v),
            Value::Float64(Some(v)) => write_float!(out, *v),
            Value::Decimal(Some(v), ..) => {
                let _ = write!(out, "{}", v);
            }
            Value::Char(Some(v)) => self.write_value_string(context, out, &v.to_string()),
            Value::Varchar(Some(v)) => self.write_value_string(context, out, v),
            Value::Blob(Some(v)) => self.write_value_blob(context, out, v),
            Value::Date(Some(v)) => {
                let _ = write!(out, "'{}'", v);
            }
            Value::Time(Some(v)) => {
                let _ = write!(out, "'{}'", v);
            }
            Value::Timestamp(Some(v)) => {
                let _ = write!(out, "'{} {}'", v.date(), v.time());
            }
            Value::TimestampWithTimezone(Some(v)) => {
                let _ = write!(out, "'{} {}{}'", v.date(), v.time(), v.offset());
            }
            Value::Uuid(Some(v)) => {
                let _ = write!(out, "'{}'", v);
            }
            _ => out.push_str("NULL"),
        }
    }

    fn write_value_string(&self, context: &mut Context, out: &mut String, value: &str) {
        out.push('\'');
        self.write_escaped(context, out, value, '\'', "''");
        out.push('\'');
    }

    fn write_value_blob(&self, _context: &mut Context, out: &mut String, value: &[u8]) {
        out.push_str("0x");
        out.push_str(&hex::encode_upper(value));
    }

    fn write_binary_op(&self, _context: &mut Context, out: &mut String, op: BinaryOpType) {
        out.push_str(match op {
            BinaryOpType::Multiplication => "*",
            BinaryOpType::Division => "/",
            BinaryOpType::Remainder => "%",
            BinaryOpType::Addition => "+",
            BinaryOpType::Subtraction => "-",
            BinaryOpType::Concat => self.concat_operator(),
            BinaryOpType::BitwiseAnd => "&",
            BinaryOpType::BitwiseOr => "|",
            BinaryOpType::Equal => "=",
            BinaryOpType::NotEqual => "<>",
            BinaryOpType::Less => "<",
            BinaryOpType::Greater => ">",
            BinaryOpType::LessEqual => "<=",
            BinaryOpType::GreaterEqual => ">=",
            BinaryOpType::And => "AND",
            BinaryOpType::Or => "OR",
        });
    }

    /// Compile an expression in value position.
    fn write_expression(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        value: &Expression,
    ) -> Result<()> {
        match value {
            Expression::Column(name) => {
                let column = filter_column(metadata, name)?;
                self.write_column(context, out, column);
            }
            Expression::Constant(v) => self.write_parameter(context, out, v.clone()),
            Expression::Binary(op, ..) if op.is_logical() => {
                self.write_predicate(context, out, metadata, value)?
            }
            Expression::Binary(op, lhs, rhs)
                if matches!(op, BinaryOpType::Equal | BinaryOpType::NotEqual)
                    && (lhs.is_null_constant() || rhs.is_null_constant()) =>
            {
                let operand = if lhs.is_null_constant() { rhs } else { lhs };
                out.push('(');
                self.write_expression(context, out, metadata, operand)?;
                out.push_str(if *op == BinaryOpType::Equal {
                    " IS NULL)"
                } else {
                    " IS NOT NULL)"
                });
            }
            Expression::Binary(op, lhs, rhs) => {
                out.push('(');
                self.write_expression(context, out, metadata, lhs)?;
                out.push(' ');
                self.write_binary_op(context, out, *op);
                out.push(' ');
                self.write_expression(context, out, metadata, rhs)?;
                out.push(')');
            }
            Expression::Unary(UnaryOpType::Not, ..) => {
                self.write_predicate(context, out, metadata, value)?
            }
            Expression::Unary(UnaryOpType::Negative, operand) => {
                out.push_str("(-");
                self.write_expression(context, out, metadata, operand)?;
                out.push(')');
            }
            Expression::Cast(operand, prototype) => {
                if operand.as_column().is_some() {
                    self.write_expression(context, out, metadata, operand)?;
                } else {
                    out.push_str("CAST(");
                    self.write_expression(context, out, metadata, operand)?;
                    out.push_str(" AS ");
                    self.write_column_type(context, out, prototype, None);
                    out.push(')');
                }
            }
            Expression::Unwrap(operand) => self.write_expression(context, out, metadata, operand)?,
            Expression::Call(method, target, args) => {
                self.write_method_call(context, out, metadata, method, target, args)?
            }
            Expression::In(target, values) => {
                self.write_in(context, out, metadata, target, values)?
            }
            Expression::Conditional(condition, then, otherwise) => {
                out.push_str("CASE WHEN ");
                self.write_predicate(context, out, metadata, condition)?;
                out.push_str(" THEN ");
                self.write_expression(context, out, metadata, then)?;
                out.push_str(" ELSE ");
                self.write_expression(context, out, metadata, otherwise)?;
                out.push_str(" END");
            }
        }
        Ok(())
    }

    /// Compile an expression in boolean (WHERE) position.
    fn write_predicate(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        value: &Expression,
    ) -> Result<()> {
        match value {
            Expression::Binary(op, lhs, rhs) if op.is_logical() => {
                out.push('(');
                self.write_predicate_operand(context, out, metadata, lhs)?;
                out.push(' ');
                self.write_binary_op(context, out, *op);
                out.push(' ');
                self.write_predicate_operand(context, out, metadata, rhs)?;
                out.push(')');
            }
            Expression::Binary(op, ..) if op.is_comparison() => {
                self.write_expression(context, out, metadata, value)?
            }
            Expression::Unary(UnaryOpType::Not, operand) => {
                out.push_str("(NOT ");
                self.write_predicate_operand(context, out, metadata, operand)?;
                out.push(')');
            }
            Expression::Call(..) | Expression::In(..) => {
                self.write_expression(context, out, metadata, value)?
            }
            Expression::Constant(Value::Boolean(Some(v))) => {
                out.push_str(if *v { "1=1" } else { "1=0" })
            }
            Expression::Column(..) | Expression::Cast(..) | Expression::Unwrap(..)
                if value.as_column().is_some() =>
            {
                let column = filter_column(metadata, value.as_column().unwrap_or_default())?;
                if !matches!(column.value, Value::Boolean(..)) {
                    return Err(unsupported(format!(
                        "field `{}` is not boolean and cannot be used as a condition",
                        column.field
                    )));
                }
                out.push('(');
                self.write_column(context, out, column);
                out.push_str(" = 1)");
            }
            _ => {
                return Err(unsupported(format!(
                    "{:?} is not a boolean condition",
                    value
                )));
            }
        }
        Ok(())
    }

    /// Operand of `AND`, `OR` and `NOT`, parenthesized unless it already is.
    fn write_predicate_operand(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        value: &Expression,
    ) -> Result<()> {
        let mut fragment = String::new();
        self.write_predicate(context, &mut fragment, metadata, value)?;
        possibly_parenthesized!(
            out,
            !is_parenthesized(&fragment),
            out.push_str(&fragment)
        );
        Ok(())
    }

    fn write_method_call(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        method: &Method,
        target: &Expression,
        args: &[Expression],
    ) -> Result<()> {
        if let Some(arity) = method.arity() {
            if args.len() != arity {
                return Err(unsupported(format!(
                    "{:?} expects {} argument, got {}",
                    method,
                    arity,
                    args.len()
                )));
            }
        }
        match method {
            Method::Contains | Method::StartsWith | Method::EndsWith => {
                let concat = self.concat_operator();
                self.write_expression(context, out, metadata, target)?;
                out.push_str(" LIKE ");
                if matches!(method, Method::Contains | Method::EndsWith) {
                    out.push_str("'%'");
                    out.push_str(concat);
                }
                self.write_expression(context, out, metadata, &args[0])?;
                if matches!(method, Method::Contains | Method::StartsWith) {
                    out.push_str(concat);
                    out.push_str("'%'");
                }
            }
            Method::HasFlag => {
                let flag = match &args[0] {
                    Expression::Constant(v) if v.is_integer() && !v.is_null() => v.clone(),
                    other => {
                        return Err(unsupported(format!(
                            "HasFlag expects a non null integer flag, got {:?}",
                            other
                        )));
                    }
                };
                let zero = zero_like(&flag);
                let mut target_sql = String::new();
                self.write_expression(context, &mut target_sql, metadata, target)?;
                out.push_str("((");
                out.push_str(&target_sql);
                out.push_str(" IS NOT NULL) AND ((");
                out.push_str(&target_sql);
                out.push_str(" & ");
                self.write_parameter(context, out, flag);
                out.push_str(") <> ");
                self.write_parameter(context, out, zero);
                out.push_str("))");
            }
            Method::Named(name) => {
                return Err(unsupported(format!(
                    "method `{}` has no SQL translation",
                    name
                )));
            }
        }
        Ok(())
    }

    fn write_in(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        target: &Expression,
        values: &[Value],
    ) -> Result<()> {
        if values.is_empty() {
            out.push_str("1=0");
            return Ok(());
        }
        self.write_expression(context, out, metadata, target)?;
        out.push_str(" IN (");
        let mut first = true;
        if values.iter().any(Value::is_null) {
            out.push_str("NULL");
            first = false;
        }
        for value in values.iter().filter(|v| !v.is_null()) {
            if !first {
                out.push(',');
            }
            first = false;
            self.write_parameter(context, out, value.clone());
        }
        out.push(')');
        Ok(())
    }

    fn write_table_hints(&self, _context: &mut Context, out: &mut String, hints: &TableHints) {
        if hints.is_empty() {
            return;
        }
        let mut entries = Vec::new();
        if let Some(lock) = hints.lock {
            entries.push(
                match lock {
                    LockHint::NoLock => "NOLOCK",
                    LockHint::UpdLock => "UPDLOCK",
                    LockHint::RowLock => "ROWLOCK",
                    LockHint::PagLock => "PAGLOCK",
                    LockHint::TabLock => "TABLOCK",
                    LockHint::HoldLock => "HOLDLOCK",
                    LockHint::ReadPast => "READPAST",
                }
                .to_string(),
            );
        }
        match hints.isolation {
            Some(IsolationLevel::ReadUncommitted) => entries.push("READUNCOMMITTED".into()),
            Some(IsolationLevel::ReadCommitted) => entries.push("READCOMMITTED".into()),
            Some(IsolationLevel::RepeatableRead) => entries.push("REPEATABLEREAD".into()),
            Some(IsolationLevel::Serializable) => entries.push("SERIALIZABLE".into()),
            Some(level @ IsolationLevel::Snapshot) => {
                log::warn!("Isolation {:?} cannot be expressed as a table hint", level)
            }
            _ => {}
        }
        if let Some(index) = &hints.index {
            let mut quoted = String::new();
            self.write_identifier_quoted(&mut Context::default(), &mut quoted, index);
            entries.push(format!("INDEX({})", quoted));
        }
        if !entries.is_empty() {
            let _ = write!(out, " WITH ({})", entries.join(", "));
        }
    }

    /// Row limit written right after `SELECT`.
    fn write_top(&self, _context: &mut Context, out: &mut String, top: Option<u64>, skip: Option<u64>) {
        if let (Some(top), None) = (top, skip) {
            let _ = write!(out, "TOP ({}) ", top);
        }
    }

    /// Paging written at the end of a select.
    fn write_paging(
        &self,
        _context: &mut Context,
        out: &mut String,
        top: Option<u64>,
        skip: Option<u64>,
        ordered: bool,
    ) {
        let Some(skip) = skip else {
            return;
        };
        if !ordered {
            out.push_str("\nORDER BY (SELECT NULL)");
        }
        let _ = write!(out, "\nOFFSET {} ROWS", skip);
        if let Some(top) = top {
            let _ = write!(out, " FETCH NEXT {} ROWS ONLY", top);
        }
    }

    /// Columns echoed back before `VALUES` / `WHERE`.
    fn write_output(&self, context: &mut Context, out: &mut String, returning: &[&ColumnDef]) {
        out.push_str("\nOUTPUT ");
        separated_by(
            out,
            returning,
            |out, c| self.write_column(context, out, c),
            ", ",
        );
    }

    /// Columns echoed back at the end of the statement.
    fn write_returning(&self, _context: &mut Context, _out: &mut String, _returning: &[&ColumnDef]) {
    }

    fn write_select(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &SelectStatement,
    ) -> Result<()> {
        let metadata = statement.metadata;
        out.reserve(128 + metadata.columns.len() * 32);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("SELECT ");
        let (top, skip) = match statement.projection {
            Projection::Columns { .. } => (statement.top, statement.skip),
            Projection::Count => (None, None),
            Projection::Exists => (Some(1), None),
        };
        self.write_top(context, out, top, skip);
        match statement.projection {
            Projection::Columns { mask } => separated_by(
                out,
                metadata.selectable(),
                |out, c| {
                    if c.is_loaded(mask) {
                        self.write_column(context, out, c);
                    } else {
                        out.push_str("NULL AS ");
                        self.write_identifier_quoted(context, out, &c.name);
                    }
                },
                ", ",
            ),
            Projection::Count => out.push_str("COUNT(*)"),
            Projection::Exists => out.push('1'),
        }
        out.push_str("\nFROM ");
        self.write_source(
            &mut context.switch_fragment(Fragment::SqlSelectFrom),
            out,
            &metadata.source,
        );
        if let Some(hints) = statement.hints {
            self.write_table_hints(context, out, hints);
        }
        if let Some(filter) = statement.filter {
            out.push_str("\nWHERE ");
            self.write_predicate(
                &mut context.switch_fragment(Fragment::SqlSelectWhere),
                out,
                metadata,
                filter,
            )?;
        }
        let ordered = !statement.order.is_empty()
            && matches!(statement.projection, Projection::Columns { .. });
        if ordered {
            out.push_str("\nORDER BY ");
            let mut context = context.switch_fragment(Fragment::SqlSelectOrderBy);
            try_separated_by(
                out,
                statement.order,
                |out, ordered| {
                    let column = order_column(metadata, &ordered.field)?;
                    self.write_column(&mut context, out, column);
                    out.push_str(match ordered.order {
                        Order::ASC => " ASC",
                        Order::DESC => " DESC",
                    });
                    Ok(())
                },
                ", ",
            )?;
        }
        self.write_paging(context, out, top, skip, ordered);
        out.push(';');
        Ok(())
    }

    fn write_row_values(
        &self,
        context: &mut Context,
        out: &mut String,
        columns: &[&ColumnDef],
        row: &[Value],
    ) -> Result<()> {
        if row.len() != columns.len() {
            return Err(raise(UsageError::Unsupported(format!(
                "row has {} values for {} columns",
                row.len(),
                columns.len()
            ))));
        }
        separated_by(
            out,
            columns.iter().zip(row),
            |out, (c, v)| self.write_column_parameter(context, out, c, v.clone()),
            ", ",
        );
        Ok(())
    }

    fn write_insert(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &InsertStatement,
    ) -> Result<()> {
        let metadata = statement.metadata;
        let table = metadata.writable_table()?;
        let columns = statement.columns;
        out.reserve(128 + columns.len() * statement.rows.len().max(1) * 16);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("INSERT INTO ");
        let mut context = context.switch_fragment(Fragment::SqlInsertInto);
        self.write_table_ref(&mut context, out, table);
        if !columns.is_empty() {
            out.push_str(" (");
            separated_by(
                out,
                columns,
                |out, c| self.write_identifier_quoted(&mut context, out, &c.name),
                ", ",
            );
            out.push(')');
        }
        if !statement.returning.is_empty() {
            self.write_output(
                &mut context.switch_fragment(Fragment::SqlOutput),
                out,
                statement.returning,
            );
        }
        {
            let mut context = context.switch_fragment(Fragment::SqlInsertIntoValues);
            if columns.is_empty() {
                out.push_str("\nDEFAULT VALUES");
            } else if let Some(condition) = statement.unless_exists {
                let Some(row) = statement.rows.first() else {
                    return Err(raise(UsageError::MissingPayload("no row to insert")));
                };
                out.push_str("\nSELECT ");
                self.write_row_values(&mut context, out, columns, row)?;
                out.push_str("\nWHERE NOT EXISTS (SELECT 1 FROM ");
                self.write_table_ref(&mut context, out, table);
                out.push_str(" WHERE ");
                self.write_predicate(&mut context, out, metadata, condition)?;
                out.push(')');
            } else {
                if statement.rows.is_empty() {
                    return Err(raise(UsageError::MissingPayload("no row to insert")));
                }
                out.push_str("\nVALUES ");
                try_separated_by(
                    out,
                    statement.rows,
                    |out, row| {
                        out.push('(');
                        self.write_row_values(&mut context, out, columns, row)?;
                        out.push(')');
                        Ok(())
                    },
                    ",\n",
                )?;
            }
        }
        if !statement.returning.is_empty() {
            self.write_returning(
                &mut context.switch_fragment(Fragment::SqlOutput),
                out,
                statement.returning,
            );
        }
        out.push(';');
        Ok(())
    }

    fn write_update(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &UpdateStatement,
    ) -> Result<()> {
        let metadata = statement.metadata;
        let table = metadata.writable_table()?;
        if statement.assignments.is_empty() {
            return Err(raise(UsageError::MissingPayload("no column to update")));
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("UPDATE ");
        self.write_table_ref(&mut context.switch_fragment(Fragment::SqlUpdate), out, table);
        if let Some(hints) = statement.hints {
            self.write_table_hints(context, out, hints);
        }
        out.push_str("\nSET ");
        {
            let mut context = context.switch_fragment(Fragment::SqlUpdateSet);
            try_separated_by(
                out,
                statement.assignments,
                |out, (column, value)| {
                    self.write_identifier_quoted(&mut context, out, &column.name);
                    out.push_str(" = ");
                    match value {
                        Expression::Constant(v) => {
                            self.write_column_parameter(&mut context, out, column, v.clone())
                        }
                        _ => self.write_expression(&mut context, out, metadata, value)?,
                    }
                    Ok(())
                },
                ", ",
            )?;
        }
        if !statement.returning.is_empty() {
            self.write_output(
                &mut context.switch_fragment(Fragment::SqlOutput),
                out,
                statement.returning,
            );
        }
        if let Some(filter) = statement.filter {
            out.push_str("\nWHERE ");
            self.write_predicate(
                &mut context.switch_fragment(Fragment::SqlUpdateWhere),
                out,
                metadata,
                filter,
            )?;
        }
        if !statement.returning.is_empty() {
            self.write_returning(
                &mut context.switch_fragment(Fragment::SqlOutput),
                out,
                statement.returning,
            );
        }
        out.push(';');
        Ok(())
    }

    fn write_delete(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &DeleteStatement,
    ) -> Result<()> {
        let metadata = statement.metadata;
        let table = metadata.writable_table()?;
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("DELETE FROM ");
        self.write_table_ref(&mut context.switch_fragment(Fragment::SqlDeleteFrom), out, table);
        if let Some(hints) = statement.hints {
            self.write_table_hints(context, out, hints);
        }
        if let Some(filter) = statement.filter {
            out.push_str("\nWHERE ");
            self.write_predicate(
                &mut context.switch_fragment(Fragment::SqlDeleteFromWhere),
                out,
                metadata,
                filter,
            )?;
        }
        out.push(';');
        Ok(())
    }

    /// Register a call parameter keeping its direction and sizes.
    fn write_call_parameter(
        &self,
        context: &mut Context,
        out: &mut String,
        parameter: &crate::Parameter,
    ) {
        let name = context.parameter(parameter.value.clone());
        if let Some(last) = context.parameters.last_mut() {
            last.direction = parameter.direction;
            last.size = parameter.size;
            last.precision = parameter.precision;
            last.scale = parameter.scale;
        }
        out.push('@');
        out.push_str(&name);
    }

    fn write_call(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &CallStatement,
    ) -> Result<()> {
        match statement.kind {
            CallKind::Function => self.write_call_function(context, out, statement),
            CallKind::Procedure => {
                let mut context = context.switch_fragment(Fragment::SqlCall);
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str("EXEC ");
                if let Some(result) = statement
                    .parameters
                    .iter()
                    .find(|p| p.direction == Direction::Return)
                {
                    self.write_call_parameter(&mut context, out, result);
                    out.push_str(" = ");
                }
                separated_by(
                    out,
                    statement.name.split('.'),
                    |out, v| self.write_identifier_quoted(&mut context, out, v),
                    ".",
                );
                let mut arguments = statement
                    .parameters
                    .iter()
                    .filter(|p| p.direction != Direction::Return)
                    .peekable();
                if arguments.peek().is_some() {
                    out.push(' ');
                }
                separated_by(
                    out,
                    arguments,
                    |out, p| {
                        out.push('@');
                        out.push_str(p.name.trim_start_matches('@'));
                        out.push_str(" = ");
                        self.write_call_parameter(&mut context, out, p);
                        if p.is_output() {
                            out.push_str(" OUTPUT");
                        }
                    },
                    ", ",
                );
                out.push(';');
                Ok(())
            }
        }
    }

    fn write_call_function(
        &self,
        context: &mut Context,
        out: &mut String,
        statement: &CallStatement,
    ) -> Result<()> {
        if let Some(p) = statement.parameters.iter().find(|p| p.is_output()) {
            return Err(raise(UsageError::Unsupported(format!(
                "function `{}` cannot take the output parameter `{}`",
                statement.name, p.name
            ))));
        }
        let mut context = context.switch_fragment(Fragment::SqlCall);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("SELECT ");
        out.push_str(statement.name);
        out.push('(');
        separated_by(
            out,
            statement.parameters,
            |out, p| self.write_call_parameter(&mut context, out, p),
            ", ",
        );
        out.push_str(");");
        Ok(())
    }

    /// Whether a single auto increment key is declared inline with its column.
    fn inline_auto_increment_key(&self) -> bool {
        false
    }

    fn write_auto_increment(&self, _context: &mut Context, out: &mut String, _inline_key: bool) {
        out.push_str(" IDENTITY(1,1)");
    }

    fn write_create_table_column_fragment(
        &self,
        context: &mut Context,
        out: &mut String,
        metadata: &EntityMetadata,
        column: &ColumnDef,
    ) {
        self.write_identifier_quoted(context, out, &column.name);
        out.push(' ');
        self.write_column_type(context, out, &column.value, column.size);
        let inline_key = column.auto_increment
            && self.inline_auto_increment_key()
            && metadata.key == [column.ordinal];
        if column.auto_increment {
            self.write_auto_increment(context, out, inline_key);
        }
        if !column.nullable && !inline_key {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            out.push_str(" DEFAULT ");
            self.write_value(context, out, default);
        }
    }

    fn write_create_table(
        &self,
        out: &mut String,
        metadata: &EntityMetadata,
        if_not_exists: bool,
    ) -> Result<()> {
        let table = metadata.writable_table()?;
        let mut context = Context::new(Fragment::SqlCreateTable);
        out.reserve(128 + metadata.columns.len() * 48);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("CREATE TABLE ");
        if if_not_exists {
            out.push_str("IF NOT EXISTS ");
        }
        self.write_table_ref(&mut context, out, table);
        out.push_str(" (\n");
        separated_by(
            out,
            metadata.columns.iter().filter(|c| !c.is_detail()),
            |out, c| self.write_create_table_column_fragment(&mut context, out, metadata, c),
            ",\n",
        );
        let inline_key = self.inline_auto_increment_key()
            && metadata.key_columns().len() == 1
            && metadata.key_columns().all(|c| c.auto_increment);
        if !metadata.key.is_empty() && !inline_key {
            out.push_str(",\nPRIMARY KEY (");
            separated_by(
                out,
                metadata.key_columns(),
                |out, c| self.write_identifier_quoted(&mut context, out, &c.name),
                ", ",
            );
            out.push(')');
        }
        for unique in &metadata.uniques {
            out.push_str(",\nUNIQUE (");
            separated_by(
                out,
                unique.iter().map(|i| &metadata.columns[*i]),
                |out, c| self.write_identifier_quoted(&mut context, out, &c.name),
                ", ",
            );
            out.push(')');
        }
        out.push_str("\n);");
        Ok(())
    }

    fn write_drop_table(
        &self,
        out: &mut String,
        metadata: &EntityMetadata,
        if_exists: bool,
    ) -> Result<()> {
        let table = metadata.writable_table()?;
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("DROP TABLE ");
        if if_exists {
            out.push_str("IF EXISTS ");
        }
        self.write_table_ref(&mut Context::new(Fragment::SqlDropTable), out, table);
        out.push(';');
        Ok(())
    }

    fn write_transaction_begin(&self, out: &mut String, isolation: IsolationLevel) {
        let level = match isolation {
            IsolationLevel::Unspecified => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
            IsolationLevel::Snapshot => Some("SNAPSHOT"),
        };
        if let Some(level) = level {
            let _ = write!(out, "SET TRANSACTION ISOLATION LEVEL {};\n", level);
        }
        out.push_str("BEGIN TRANSACTION;");
    }

    fn write_transaction_commit(&self, out: &mut String) {
        out.push_str("COMMIT TRANSACTION;");
    }

    fn write_transaction_rollback(&self, out: &mut String) {
        out.push_str("ROLLBACK TRANSACTION;");
    }
}

/// Writer of the generic dialect, entirely made of the trait defaults.
#[derive(Default, Debug, Clone, Copy)]
pub struct GenericSqlWriter;

impl GenericSqlWriter {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqlWriter for GenericSqlWriter {
    fn as_dyn(&self) -> &dyn SqlWriter {
        self
    }
}
