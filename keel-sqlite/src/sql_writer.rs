use keel_core::{
    CallKind, CallStatement, ColumnDef, IsolationLevel, Result, SqlWriter, TableHints, TableRef,
    UsageError, Value, separated_by,
    writer::Context,
};
use std::fmt::Write;

/// SQLite dialect: double quoted identifiers, `LIMIT`/`OFFSET`, `RETURNING`.
#[derive(Default, Debug, Clone, Copy)]
pub struct SqliteSqlWriter {}

impl SqlWriter for SqliteSqlWriter {
    fn as_dyn(&self) -> &dyn SqlWriter {
        self
    }

    fn write_identifier_quoted(&self, context: &mut Context, out: &mut String, value: &str) {
        out.push('"');
        self.write_escaped(context, out, value, '"', "\"\"");
        out.push('"');
    }

    fn write_table_ref(&self, context: &mut Context, out: &mut String, value: &TableRef) {
        if !value.schema.is_empty() {
            log::trace!(
                "sqlite has no schemas, `{}` is read from the attached database of the same name",
                value.schema
            );
            self.write_identifier_quoted(context, out, &value.schema);
            out.push('.');
        }
        self.write_identifier_quoted(context, out, &value.name);
    }

    fn write_column(&self, context: &mut Context, out: &mut String, column: &ColumnDef) {
        self.write_identifier_quoted(context, out, &column.name);
    }

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    fn write_column_type(
        &self,
        _context: &mut Context,
        out: &mut String,
        value: &Value,
        _size: Option<u32>,
    ) {
        out.push_str(match value {
            Value::Boolean(..)
            | Value::Int8(..)
            | Value::Int16(..)
            | Value::Int32(..)
            | Value::Int64(..)
            | Value::UInt8(..)
            | Value::UInt16(..)
            | Value::UInt32(..)
            | Value::UInt64(..) => "INTEGER",
            Value::Float32(..) | Value::Float64(..) | Value::Decimal(..) => "REAL",
            Value::Char(..)
            | Value::Varchar(..)
            | Value::Date(..)
            | Value::Time(..)
            | Value::Timestamp(..)
            | Value::TimestampWithTimezone(..)
            | Value::Uuid(..) => "TEXT",
            Value::Blob(..) => "BLOB",
            Value::Null => {
                log::warn!("Value::Null carries no type, the column has no affinity");
                ""
            }
        });
    }

    fn write_value_blob(&self, _context: &mut Context, out: &mut String, value: &[u8]) {
        out.push_str("X'");
        for b in value {
            let _ = write!(out, "{:02X}", b);
        }
        out.push('\'');
    }

    fn write_table_hints(&self, _context: &mut Context, _out: &mut String, hints: &TableHints) {
        if !hints.is_empty() {
            log::warn!("sqlite ignores table hints, got {:?}", hints);
        }
    }

    fn write_top(&self, _context: &mut Context, _out: &mut String, _top: Option<u64>, _skip: Option<u64>) {
    }

    fn write_paging(
        &self,
        _context: &mut Context,
        out: &mut String,
        top: Option<u64>,
        skip: Option<u64>,
        _ordered: bool,
    ) {
        match (top, skip) {
            (Some(top), None) => {
                let _ = write!(out, "\nLIMIT {}", top);
            }
            (None, Some(skip)) => {
                let _ = write!(out, "\nLIMIT -1 OFFSET {}", skip);
            }
            (Some(top), Some(skip)) => {
                let _ = write!(out, "\nLIMIT {} OFFSET {}", top, skip);
            }
            (None, None) => {}
        }
    }

    fn write_output(&self, _context: &mut Context, _out: &mut String, _returning: &[&ColumnDef]) {
    }

    fn write_returning(&self, context: &mut Context, out: &mut String, returning: &[&ColumnDef]) {
        out.push_str("\nRETURNING ");
        separated_by(
            out,
            returning,
            |out, c| self.write_column(context, out, c),
            ", ",
        );
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
                let error = UsageError::Unsupported(format!(
                    "sqlite has no stored procedures, cannot call `{}`",
                    statement.name
                ));
                log::error!("{}", error);
                Err(error.into())
            }
        }
    }

    fn inline_auto_increment_key(&self) -> bool {
        true
    }

    fn write_auto_increment(&self, _context: &mut Context, out: &mut String, inline_key: bool) {
        if inline_key {
            out.push_str(" PRIMARY KEY AUTOINCREMENT");
        } else {
            log::warn!("sqlite only auto increments a single column primary key");
        }
    }

    fn write_transaction_begin(&self, out: &mut String, isolation: IsolationLevel) {
        if !matches!(
            isolation,
            IsolationLevel::Unspecified | IsolationLevel::Serializable
        ) {
            log::debug!("sqlite transactions are serializable, {:?} is ignored", isolation);
        }
        out.push_str("BEGIN IMMEDIATE;");
    }

    fn write_transaction_commit(&self, out: &mut String) {
        out.push_str("COMMIT;");
    }

    fn write_transaction_rollback(&self, out: &mut String) {
        out.push_str("ROLLBACK;");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{
        Entity, EntityMetadata, Fragment, Projection, SelectStatement, Variant, col, entity_fields,
    };

    #[derive(Default)]
    struct Note {
        id: i64,
        title: String,
        body: Option<Vec<u8>>,
    }

    impl Entity for Note {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            EntityMetadata::builder("Note", variant)
                .table("notes")
                .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
                .column(ColumnDef::new("title", Value::Varchar(None)))
                .column(ColumnDef::new("body", Value::Blob(None)).nullable())
                .build()
        }
        entity_fields!(id, title, body);
    }

    #[test]
    fn paging_uses_limit() {
        let metadata = Note::metadata(0).expect("metadata");
        let filter = col("title").starts_with("a");
        let mut context = Context::new(Fragment::SqlSelect);
        let mut sql = String::new();
        SqliteSqlWriter::default()
            .write_select(
                &mut context,
                &mut sql,
                &SelectStatement {
                    filter: Some(&filter),
                    top: Some(5),
                    skip: Some(10),
                    ..SelectStatement::new(&metadata, Projection::Columns { mask: 0 })
                },
            )
            .expect("select compiles");
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\", \"body\"\nFROM \"notes\"\nWHERE \"title\" LIKE @p0||'%'\nLIMIT 5 OFFSET 10;"
        );
    }

    #[test]
    fn create_table_inlines_the_key() {
        let metadata = Note::metadata(0).expect("metadata");
        let mut sql = String::new();
        SqliteSqlWriter::default()
            .write_create_table(&mut sql, &metadata, true)
            .expect("create compiles");
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"notes\" (\n\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n\"title\" TEXT NOT NULL,\n\"body\" BLOB\n);"
        );
    }

    #[test]
    fn procedures_are_rejected() {
        let mut sql = String::new();
        let error = SqliteSqlWriter::default()
            .write_call(
                &mut Context::default(),
                &mut sql,
                &CallStatement {
                    kind: CallKind::Procedure,
                    name: "refresh",
                    parameters: &[],
                },
            )
            .expect_err("no procedures");
        assert!(error.downcast_ref::<UsageError>().is_some());
    }

    #[test]
    fn blob_literal() {
        let mut sql = String::new();
        SqliteSqlWriter::default().write_value(
            &mut Context::default(),
            &mut sql,
            &Value::Blob(Some(vec![0x0a, 0xff].into())),
        );
        assert_eq!(sql, "X'0AFF'");
    }
}
