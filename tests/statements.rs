#[cfg(test)]
mod tests {
    use indoc::indoc;
    use keel::{
        Call, ColumnDef, CommandBuilder, Entity, EntityMetadata, GenericSqlWriter, LockHint,
        Order, Parameter, Projection, Query, Result, SqlWriter, TableHints, TableRef, UsageError,
        Value, Variant, col, entity_fields,
    };
    use rust_decimal::Decimal;
    use time::Date;

    const WRITER: GenericSqlWriter = GenericSqlWriter;

    /// Variant `1` reads the paid invoices through a custom query.
    #[derive(Default)]
    struct Invoice {
        id: i64,
        number: String,
        total: Decimal,
        issued: Option<Date>,
        paid: bool,
        notes: Option<String>,
    }

    impl Entity for Invoice {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            let builder = EntityMetadata::builder("Invoice", variant);
            let builder = match variant {
                1 => builder.sql(
                    "SELECT * FROM sales.invoices WHERE paid = 1;",
                    "paid_invoices",
                ),
                _ => builder.table_ref(TableRef::new("invoices").with_schema("sales")),
            };
            builder
                .column(
                    ColumnDef::new("id", Value::Int64(None))
                        .key()
                        .auto_increment(),
                )
                .column(ColumnDef::new("number", Value::Varchar(None)).size(20))
                .column(ColumnDef::new("total", Value::Decimal(None, 0, 0)).precision(10, 2))
                .column(ColumnDef::new("issued", Value::Date(None)).nullable())
                .column(
                    ColumnDef::new("paid", Value::Boolean(None))
                        .default_value(Value::Boolean(Some(false))),
                )
                .column(ColumnDef::new("notes", Value::Varchar(None)).nullable())
                .unique(["number"])
                .build()
        }
        entity_fields!(id, number, total, issued, paid, notes);
    }

    fn ddl(write: impl FnOnce(&mut String, &EntityMetadata) -> Result<()>) -> String {
        let metadata = Invoice::metadata(0).expect("Invoice metadata");
        let mut sql = String::new();
        write(&mut sql, &metadata).expect("The statement must compile");
        sql
    }

    fn values(query: &Query) -> Vec<Value> {
        query
            .parameters
            .iter()
            .map(|Parameter { value, .. }| value.clone())
            .collect()
    }

    #[test]
    fn create_and_drop() {
        assert_eq!(
            ddl(|out, metadata| WRITER.write_create_table(out, metadata, true)),
            indoc! {"
                CREATE TABLE IF NOT EXISTS [sales].[invoices] (
                [id] BIGINT IDENTITY(1,1) NOT NULL,
                [number] NVARCHAR(20) NOT NULL,
                [total] DECIMAL(10,2) NOT NULL,
                [issued] DATE,
                [paid] BIT NOT NULL DEFAULT 0,
                [notes] NVARCHAR(MAX),
                PRIMARY KEY ([id]),
                UNIQUE ([number])
                );"
            }
        );
        assert_eq!(
            ddl(|out, metadata| WRITER.write_drop_table(out, metadata, true)),
            "DROP TABLE IF EXISTS [sales].[invoices];"
        );
        assert_eq!(
            ddl(|out, metadata| WRITER.write_drop_table(out, metadata, false)),
            "DROP TABLE [sales].[invoices];"
        );
    }

    #[test]
    fn select_shapes() {
        let query = Invoice::select()
            .filter(col("number").eq("INV-7"))
            .hints(TableHints {
                lock: Some(LockHint::NoLock),
                index: Some("ix_number".into()),
                ..Default::default()
            })
            .to_query(&WRITER, Projection::Columns { mask: u64::MAX })
            .expect("select compiles");
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT [id], [number], [total], [issued], [paid], [notes]
                FROM [sales].[invoices] WITH (NOLOCK, INDEX([ix_number]))
                WHERE ([number] = @p0);"
            }
        );
        assert_eq!(values(&query), [Value::Varchar(Some("INV-7".into()))]);

        let query = Invoice::select()
            .top(3)
            .order_by("total", Order::DESC)
            .to_query(&WRITER, Projection::Columns { mask: u64::MAX })
            .expect("select compiles");
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT TOP (3) [id], [number], [total], [issued], [paid], [notes]
                FROM [sales].[invoices]
                ORDER BY [total] DESC;"
            }
        );

        let query = Invoice::select()
            .skip(20)
            .to_query(&WRITER, Projection::Columns { mask: u64::MAX })
            .expect("select compiles");
        assert!(
            query
                .sql
                .ends_with("FROM [sales].[invoices]\nORDER BY (SELECT NULL)\nOFFSET 20 ROWS;"),
            "{}",
            query.sql
        );
    }

    #[test]
    fn custom_query_source_is_read_only() {
        let query = Invoice::select()
            .variant(1)
            .filter(col("total").gt(100))
            .to_query(&WRITER, Projection::Count)
            .expect("select compiles");
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT COUNT(*)
                FROM (SELECT * FROM sales.invoices WHERE paid = 1) AS [paid_invoices]
                WHERE ([total] > @p0);"
            }
        );
        let error = Invoice::delete()
            .variant(1)
            .key(1i64)
            .to_query(&WRITER)
            .expect_err("A query source cannot be written");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::ReadOnly { .. })
        ));
        let mut invoice = Invoice::default();
        assert!(
            Invoice::insert()
                .variant(1)
                .value(&mut invoice)
                .to_queries(&WRITER)
                .is_err()
        );
    }

    #[test]
    fn delete_and_call() {
        let query = Invoice::delete()
            .key(5i64)
            .to_query(&WRITER)
            .expect("delete compiles");
        assert_eq!(query.sql, "DELETE FROM [sales].[invoices]\nWHERE ([id] = @p0);");
        assert_eq!(values(&query), [Value::Int64(Some(5))]);

        let query = Call::procedure("sales.close_period")
            .param(Parameter::input("year", 2024))
            .param(Parameter::output("closed", Value::Int32(None)))
            .to_query(&WRITER)
            .expect("call compiles");
        assert_eq!(
            query.sql,
            "EXEC [sales].[close_period] @year = @p0, @closed = @p1 OUTPUT;"
        );
        assert_eq!(query.parameters.len(), 2);
    }

    #[test]
    fn text_filters_compile_like_typed_ones() {
        let cases = [
            (
                "total gt 100.5 and not (paid eq true)",
                col("total").gt(100.5).and(col("paid").eq(true).not()),
            ),
            (
                "startswith(number, 'INV') or notes eq null",
                col("number").starts_with("INV").or(col("notes").is_null()),
            ),
            (
                "issued ge 2024-01-01 and id in (1, 2, 3)",
                col("issued")
                    .ge(Date::from_ordinal_date(2024, 1).expect("valid date"))
                    .and(col("id").is_in([1, 2, 3])),
            ),
            (
                "total mul 2 sub 1 le 99",
                col("total").mul(2).sub(1).le(99),
            ),
        ];
        for (text, typed) in cases {
            let parsed = Invoice::select()
                .filter_text(text)
                .to_query(&WRITER, Projection::Count)
                .expect("text filter compiles");
            let built = Invoice::select()
                .filter(typed)
                .to_query(&WRITER, Projection::Count)
                .expect("typed filter compiles");
            assert_eq!(parsed.sql, built.sql, "{text}");
            assert_eq!(values(&parsed), values(&built), "{text}");
        }
    }
}
