#[cfg(test)]
mod tests {
    use keel::{
        ColumnDef, Entity, EntityMetadata, Expression, Fragment, GenericSqlWriter, Method,
        Parameter, Result, SqlWriter, StorageMode, UsageError, Value, Variant, col,
        entity_fields, null, val, writer::Context,
    };

    #[derive(Default)]
    struct Gadget {
        id: i64,
        name: String,
        rating: Option<i32>,
        flags: Option<i32>,
        active: bool,
    }

    impl Entity for Gadget {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            let parts = EntityMetadata::detail_builder("gadget_parts")
                .column(ColumnDef::new("gadget_id", Value::Int64(None)))
                .column(ColumnDef::new("label", Value::Varchar(None)))
                .build()?;
            EntityMetadata::builder("Gadget", variant)
                .table("gadgets")
                .column(ColumnDef::new("id", Value::Int64(None)).key())
                .column(ColumnDef::new("name", Value::Varchar(None)).name("display_name"))
                .column(ColumnDef::new("rating", Value::Int32(None)).nullable())
                .column(ColumnDef::new("flags", Value::Int32(None)).nullable())
                .column(ColumnDef::new("active", Value::Boolean(None)))
                .column(ColumnDef::new("parts", Value::Null).storage(StorageMode::Detail))
                .detail("parts", parts, [("id", "gadget_id")])
                .build()
        }
        entity_fields!(id, name, rating, flags, active);
    }

    const WRITER: GenericSqlWriter = GenericSqlWriter;

    fn compile(expression: &Expression) -> Result<(String, Vec<Value>)> {
        let metadata = Gadget::metadata(0)?;
        let mut context = Context::new(Fragment::SqlSelectWhere);
        let mut out = String::new();
        WRITER.write_predicate(&mut context, &mut out, &metadata, expression)?;
        let values = context
            .parameters
            .into_iter()
            .map(|Parameter { value, .. }| value)
            .collect();
        Ok((out, values))
    }

    fn usage_error(expression: &Expression) -> UsageError {
        compile(expression)
            .expect_err("The expression must be rejected")
            .downcast::<UsageError>()
            .expect("A usage error")
    }

    #[test]
    fn in_list_has_one_parameter_per_value() {
        for values in [vec![7], vec![3, 1, 2], (0..20).rev().collect::<Vec<i64>>()] {
            let (sql, parameters) =
                compile(&col("id").is_in(values.iter().copied())).expect("Valid predicate");
            let placeholders = (0..values.len())
                .map(|i| format!("@p{}", i))
                .collect::<Vec<_>>()
                .join(",");
            assert_eq!(sql, format!("[id] IN ({})", placeholders));
            assert_eq!(
                parameters,
                values
                    .iter()
                    .map(|v| Value::Int64(Some(*v)))
                    .collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn in_empty_list_is_false() {
        let (sql, parameters) =
            compile(&col("id").is_in(Vec::<i64>::new())).expect("Valid predicate");
        assert_eq!(sql, "1=0");
        assert!(parameters.is_empty());
    }

    #[test]
    fn in_list_with_null() {
        let (sql, parameters) =
            compile(&col("rating").is_in([None, Some(1), Some(2)])).expect("Valid predicate");
        assert_eq!(sql, "[rating] IN (NULL,@p0,@p1)");
        assert_eq!(
            parameters,
            [Value::Int32(Some(1)), Value::Int32(Some(2))]
        );
    }

    #[test]
    fn null_comparisons() {
        let (sql, parameters) = compile(
            &col("rating")
                .is_not_null()
                .and(col("rating").unwrap().eq(4)),
        )
        .expect("Valid predicate");
        assert_eq!(sql, "(([rating] IS NOT NULL) AND ([rating] = @p0))");
        assert_eq!(parameters, [Value::Int32(Some(4))]);

        let (sql, parameters) = compile(&null().eq(col("rating"))).expect("Valid predicate");
        assert_eq!(sql, "([rating] IS NULL)");
        assert!(parameters.is_empty());

        let (sql, _) = compile(&col("rating").ne(Value::Int32(None))).expect("Valid predicate");
        assert_eq!(sql, "([rating] IS NOT NULL)");
    }

    #[test]
    fn string_methods() {
        let (sql, parameters) = compile(&col("name").contains("ab")).expect("Valid predicate");
        assert_eq!(sql, "[display_name] LIKE '%'+@p0+'%'");
        assert_eq!(parameters, [Value::Varchar(Some("ab".into()))]);
        let (sql, _) = compile(&col("name").starts_with("ab")).expect("Valid predicate");
        assert_eq!(sql, "[display_name] LIKE @p0+'%'");
        let (sql, _) = compile(&col("name").ends_with("ab")).expect("Valid predicate");
        assert_eq!(sql, "[display_name] LIKE '%'+@p0");
    }

    #[test]
    fn flags() {
        let expected = "(([flags] IS NOT NULL) AND (([flags] & @p0) <> @p1))";
        let (sql, parameters) = compile(&col("flags").has_flag(4)).expect("Valid predicate");
        assert_eq!(sql, expected);
        assert_eq!(parameters, [Value::Int32(Some(4)), Value::Int32(Some(0))]);
        let (sql, parameters) = compile(
            &col("flags")
                .is_not_null()
                .and(col("flags").unwrap().bit_and(4).ne(0)),
        )
        .expect("Valid predicate");
        assert_eq!(sql, expected);
        assert_eq!(parameters, [Value::Int32(Some(4)), Value::Int32(Some(0))]);
        assert!(matches!(
            usage_error(&col("flags").has_flag("4")),
            UsageError::UnsupportedExpression(..)
        ));
    }

    #[test]
    fn booleans_in_condition_position() {
        let (sql, _) = compile(&col("active")).expect("Valid predicate");
        assert_eq!(sql, "([active] = 1)");
        let (sql, _) = compile(&col("active").not()).expect("Valid predicate");
        assert_eq!(sql, "(NOT ([active] = 1))");
        let (sql, parameters) = compile(&val(true).and(col("id").gt(0i64))).expect("Valid predicate");
        assert_eq!(sql, "((1=1) AND ([id] > @p0))");
        assert_eq!(parameters, [Value::Int64(Some(0))]);
        let (sql, _) = compile(&val(false)).expect("Valid predicate");
        assert_eq!(sql, "1=0");
    }

    #[test]
    fn parameters_are_numbered_depth_first() {
        let (sql, parameters) = compile(
            &col("id")
                .add(1i64)
                .mul(2i64)
                .ge(10i64)
                .or(col("name").eq("x").and(col("rating").lt(3))),
        )
        .expect("Valid predicate");
        assert_eq!(
            sql,
            "(((([id] + @p0) * @p1) >= @p2) OR (([display_name] = @p3) AND ([rating] < @p4)))"
        );
        assert_eq!(
            parameters,
            [
                Value::Int64(Some(1)),
                Value::Int64(Some(2)),
                Value::Int64(Some(10)),
                Value::Varchar(Some("x".into())),
                Value::Int32(Some(3)),
            ]
        );
    }

    #[test]
    fn casts_and_conditionals() {
        let (sql, _) = compile(&col("rating").cast(Value::Int64(None)).gt(1i64))
            .expect("Valid predicate");
        assert_eq!(sql, "([rating] > @p0)");
        let (sql, parameters) = compile(
            &Expression::when(col("active"), col("rating"), 0)
                .cast(Value::Int64(None))
                .eq(5i64),
        )
        .expect("Valid predicate");
        assert_eq!(
            sql,
            "(CAST(CASE WHEN ([active] = 1) THEN [rating] ELSE @p0 END AS BIGINT) = @p1)"
        );
        assert_eq!(parameters, [Value::Int32(Some(0)), Value::Int64(Some(5))]);
    }

    #[test]
    fn rejected_before_any_statement() {
        assert!(matches!(
            usage_error(&col("missing").eq(1)),
            UsageError::UnknownField { .. }
        ));
        assert!(matches!(
            usage_error(&col("parts").is_null()),
            UsageError::DetailColumn { .. }
        ));
        assert!(matches!(
            usage_error(&col("name").call(Method::Named("soundex".into()), [])),
            UsageError::UnsupportedExpression(..)
        ));
        assert!(matches!(
            usage_error(&col("name").call(Method::Contains, [val("a"), val("b")])),
            UsageError::UnsupportedExpression(..)
        ));
        assert!(matches!(
            usage_error(&col("name")),
            UsageError::UnsupportedExpression(..)
        ));
    }
}
