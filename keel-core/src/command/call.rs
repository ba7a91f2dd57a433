use crate::{
    AsValue, CallKind, CallStatement, CommandBuilder, CommandOptions, Database, Direction, Driver,
    Fragment, Parameter, Query, QueryResult, Result, RowLabeled, RowsAffected, SqlWriter,
    UsageError, Value,
    error::raise,
    with_cancel,
    writer::Context,
};
use std::borrow::Cow;

/// Stored procedure or scalar function invocation.
#[derive(Debug, Clone)]
pub struct Call {
    options: CommandOptions,
    kind: CallKind,
    name: Cow<'static, str>,
    parameters: Vec<Parameter>,
}

/// Everything a call returned.
#[derive(Default, Debug, Clone)]
pub struct CallResult {
    pub rows_affected: u64,
    /// Final values of the output, input-output and return parameters, with
    /// the names they were registered with.
    pub outputs: Vec<Parameter>,
    pub rows: Vec<RowLabeled>,
}

impl CallResult {
    pub fn output(&self, name: &str) -> Option<&Value> {
        let name = name.trim_start_matches('@');
        self.outputs
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|p| p.direction == Direction::Return)
            .map(|p| &p.value)
    }
}

impl CommandBuilder for Call {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl Call {
    /// Stored procedure, `name` may be schema qualified (`dbo.refresh`).
    pub fn procedure(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(CallKind::Procedure, name)
    }

    /// Scalar function, the name is written as is.
    pub fn function(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(CallKind::Function, name)
    }

    fn new(kind: CallKind, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            options: Default::default(),
            kind,
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Positional input argument, named after its position.
    pub fn arg(self, value: impl AsValue) -> Self {
        let name = format!("arg{}", self.parameters.len());
        self.param(Parameter::input(name, value))
    }

    /// Parameters in the order the writer registers them: return value first.
    fn registration_order(&self) -> Vec<&Parameter> {
        match self.kind {
            CallKind::Function => self.parameters.iter().collect(),
            CallKind::Procedure => self
                .parameters
                .iter()
                .filter(|p| p.direction == Direction::Return)
                .take(1)
                .chain(
                    self.parameters
                        .iter()
                        .filter(|p| p.direction != Direction::Return),
                )
                .collect(),
        }
    }

    pub fn to_query(&self, writer: &dyn SqlWriter) -> Result<Query> {
        if self.name.trim().is_empty() {
            return Err(raise(UsageError::MissingPayload("call without a name")));
        }
        if self
            .parameters
            .iter()
            .filter(|p| p.direction == Direction::Return)
            .count()
            > 1
        {
            return Err(raise(UsageError::Unsupported(format!(
                "`{}` declares more than one return value",
                self.name
            ))));
        }
        let mut context = Context::new(Fragment::SqlCall);
        let mut sql = String::new();
        writer.write_call(
            &mut context,
            &mut sql,
            &CallStatement {
                kind: self.kind,
                name: &self.name,
                parameters: &self.parameters,
            },
        )?;
        Ok(context.into_query(sql, self.options.timeout))
    }

    pub async fn execute<D: Driver>(self, db: &Database<D>) -> Result<CallResult> {
        let writer = db.driver().sql_writer();
        let mut query = self.to_query(writer.as_dyn())?;
        query.timeout = self.options.timeout_or(db.timeout());
        let generated: Vec<Cow<'static, str>> =
            query.parameters.iter().map(|p| p.name.clone()).collect();
        let order = self.registration_order();
        let results = with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(self.options.close_connection).await?;
            let results = db.run_on(&mut lease, query).await?;
            lease.release();
            Ok(results)
        })
        .await?;
        let mut result = CallResult::default();
        for item in results {
            match item {
                QueryResult::Row(row) => result.rows.push(row),
                QueryResult::Affected(RowsAffected { rows_affected, .. }) => {
                    result.rows_affected += rows_affected
                }
                QueryResult::Output(mut parameter) => {
                    let name = parameter.name.trim_start_matches('@');
                    if let Some(original) = generated
                        .iter()
                        .position(|g| g == name)
                        .and_then(|i| order.get(i))
                    {
                        parameter.name = original.name.clone();
                        parameter.direction = original.direction;
                    }
                    result.outputs.push(parameter);
                }
            }
        }
        Ok(result)
    }

    /// Value returned by a function, or first column of the first row.
    pub async fn scalar<T: AsValue, D: Driver>(self, db: &Database<D>) -> Result<Option<T>> {
        let result = self.execute(db).await?;
        let value = result
            .return_value()
            .cloned()
            .or_else(|| {
                result
                    .rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.values.into_vec().into_iter().next())
            })
            .filter(|v| !v.is_null());
        value.map(T::try_from_value).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenericSqlWriter;

    #[test]
    fn procedure_with_outputs() {
        let call = Call::procedure("dbo.transfer")
            .param(Parameter::return_value(Value::Int32(None)))
            .param(Parameter::input("from", 1i64))
            .param(Parameter::output("balance", Value::Int64(None)));
        let query = call.to_query(&GenericSqlWriter).expect("call compiles");
        assert_eq!(
            query.sql,
            "EXEC @p0 = [dbo].[transfer] @from = @p1, @balance = @p2 OUTPUT;"
        );
        assert_eq!(query.parameters[0].direction, Direction::Return);
        assert_eq!(query.parameters[2].direction, Direction::Out);
        let order: Vec<&str> = call
            .registration_order()
            .iter()
            .map(|p| p.name.as_ref())
            .collect();
        assert_eq!(order, ["return_value", "from", "balance"]);
    }

    #[test]
    fn function_arguments() {
        let query = Call::function("lower")
            .arg("ABC")
            .to_query(&GenericSqlWriter)
            .expect("call compiles");
        assert_eq!(query.sql, "SELECT lower(@p0);");
        let error = Call::function("f")
            .param(Parameter::output("x", Value::Int32(None)))
            .to_query(&GenericSqlWriter)
            .expect_err("functions have no outputs");
        assert!(error.downcast_ref::<UsageError>().is_some());
    }
}
