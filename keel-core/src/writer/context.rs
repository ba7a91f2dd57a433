use crate::{ColumnDef, Parameter, Query, Value};
use std::{
    borrow::Cow,
    ops::{Deref, DerefMut},
    time::Duration,
};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    #[default]
    None,
    SqlCall,
    SqlCreateTable,
    SqlDeleteFrom,
    SqlDeleteFromWhere,
    SqlDropTable,
    SqlInsertInto,
    SqlInsertIntoValues,
    /// Columns echoed back by `OUTPUT` or `RETURNING`.
    SqlOutput,
    SqlSelect,
    SqlSelectFrom,
    SqlSelectOrderBy,
    SqlSelectWhere,
    SqlUpdate,
    SqlUpdateSet,
    SqlUpdateWhere,
}

/// State shared by every fragment written into the same statement.
///
/// The parameter counter is never reset while the context lives, so several
/// expressions written one after the other get distinct `@pN` names.
#[derive(Default, Debug, Clone)]
pub struct Context {
    pub counter: u32,
    pub fragment: Fragment,
    pub parameters: Vec<Parameter>,
}

impl Context {
    pub fn new(fragment: Fragment) -> Self {
        Self {
            counter: 0,
            fragment,
            parameters: Vec::new(),
        }
    }

    /// Register a parameter and return its name (without `@`).
    pub fn parameter(&mut self, value: Value) -> Cow<'static, str> {
        let name: Cow<'static, str> = format!("p{}", self.counter).into();
        self.counter += 1;
        self.parameters.push(Parameter::new(name.clone(), value));
        name
    }

    /// Register a parameter carrying the size, precision and scale of `column`.
    pub fn column_parameter(&mut self, column: &ColumnDef, value: Value) -> Cow<'static, str> {
        let name = self.parameter(value);
        if let Some(parameter) = self.parameters.last_mut() {
            parameter.size = column.size;
            parameter.precision = column.precision;
            parameter.scale = column.scale;
        }
        name
    }

    pub fn switch_fragment<'s>(&'s mut self, fragment: Fragment) -> ContextUpdater<'s> {
        let previous = self.fragment;
        self.fragment = fragment;
        ContextUpdater {
            previous,
            context: self,
        }
    }

    pub fn into_query(self, sql: String, timeout: Option<Duration>) -> Query {
        Query {
            sql,
            parameters: self.parameters,
            timeout,
        }
    }
}

/// Restores the previous fragment when dropped.
pub struct ContextUpdater<'a> {
    previous: Fragment,
    context: &'a mut Context,
}

impl<'a> Deref for ContextUpdater<'a> {
    type Target = Context;
    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl<'a> DerefMut for ContextUpdater<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl<'a> Drop for ContextUpdater<'a> {
    fn drop(&mut self) {
        self.context.fragment = self.previous;
    }
}
