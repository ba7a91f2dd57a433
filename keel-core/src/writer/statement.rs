use crate::{ColumnDef, EntityMetadata, Expression, Ordered, Parameter};
use std::borrow::Cow;

/// Transaction isolation requested when an ambient connection begins its transaction.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Use the server default.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHint {
    NoLock,
    UpdLock,
    RowLock,
    PagLock,
    TabLock,
    HoldLock,
    ReadPast,
}

/// Table hints, rendered by dialects that support them.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TableHints {
    pub lock: Option<LockHint>,
    pub isolation: Option<IsolationLevel>,
    pub index: Option<Cow<'static, str>>,
}

impl TableHints {
    pub fn is_empty(&self) -> bool {
        self.lock.is_none() && self.isolation.is_none() && self.index.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Every selectable column, partial columns outside the mask as `NULL`.
    Columns { mask: u64 },
    Count,
    Exists,
}

pub struct SelectStatement<'a> {
    pub metadata: &'a EntityMetadata,
    pub projection: Projection,
    pub filter: Option<&'a Expression>,
    pub order: &'a [Ordered],
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub hints: Option<&'a TableHints>,
}

impl<'a> SelectStatement<'a> {
    pub fn new(metadata: &'a EntityMetadata, projection: Projection) -> Self {
        Self {
            metadata,
            projection,
            filter: None,
            order: &[],
            top: None,
            skip: None,
            hints: None,
        }
    }
}

pub struct InsertStatement<'a> {
    pub metadata: &'a EntityMetadata,
    pub columns: &'a [&'a ColumnDef],
    pub rows: &'a [Vec<crate::Value>],
    pub returning: &'a [&'a ColumnDef],
    /// Insert only when no row matches this predicate (`INSERT ... SELECT ... WHERE NOT EXISTS`).
    pub unless_exists: Option<&'a Expression>,
}

pub struct UpdateStatement<'a> {
    pub metadata: &'a EntityMetadata,
    pub assignments: &'a [(&'a ColumnDef, Expression)],
    pub filter: Option<&'a Expression>,
    pub returning: &'a [&'a ColumnDef],
    pub hints: Option<&'a TableHints>,
}

pub struct DeleteStatement<'a> {
    pub metadata: &'a EntityMetadata,
    pub filter: Option<&'a Expression>,
    pub hints: Option<&'a TableHints>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Procedure,
    /// Scalar function, the name is written as is.
    Function,
}

pub struct CallStatement<'a> {
    pub kind: CallKind,
    pub name: &'a str,
    pub parameters: &'a [Parameter],
}
