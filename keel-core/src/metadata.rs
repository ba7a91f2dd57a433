use crate::{ColumnDef, Result, StorageMode, UsageError, Variant, error::raise};
use std::{borrow::Cow, collections::HashSet, sync::Arc};

/// Schema qualified table or view name.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Cow<'static, str>,
    pub name: Cow<'static, str>,
}

impl TableRef {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            schema: "".into(),
            name: name.into(),
        }
    }
    pub fn with_schema(mut self, schema: impl Into<Cow<'static, str>>) -> Self {
        self.schema = schema.into();
        self
    }
}

/// The database object an entity variant is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectSource {
    Table(TableRef),
    /// Read only.
    View(TableRef),
    /// Read only custom query, used as a derived table named `alias`.
    Sql {
        sql: Cow<'static, str>,
        alias: Cow<'static, str>,
    },
}

/// Child table holding a collection valued field of the parent.
#[derive(Debug)]
pub struct DetailTable {
    /// Parent field name.
    pub field: Cow<'static, str>,
    /// Parent column ordinal of the detail field.
    pub ordinal: usize,
    pub child: Arc<EntityMetadata>,
    /// `(parent key ordinal, child column ordinal)` pairs.
    pub links: Vec<(usize, usize)>,
}

impl DetailTable {
    pub fn is_link(&self, child_ordinal: usize) -> bool {
        self.links.iter().any(|(_, c)| *c == child_ordinal)
    }
    /// Child columns carried by each detail row, in ordinal order.
    pub fn payload(&self) -> impl Iterator<Item = &ColumnDef> + Clone {
        self.child
            .columns
            .iter()
            .filter(|c| !self.is_link(c.ordinal) && !c.is_detail())
    }
    pub fn link_columns(&self) -> impl Iterator<Item = &ColumnDef> + Clone {
        self.links.iter().map(|(_, c)| &self.child.columns[*c])
    }
}

/// Column table and object binding of one entity variant.
#[derive(Debug)]
pub struct EntityMetadata {
    pub entity: Cow<'static, str>,
    pub variant: Variant,
    pub source: ObjectSource,
    pub columns: Vec<ColumnDef>,
    /// Ordinals of the single row lookup key.
    pub key: Vec<usize>,
    pub uniques: Vec<Vec<usize>>,
    pub details: Vec<DetailTable>,
}

impl EntityMetadata {
    pub fn builder(entity: impl Into<Cow<'static, str>>, variant: Variant) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            entity: entity.into(),
            variant,
            source: None,
            columns: Vec::new(),
            uniques: Vec::new(),
            details: Vec::new(),
            detail_table: false,
        }
    }

    /// Builder for the child of a [`DetailTable`], which does not need a key.
    pub fn detail_builder(table: impl Into<Cow<'static, str>>) -> EntityMetadataBuilder {
        let table = table.into();
        let mut builder = Self::builder(table.clone(), 0).table(table);
        builder.detail_table = true;
        builder
    }

    /// Lookup by field name first, SQL column name second.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.field == name)
            .or_else(|| self.columns.iter().find(|c| c.name == name))
    }

    pub fn column_or_err(&self, name: &str) -> Result<&ColumnDef> {
        self.column(name).ok_or_else(|| {
            raise(UsageError::UnknownField {
                entity: self.entity.clone(),
                field: name.into(),
            })
        })
    }

    pub fn key_columns(&self) -> impl ExactSizeIterator<Item = &ColumnDef> + Clone {
        self.key.iter().map(|i| &self.columns[*i])
    }

    pub fn concurrency_token(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.concurrency_token)
    }

    pub fn detail(&self, ordinal: usize) -> Option<&DetailTable> {
        self.details.iter().find(|d| d.ordinal == ordinal)
    }

    /// Columns that have a SQL counterpart and can be read.
    pub fn selectable(&self) -> impl Iterator<Item = &ColumnDef> + Clone {
        self.columns.iter().filter(|c| c.select && !c.is_detail())
    }

    pub fn insertable(&self) -> impl Iterator<Item = &ColumnDef> + Clone {
        self.columns.iter().filter(|c| c.insert && !c.is_detail())
    }

    /// Values the server populates on insert.
    pub fn generated(&self) -> impl Iterator<Item = &ColumnDef> + Clone {
        self.columns
            .iter()
            .filter(|c| c.generated && c.select && !c.is_detail())
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.source, ObjectSource::Table(..))
    }

    /// The target table of write commands.
    pub fn writable_table(&self) -> Result<&TableRef> {
        match &self.source {
            ObjectSource::Table(table) => Ok(table),
            _ => Err(raise(UsageError::ReadOnly {
                entity: self.entity.clone(),
            })),
        }
    }

    pub fn require_key(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(raise(UsageError::MissingKey {
                entity: self.entity.clone(),
            }));
        }
        Ok(())
    }
}

pub struct EntityMetadataBuilder {
    entity: Cow<'static, str>,
    variant: Variant,
    source: Option<ObjectSource>,
    columns: Vec<ColumnDef>,
    uniques: Vec<Vec<Cow<'static, str>>>,
    details: Vec<(
        Cow<'static, str>,
        EntityMetadata,
        Vec<(Cow<'static, str>, Cow<'static, str>)>,
    )>,
    detail_table: bool,
}

impl EntityMetadataBuilder {
    pub fn table(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.source = Some(ObjectSource::Table(TableRef::new(name)));
        self
    }
    pub fn table_ref(mut self, table: TableRef) -> Self {
        self.source = Some(ObjectSource::Table(table));
        self
    }
    pub fn view(mut self, table: TableRef) -> Self {
        self.source = Some(ObjectSource::View(table));
        self
    }
    pub fn sql(
        mut self,
        sql: impl Into<Cow<'static, str>>,
        alias: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.source = Some(ObjectSource::Sql {
            sql: sql.into(),
            alias: alias.into(),
        });
        self
    }
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }
    pub fn unique<F>(mut self, fields: impl IntoIterator<Item = F>) -> Self
    where
        F: Into<Cow<'static, str>>,
    {
        self.uniques
            .push(fields.into_iter().map(Into::into).collect());
        self
    }
    /// Attach the detail table backing the `Detail` column `field`, `links`
    /// pairs a parent key field with the child field holding it.
    pub fn detail<P, C>(
        mut self,
        field: impl Into<Cow<'static, str>>,
        child: EntityMetadata,
        links: impl IntoIterator<Item = (P, C)>,
    ) -> Self
    where
        P: Into<Cow<'static, str>>,
        C: Into<Cow<'static, str>>,
    {
        self.details.push((
            field.into(),
            child,
            links
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        ));
        self
    }

    fn error(&self, message: String) -> crate::Error {
        raise(UsageError::Metadata {
            entity: self.entity.clone(),
            message,
        })
    }

    pub fn build(self) -> Result<EntityMetadata> {
        let Some(source) = self.source.clone() else {
            return Err(self.error("no table, view or sql source was declared".into()));
        };
        let mut columns = self.columns.clone();
        let mut fields = HashSet::new();
        let mut names = HashSet::new();
        for (i, column) in columns.iter_mut().enumerate() {
            column.ordinal = i;
            if !fields.insert(column.field.clone()) {
                return Err(self.error(format!("duplicate field `{}`", column.field)));
            }
            if !column.is_detail() && !names.insert(column.name.clone()) {
                return Err(self.error(format!("duplicate column name `{}`", column.name)));
            }
            if column.auto_increment && !column.value.is_integer() {
                return Err(self.error(format!(
                    "auto increment column `{}` must be an integer",
                    column.field
                )));
            }
            if column.is_engine_token() && !column.value.is_integer() {
                return Err(self.error(format!(
                    "concurrency token `{}` is maintained by the engine and must be an integer",
                    column.field
                )));
            }
            if column.is_detail() && column.key {
                return Err(self.error(format!(
                    "detail field `{}` cannot be part of the key",
                    column.field
                )));
            }
        }
        if columns.iter().filter(|c| c.concurrency_token).count() > 1 {
            return Err(self.error("more than one concurrency token".into()));
        }
        let key: Vec<usize> = columns.iter().filter(|c| c.key).map(|c| c.ordinal).collect();
        if key.is_empty() && !self.detail_table && matches!(source, ObjectSource::Table(..)) {
            return Err(self.error("a table source needs at least one key column".into()));
        }
        let find = |name: &str| columns.iter().find(|c| c.field == name);
        let mut uniques = Vec::with_capacity(self.uniques.len());
        for unique in &self.uniques {
            let mut ordinals = Vec::with_capacity(unique.len());
            for field in unique {
                let Some(column) = find(field) else {
                    return Err(self.error(format!("unique references unknown field `{}`", field)));
                };
                ordinals.push(column.ordinal);
            }
            uniques.push(ordinals);
        }
        let mut details = Vec::with_capacity(self.details.len());
        for (field, child, links) in self.details {
            let Some(column) = columns
                .iter()
                .find(|c| c.field == field && c.storage == StorageMode::Detail)
            else {
                return Err(raise(UsageError::Metadata {
                    entity: self.entity.clone(),
                    message: format!("detail `{}` does not match a detail field", field),
                }));
            };
            let mut resolved = Vec::with_capacity(links.len());
            for (parent, linked) in links {
                let parent = columns.iter().find(|c| c.field == parent && c.key);
                let linked = child.column(&linked);
                match (parent, linked) {
                    (Some(p), Some(c)) => resolved.push((p.ordinal, c.ordinal)),
                    _ => {
                        return Err(raise(UsageError::Metadata {
                            entity: self.entity.clone(),
                            message: format!(
                                "detail `{}` links must pair parent key fields with child fields",
                                field
                            ),
                        }));
                    }
                }
            }
            if resolved.is_empty() {
                return Err(raise(UsageError::Metadata {
                    entity: self.entity.clone(),
                    message: format!("detail `{}` has no links", field),
                }));
            }
            details.push(DetailTable {
                ordinal: column.ordinal,
                field,
                child: Arc::new(child),
                links: resolved,
            });
        }
        if let Some(column) = columns
            .iter()
            .find(|c| c.is_detail() && !details.iter().any(|d| d.ordinal == c.ordinal))
        {
            return Err(raise(UsageError::Metadata {
                entity: self.entity.clone(),
                message: format!("detail field `{}` has no detail table", column.field),
            }));
        }
        Ok(EntityMetadata {
            entity: self.entity,
            variant: self.variant,
            source,
            columns,
            key,
            uniques,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn ordinals_and_key() {
        let metadata = EntityMetadata::builder("Item", 0)
            .table("items")
            .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
            .column(ColumnDef::new("name", Value::Varchar(None)).name("item_name"))
            .build()
            .expect("valid metadata");
        assert_eq!(metadata.key, vec![0]);
        assert_eq!(metadata.columns[1].ordinal, 1);
        assert_eq!(metadata.column("item_name").map(|c| c.ordinal), Some(1));
        assert_eq!(metadata.column("name").map(|c| c.ordinal), Some(1));
        assert_eq!(metadata.insertable().count(), 1);
    }

    #[test]
    fn rejects_invalid() {
        let missing_key = EntityMetadata::builder("Item", 0)
            .table("items")
            .column(ColumnDef::new("name", Value::Varchar(None)))
            .build();
        assert!(missing_key.is_err());
        let duplicate = EntityMetadata::builder("Item", 0)
            .table("items")
            .column(ColumnDef::new("id", Value::Int64(None)).key())
            .column(ColumnDef::new("id", Value::Varchar(None)))
            .build();
        assert!(duplicate.is_err());
        let token = EntityMetadata::builder("Item", 0)
            .table("items")
            .column(ColumnDef::new("id", Value::Int64(None)).key())
            .column(ColumnDef::new("version", Value::Varchar(None)).concurrency_token())
            .build();
        assert!(token.is_err());
        let view = EntityMetadata::builder("Item", 1)
            .view(TableRef::new("items_view"))
            .column(ColumnDef::new("name", Value::Varchar(None)))
            .build()
            .expect("views do not need a key");
        assert!(view.writable_table().is_err());
    }
}
