use crate::{
    BulkLoad, Delete, EntityMetadata, Error, Insert, Merge, Registry, Result, Row, Select, Update,
    Value,
};
use std::sync::Arc;

/// Selects one of the object bindings (table, view, custom sql) of an entity type.
pub type Variant = u32;

/// A type mapped to a relational source.
///
/// `describe` produces the column table of a variant, the accessors read and
/// write fields by column ordinal. [`entity_fields!`](crate::entity_fields)
/// generates `get` and `set` for plain structs.
///
/// ```rust
/// use keel_core::{ColumnDef, Entity, EntityMetadata, Result, Value, Variant, entity_fields};
///
/// #[derive(Default)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     fn describe(variant: Variant) -> Result<EntityMetadata> {
///         EntityMetadata::builder("Tag", variant)
///             .table("tags")
///             .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
///             .column(ColumnDef::new("label", Value::Varchar(None)))
///             .build()
///     }
///     entity_fields!(id, label);
/// }
/// ```
pub trait Entity: Default + Send + Sync + Sized + 'static {
    fn describe(variant: Variant) -> Result<EntityMetadata>;

    /// Cached metadata of `variant`, built at most once per process.
    fn metadata(variant: Variant) -> Result<Arc<EntityMetadata>> {
        Registry::global().get::<Self>(variant)
    }

    fn get(&self, ordinal: usize) -> Value;

    fn set(&mut self, ordinal: usize, value: Value) -> Result<()>;

    /// Rows of the detail field at `ordinal`, each one holding the payload
    /// columns of the detail table.
    fn detail(&self, _ordinal: usize) -> Vec<Row> {
        Vec::new()
    }

    fn set_detail(&mut self, ordinal: usize, _rows: Vec<Row>) -> Result<()> {
        Err(Error::msg(format!(
            "Entity {} does not accept detail rows for ordinal {}",
            std::any::type_name::<Self>(),
            ordinal
        )))
    }

    fn select() -> Select<Self> {
        Select::new()
    }

    fn insert<'e>() -> Insert<'e, Self> {
        Insert::new()
    }

    fn update<'e>() -> Update<'e, Self> {
        Update::new()
    }

    fn delete() -> Delete<Self> {
        Delete::new()
    }

    fn merge<'e>() -> Merge<'e, Self> {
        Merge::new()
    }

    fn bulk_load() -> BulkLoad<Self> {
        BulkLoad::new()
    }
}

/// Implements [`Entity::get`] and [`Entity::set`] mapping each listed field to
/// the ordinal of its position. Nested paths map flattened sub-object members.
#[macro_export]
macro_rules! entity_fields {
    ($($($field:ident).+),+ $(,)?) => {
        fn get(&self, ordinal: usize) -> $crate::Value {
            let mut _position = 0usize;
            $(
                if ordinal == _position {
                    return $crate::AsValue::as_value(::std::clone::Clone::clone(&self.$($field).+));
                }
                _position += 1;
            )+
            $crate::Value::Null
        }
        fn set(&mut self, ordinal: usize, value: $crate::Value) -> $crate::Result<()> {
            let mut _position = 0usize;
            $(
                if ordinal == _position {
                    self.$($field).+ = $crate::AsValue::try_from_value(value)
                        .map_err(|e| e.context(concat!("While setting field `", stringify!($($field).+), "`")))?;
                    return Ok(());
                }
                _position += 1;
            )+
            Err($crate::Error::msg(format!("Ordinal {} does not map to a field", ordinal)))
        }
    };
}
