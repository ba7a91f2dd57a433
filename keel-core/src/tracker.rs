use crate::{AsValue, Entity, EntityMetadata, Result, UsageError, Value, Variant, error::raise};
use std::{ops::Deref, sync::Arc};

/// An entity with change tracking.
///
/// Holds the snapshot of the field values taken when tracking started (or at
/// the last [`Tracked::accept_changes`]) and the ordered list of fields found
/// to differ from it. A field keeps the position of its first change.
pub struct Tracked<E: Entity> {
    entity: E,
    metadata: Arc<EntityMetadata>,
    snapshot: Vec<Value>,
    changed: Vec<usize>,
}

impl<E: Entity> Tracked<E> {
    pub fn new(entity: E) -> Result<Self> {
        Self::with_variant(entity, 0)
    }

    pub fn with_variant(entity: E, variant: Variant) -> Result<Self> {
        let metadata = E::metadata(variant)?;
        let snapshot = Self::capture(&entity, &metadata);
        Ok(Self {
            entity,
            metadata,
            snapshot,
            changed: Vec::new(),
        })
    }

    fn capture(entity: &E, metadata: &EntityMetadata) -> Vec<Value> {
        metadata
            .columns
            .iter()
            .map(|c| {
                if c.is_detail() {
                    Value::Null
                } else {
                    entity.get(c.ordinal)
                }
            })
            .collect()
    }

    fn mark(&mut self, ordinal: usize) {
        if self.changed.contains(&ordinal) {
            return;
        }
        if self.entity.get(ordinal) != self.snapshot[ordinal] {
            self.changed.push(ordinal);
        }
    }

    /// Set a field by name and record it when it differs from the snapshot.
    pub fn set_field(&mut self, field: &str, value: impl AsValue) -> Result<()> {
        let column = self.metadata.column_or_err(field)?;
        if column.is_detail() {
            return Err(raise(UsageError::DetailColumn {
                entity: self.metadata.entity.clone(),
                field: field.into(),
                usage: "change tracking",
            }));
        }
        let ordinal = column.ordinal;
        self.entity.set(ordinal, value.as_value())?;
        self.mark(ordinal);
        Ok(())
    }

    /// Mutate the entity directly, changes are found comparing with the snapshot.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut E) -> R) -> R {
        let result = f(&mut self.entity);
        for ordinal in 0..self.metadata.columns.len() {
            if !self.metadata.columns[ordinal].is_detail() {
                self.mark(ordinal);
            }
        }
        result
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.changed
            .iter()
            .map(|i| self.metadata.columns[*i].field.as_ref())
            .collect()
    }

    pub(crate) fn changed_ordinals(&self) -> &[usize] {
        &self.changed
    }

    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Take a new snapshot and clear the changed fields.
    pub fn accept_changes(&mut self) {
        self.snapshot = Self::capture(&self.entity, &self.metadata);
        self.changed.clear();
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    /// Mutable access that bypasses tracking, used to write back server values.
    pub(crate) fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn into_inner(self) -> E {
        self.entity
    }
}

impl<E: Entity> Deref for Tracked<E> {
    type Target = E;
    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, entity_fields};

    #[derive(Default, Clone)]
    struct Person {
        id: i64,
        name: String,
        age: i32,
        city: Option<String>,
    }

    impl Entity for Person {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            EntityMetadata::builder("Person", variant)
                .table("people")
                .column(ColumnDef::new("id", Value::Int64(None)).key())
                .column(ColumnDef::new("name", Value::Varchar(None)))
                .column(ColumnDef::new("age", Value::Int32(None)))
                .column(ColumnDef::new("city", Value::Varchar(None)).nullable())
                .build()
        }
        entity_fields!(id, name, age, city);
    }

    fn person() -> Person {
        Person {
            id: 1,
            name: "Ada".into(),
            age: 36,
            city: None,
        }
    }

    #[test]
    fn ordered_without_duplicates() {
        let mut tracked = Tracked::new(person()).expect("tracked");
        assert!(!tracked.is_changed());
        tracked.set_field("age", 37).expect("age");
        tracked.set_field("name", "Grace").expect("name");
        tracked.set_field("age", 38).expect("age again");
        assert_eq!(tracked.changed_fields(), ["age", "name"]);
        assert_eq!(tracked.age, 38);
    }

    #[test]
    fn same_value_is_not_a_change() {
        let mut tracked = Tracked::new(person()).expect("tracked");
        tracked.set_field("name", "Ada").expect("name");
        assert!(tracked.changed_fields().is_empty());
    }

    #[test]
    fn modify_diffs_against_snapshot() {
        let mut tracked = Tracked::new(person()).expect("tracked");
        tracked.set_field("city", Some("Turin")).expect("city");
        tracked.modify(|p| {
            p.name = "Lovelace".into();
            p.age = 40;
        });
        assert_eq!(tracked.changed_fields(), ["city", "name", "age"]);
        tracked.accept_changes();
        assert!(!tracked.is_changed());
        tracked.modify(|p| p.city = None);
        assert_eq!(tracked.changed_fields(), ["city"]);
    }

    #[test]
    fn unknown_field() {
        let mut tracked = Tracked::new(person()).expect("tracked");
        let error = tracked.set_field("height", 1).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::UnknownField { .. })
        ));
    }
}
