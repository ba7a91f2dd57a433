use crate::{
    ColumnDef, Context as _, Entity, EntityMetadata, Result, Row, RowLabeled, Value,
    command::typed_integer,
};

/// Build an entity from a row projected as [`EntityMetadata::selectable`],
/// columns outside `mask` keep their default.
pub(crate) fn materialize<E: Entity>(metadata: &EntityMetadata, values: Row, mask: u64) -> Result<E> {
    let mut entity = E::default();
    for (column, value) in metadata.selectable().zip(values.into_vec()) {
        if !column.is_loaded(mask) {
            continue;
        }
        let value = column.decode(value)?;
        entity.set(column.ordinal, value).with_context(|| {
            format!(
                "While reading column `{}` of `{}`",
                column.name, metadata.entity
            )
        })?;
    }
    Ok(entity)
}

/// Copy the values echoed back by `OUTPUT` / `RETURNING` into the entity.
pub(crate) fn write_back<E: Entity>(
    entity: &mut E,
    returning: &[&ColumnDef],
    row: RowLabeled,
) -> Result<()> {
    for (column, value) in returning.iter().zip(row.values.into_vec()) {
        let value = column.decode(value)?;
        entity
            .set(column.ordinal, value)
            .with_context(|| format!("While writing back column `{}`", column.name))?;
    }
    Ok(())
}

/// Values of `columns` read from the entity, engine tokens start at `1`.
pub(crate) fn encode_row<E: Entity>(entity: &E, columns: &[&ColumnDef]) -> Result<Vec<Value>> {
    columns
        .iter()
        .map(|c| {
            if c.is_engine_token() {
                Ok(typed_integer(&c.value, 1))
            } else {
                c.encode(entity.get(c.ordinal))
            }
        })
        .collect()
}

/// Key equality tolerant to the representation chosen by the driver.
pub(crate) fn same_key(a: &Value, b: &Value) -> bool {
    match (a.as_i128(), b.as_i128()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b || (!a.is_null() && a.to_string() == b.to_string()),
    }
}
