use crate::{
    ColumnDef, Database, DeleteStatement, DetailTable, Driver, Entity, EntityMetadata, Error,
    Expression, Fragment, InsertStatement, Lease, Projection, Result, Row, SelectStatement,
    SqlWriter, Value, and_all, col,
    command::same_key,
    or_any,
    writer::Context,
};
use std::time::Duration;

/// Parents loaded per detail round trip.
const DETAIL_CHUNK: usize = 500;
/// Detail rows inserted per statement.
const DETAIL_INSERT_BATCH: usize = 100;

fn link_values<E: Entity>(detail: &DetailTable, entity: &E) -> Vec<Value> {
    detail.links.iter().map(|(p, _)| entity.get(*p)).collect()
}

/// Predicate selecting the detail rows of the parents whose link values are `keys`.
fn links_predicate(detail: &DetailTable, keys: &[Vec<Value>]) -> Option<Expression> {
    if let [(_, linked)] = detail.links[..] {
        let field = detail.child.columns[linked].field.clone();
        return Some(col(field).is_in(keys.iter().map(|k| k[0].clone())));
    }
    or_any(keys.iter().filter_map(|key| {
        and_all(
            detail
                .link_columns()
                .zip(key)
                .map(|(c, v)| col(c.field.clone()).eq(Expression::Constant(v.clone()))),
        )
    }))
}

/// Load the detail tables selected by `mask` and hand their rows to
/// [`Entity::set_detail`].
pub(crate) async fn load_details<D: Driver, E: Entity>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    entities: &mut [E],
    mask: u64,
    timeout: Option<Duration>,
) -> Result<()> {
    if entities.is_empty() {
        return Ok(());
    }
    let writer = db.driver().sql_writer();
    for detail in metadata
        .details
        .iter()
        .filter(|d| metadata.columns[d.ordinal].is_loaded(mask))
    {
        let child = detail.child.as_ref();
        let selectable: Vec<&ColumnDef> = child.selectable().collect();
        let position = |ordinal: usize| selectable.iter().position(|c| c.ordinal == ordinal);
        let links = detail
            .links
            .iter()
            .map(|(_, c)| position(*c))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                Error::msg(format!(
                    "The links of detail `{}` of `{}` must be selectable",
                    detail.field, metadata.entity
                ))
            })?;
        let payload: Vec<(Option<usize>, &ColumnDef)> =
            detail.payload().map(|c| (position(c.ordinal), c)).collect();
        for chunk in entities.chunks_mut(DETAIL_CHUNK) {
            let keys: Vec<Vec<Value>> = chunk.iter().map(|e| link_values(detail, e)).collect();
            let Some(filter) = links_predicate(detail, &keys) else {
                continue;
            };
            let mut context = Context::new(Fragment::SqlSelect);
            let mut sql = String::new();
            writer.write_select(
                &mut context,
                &mut sql,
                &SelectStatement {
                    filter: Some(&filter),
                    ..SelectStatement::new(child, Projection::Columns { mask: u64::MAX })
                },
            )?;
            let rows = db.fetch_on(lease, context.into_query(sql, timeout)).await?;
            let mut grouped: Vec<Vec<Row>> = vec![Vec::new(); chunk.len()];
            for row in rows {
                let values = row.values;
                let Some(parent) = keys.iter().position(|key| {
                    key.iter()
                        .zip(&links)
                        .all(|(k, i)| same_key(k, &values[*i]))
                }) else {
                    continue;
                };
                let detail_row = payload
                    .iter()
                    .map(|(i, c)| match i {
                        Some(i) => c.decode(values[*i].clone()),
                        None => Ok(c.value.as_null()),
                    })
                    .collect::<Result<Row>>()?;
                grouped[parent].push(detail_row);
            }
            for (entity, rows) in chunk.iter_mut().zip(grouped) {
                entity.set_detail(detail.ordinal, rows)?;
            }
        }
    }
    Ok(())
}

/// Insert the detail rows of `entity`, linked to its (already written) key.
pub(crate) async fn insert_details<D: Driver, E: Entity>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    entity: &E,
    only: impl Fn(&DetailTable) -> bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let writer = db.driver().sql_writer();
    for detail in metadata.details.iter().filter(|d| only(*d)) {
        let rows = entity.detail(detail.ordinal);
        if rows.is_empty() {
            continue;
        }
        let child = detail.child.as_ref();
        let links = link_values(detail, entity);
        let payload: Vec<&ColumnDef> = detail.payload().collect();
        let columns: Vec<&ColumnDef> = child.insertable().collect();
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != payload.len() {
                return Err(Error::msg(format!(
                    "Detail `{}` of `{}` expects rows of {} values, got {}",
                    detail.field,
                    metadata.entity,
                    payload.len(),
                    row.len()
                )));
            }
            let mut out = Vec::with_capacity(columns.len());
            for c in &columns {
                if let Some(i) = detail.links.iter().position(|(_, l)| *l == c.ordinal) {
                    out.push(links[i].clone());
                } else if let Some(i) = payload.iter().position(|p| p.ordinal == c.ordinal) {
                    out.push(c.encode(row[i].clone())?);
                } else {
                    out.push(c.value.as_null());
                }
            }
            values.push(out);
        }
        for batch in values.chunks(DETAIL_INSERT_BATCH) {
            let mut context = Context::new(Fragment::SqlInsertInto);
            let mut sql = String::new();
            writer.write_insert(
                &mut context,
                &mut sql,
                &InsertStatement {
                    metadata: child,
                    columns: &columns,
                    rows: batch,
                    returning: &[],
                    unless_exists: None,
                },
            )?;
            db.execute_on(lease, context.into_query(sql, timeout)).await?;
        }
    }
    Ok(())
}

/// Delete the detail rows of the parent identified by `key` (values in key order).
pub(crate) async fn delete_details<D: Driver>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    key: &[Value],
    only: impl Fn(&DetailTable) -> bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let writer = db.driver().sql_writer();
    for detail in metadata.details.iter().filter(|d| only(*d)) {
        let predicates = detail
            .links
            .iter()
            .map(|(parent, linked)| {
                let position = metadata.key.iter().position(|k| k == parent)?;
                Some(
                    col(detail.child.columns[*linked].field.clone())
                        .eq(Expression::Constant(key.get(position)?.clone())),
                )
            })
            .collect::<Option<Vec<_>>>();
        let Some(filter) = predicates.and_then(and_all) else {
            continue;
        };
        let mut context = Context::new(Fragment::SqlDeleteFrom);
        let mut sql = String::new();
        writer.write_delete(
            &mut context,
            &mut sql,
            &DeleteStatement {
                metadata: &detail.child,
                filter: Some(&filter),
                hints: None,
            },
        )?;
        db.execute_on(lease, context.into_query(sql, timeout)).await?;
    }
    Ok(())
}
