use crate::codec::{RowValues, Value};
use crate::error::StoreError;
use crate::predicate::Fragment;
use crate::schema::{ColumnType, FieldKind, TableSchema};
use rusqlite::{params_from_iter, Connection};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: usize,
    /// 0 means unbounded.
    pub limit: usize,
}

fn storage_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text | ColumnType::Encoded => "TEXT",
        ColumnType::Integer | ColumnType::Boolean => "INTEGER",
    }
}

pub(crate) fn create_table(schema: &TableSchema) -> String {
    let mut columns = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        match column.kind {
            FieldKind::Virtual => continue,
            FieldKind::Pk => columns.push(format!(
                "\"{}\" {} PRIMARY KEY",
                column.name,
                storage_type(column.column_type)
            )),
            FieldKind::Key => columns.push(format!(
                "\"{}\" {} NOT NULL",
                column.name,
                storage_type(column.column_type)
            )),
            FieldKind::Incremented | FieldKind::Plain => columns.push(format!(
                "\"{}\" {}",
                column.name,
                storage_type(column.column_type)
            )),
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        schema.table,
        columns.join(", ")
    )
}

pub(crate) fn create_indexes(schema: &TableSchema) -> Vec<String> {
    schema
        .indexes
        .iter()
        .map(|(group, members)| {
            let columns: Vec<String> = members
                .iter()
                .map(|&i| format!("\"{}\"", schema.columns[i].name))
                .collect();
            format!(
                "CREATE INDEX IF NOT EXISTS \"{}__{}\" ON \"{}\" ({})",
                schema.table,
                group,
                schema.table,
                columns.join(", ")
            )
        })
        .collect()
}

/// Insert writes every non-virtual column; the caller pre-sets the
/// incremented cell to 1. Returns the statement and the bound column
/// indices in order.
pub(crate) fn insert_statement(schema: &TableSchema) -> (String, Vec<usize>) {
    let bound: Vec<usize> = schema
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind != FieldKind::Virtual)
        .map(|(i, _)| i)
        .collect();
    let names: Vec<String> = bound
        .iter()
        .map(|&i| format!("\"{}\"", schema.columns[i].name))
        .collect();
    let holes: Vec<&str> = bound.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        schema.table,
        names.join(", "),
        holes.join(", ")
    );
    (sql, bound)
}

/// Update writes every non-pk, non-virtual column and bumps the revision
/// in the same statement. Bound indices are the data columns followed by
/// the primary key.
pub(crate) fn update_statement(schema: &TableSchema) -> (String, Vec<usize>) {
    let data: Vec<usize> = schema
        .columns
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            *i != schema.pk
                && !matches!(c.kind, FieldKind::Virtual | FieldKind::Incremented)
        })
        .map(|(i, _)| i)
        .collect();
    let mut assignments: Vec<String> = data
        .iter()
        .map(|&i| format!("\"{}\" = ?", schema.columns[i].name))
        .collect();
    if let Some(rev) = schema.incremented {
        let name = &schema.columns[rev].name;
        assignments.push(format!("\"{name}\" = \"{name}\" + 1"));
    }
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"{}\" = ?",
        schema.table,
        assignments.join(", "),
        schema.pk_column().name
    );
    let mut bound = data;
    bound.push(schema.pk);
    (sql, bound)
}

pub(crate) fn delete_statement(schema: &TableSchema) -> String {
    format!(
        "DELETE FROM \"{}\" WHERE \"{}\" = ?",
        schema.table,
        schema.pk_column().name
    )
}

pub(crate) struct SelectPlan {
    pub sql: String,
    pub params: Vec<Value>,
    /// Schema column index per projected output column.
    pub projected: Vec<usize>,
}

pub(crate) fn select_statement(
    schema: &TableSchema,
    predicate: Option<&Fragment>,
    detail: u8,
    sort: &[String],
    page: Option<Page>,
) -> Result<SelectPlan, StoreError> {
    let projected = schema.projected(detail);
    let names: Vec<String> = projected
        .iter()
        .map(|&i| format!("\"{}\"", schema.columns[i].name))
        .collect();
    let mut sql = format!(
        "SELECT {} FROM \"{}\"",
        names.join(", "),
        schema.table
    );
    let mut params = Vec::new();
    if let Some(fragment) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&fragment.text);
        params.extend(fragment.params.iter().cloned());
    }
    if !sort.is_empty() {
        let mut order = Vec::new();
        for group in sort {
            let members = schema.index_group(group).ok_or_else(|| {
                StoreError::Predicate(format!(
                    "unknown index group '{group}' in table '{}'",
                    schema.table
                ))
            })?;
            for &member in members {
                order.push(format!("\"{}\"", schema.columns[member].name));
            }
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    if let Some(page) = page {
        sql.push_str(" LIMIT ? OFFSET ?");
        let limit = if page.limit == 0 { -1 } else { page.limit as i64 };
        params.push(Value::Int(limit));
        params.push(Value::Int(page.offset as i64));
    }
    Ok(SelectPlan {
        sql,
        params,
        projected,
    })
}

/// Full-detail select of one row by primary key.
pub(crate) fn select_by_pk(schema: &TableSchema) -> (String, Vec<usize>) {
    let projected = schema.projected(crate::schema::reflect::MAX_DETAIL);
    let names: Vec<String> = projected
        .iter()
        .map(|&i| format!("\"{}\"", schema.columns[i].name))
        .collect();
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE \"{}\" = ?",
        names.join(", "),
        schema.table,
        schema.pk_column().name
    );
    (sql, projected)
}

/// Snapshot select of every row, in primary-key order, at full detail.
pub(crate) fn select_snapshot(schema: &TableSchema) -> (String, Vec<usize>) {
    let projected = schema.projected(crate::schema::reflect::MAX_DETAIL);
    let names: Vec<String> = projected
        .iter()
        .map(|&i| format!("\"{}\"", schema.columns[i].name))
        .collect();
    let sql = format!(
        "SELECT {} FROM \"{}\" ORDER BY \"{}\"",
        names.join(", "),
        schema.table,
        schema.pk_column().name
    );
    (sql, projected)
}

pub(crate) fn count_statement(
    schema: &TableSchema,
    predicate: Option<&Fragment>,
) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT COUNT(*) FROM \"{}\"", schema.table);
    let mut params = Vec::new();
    if let Some(fragment) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&fragment.text);
        params.extend(fragment.params.iter().cloned());
    }
    (sql, params)
}

pub(crate) fn execute(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<usize, StoreError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| StoreError::backend(sql.to_string(), err))?;
    stmt.execute(params_from_iter(params.iter()))
        .map_err(|err| StoreError::backend(sql.to_string(), err))
}

pub(crate) fn query_rows(
    conn: &Connection,
    schema: &Arc<TableSchema>,
    sql: &str,
    params: &[Value],
    projected: &[usize],
) -> Result<Vec<RowValues>, StoreError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| StoreError::backend(sql.to_string(), err))?;
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|err| StoreError::backend(sql.to_string(), err))?;
    let mut out = Vec::new();
    loop {
        let row = match rows
            .next()
            .map_err(|err| StoreError::backend(sql.to_string(), err))?
        {
            Some(row) => row,
            None => break,
        };
        let mut values = vec![Value::Null; schema.columns.len()];
        for (position, &index) in projected.iter().enumerate() {
            let column = &schema.columns[index];
            let cell = row
                .get_ref(position)
                .map_err(|err| StoreError::backend(sql.to_string(), err))?;
            values[index] = Value::from_backend(cell, column.column_type, &column.name)?;
        }
        out.push(RowValues::new(Arc::clone(schema), values));
    }
    Ok(out)
}

pub(crate) fn query_count(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<i64, StoreError> {
    conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0))
        .map_err(|err| StoreError::backend(sql.to_string(), err))
}

#[cfg(test)]
mod tests {
    use super::{
        create_indexes, create_table, delete_statement, insert_statement, select_statement,
        update_statement, Page,
    };
    use crate::codec::Value;
    use crate::predicate::eq;
    use crate::schema::{ColumnType, FieldDef, TableDef, TableSchema};

    fn schema() -> TableSchema {
        let def = TableDef::named("Widget")
            .field(FieldDef::new("rowid", ColumnType::Integer).virtual_col())
            .field(FieldDef::new("pk", ColumnType::Text).pk())
            .field(FieldDef::new("id", ColumnType::Integer).key())
            .field(FieldDef::new("rev", ColumnType::Integer).incremented())
            .field(FieldDef::new("name", ColumnType::Text).index("a"))
            .field(FieldDef::new("age", ColumnType::Integer).index("a"))
            .field(FieldDef::new("d2", ColumnType::Text).detail(2));
        TableSchema::reflect(&def).expect("reflect")
    }

    #[test]
    fn ddl_omits_virtual_and_constrains_keys() {
        let sql = create_table(&schema());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"Widget\" (\"pk\" TEXT PRIMARY KEY, \
             \"id\" INTEGER NOT NULL, \"rev\" INTEGER, \"name\" TEXT, \
             \"age\" INTEGER, \"d2\" TEXT)"
        );
    }

    #[test]
    fn ddl_emits_one_composite_index_per_group() {
        let statements = create_indexes(&schema());
        assert_eq!(
            statements,
            vec![
                "CREATE INDEX IF NOT EXISTS \"Widget__a\" ON \"Widget\" (\"name\", \"age\")"
                    .to_string()
            ]
        );
    }

    #[test]
    fn insert_binds_every_non_virtual_column() {
        let (sql, bound) = insert_statement(&schema());
        assert_eq!(
            sql,
            "INSERT INTO \"Widget\" (\"pk\", \"id\", \"rev\", \"name\", \"age\", \"d2\") \
             VALUES (?, ?, ?, ?, ?, ?)"
        );
        assert_eq!(bound, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn update_bumps_revision_in_the_same_statement() {
        let (sql, bound) = update_statement(&schema());
        assert_eq!(
            sql,
            "UPDATE \"Widget\" SET \"id\" = ?, \"name\" = ?, \"age\" = ?, \"d2\" = ?, \
             \"rev\" = \"rev\" + 1 WHERE \"pk\" = ?"
        );
        assert_eq!(bound, vec![2, 4, 5, 6, 1]);
    }

    #[test]
    fn delete_targets_the_primary_key() {
        assert_eq!(
            delete_statement(&schema()),
            "DELETE FROM \"Widget\" WHERE \"pk\" = ?"
        );
    }

    #[test]
    fn select_projects_by_detail_level() {
        let schema = schema();
        let plan = select_statement(&schema, None, 0, &[], None).expect("plan");
        assert!(!plan.sql.contains("\"d2\""));
        let plan = select_statement(&schema, None, 2, &[], None).expect("plan");
        assert!(plan.sql.contains("\"d2\""));
        assert!(plan.sql.contains("\"rowid\""));
    }

    #[test]
    fn select_orders_by_index_groups_in_declaration_order() {
        let schema = schema();
        let plan =
            select_statement(&schema, None, 0, &["a".to_string()], None).expect("plan");
        assert!(plan.sql.ends_with("ORDER BY \"name\", \"age\""));
        let err = select_statement(&schema, None, 0, &["zzz".to_string()], None);
        assert!(err.is_err());
    }

    #[test]
    fn select_appends_predicate_and_page_params_in_order() {
        let schema = schema();
        let fragment = eq("id", 4).compile(&schema).expect("compile");
        let plan = select_statement(
            &schema,
            Some(&fragment),
            0,
            &[],
            Some(Page {
                offset: 5,
                limit: 2,
            }),
        )
        .expect("plan");
        assert!(plan.sql.contains("WHERE \"id\" = ? LIMIT ? OFFSET ?"));
        assert_eq!(
            plan.params,
            vec![Value::Int(4), Value::Int(2), Value::Int(5)]
        );
    }

    #[test]
    fn unbounded_page_translates_to_negative_limit() {
        let schema = schema();
        let plan = select_statement(
            &schema,
            None,
            0,
            &[],
            Some(Page {
                offset: 3,
                limit: 0,
            }),
        )
        .expect("plan");
        assert_eq!(plan.params, vec![Value::Int(-1), Value::Int(3)]);
    }
}
