use crate::codec::Value;
use crate::error::StoreError;
use crate::schema::descriptor::{ColumnType, Entity, FieldKind, TableDef};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

pub(crate) const MAX_DETAIL: u8 = 4;

/// Structural metadata of one stored column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    /// Storage column name: the lower-cased field name, or the explicit
    /// primary-key override.
    pub name: String,
    pub column_type: ColumnType,
    pub kind: FieldKind,
    /// Detail bucket 1..4; 0 marks a column projected at every level.
    pub detail: u8,
    pub index: Option<String>,
}

/// Derived table schema: the pure product of reflecting a descriptor.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
    pub pk: usize,
    pub incremented: Option<usize>,
    pub virtual_col: Option<usize>,
    /// Composite index groups in declaration order, each with its member
    /// column indices in declaration order.
    pub indexes: Vec<(String, Vec<usize>)>,
}

impl TableSchema {
    pub fn reflect(def: &TableDef) -> Result<Self, StoreError> {
        if def.kind.is_empty() {
            return Err(StoreError::Schema("empty entity kind".into()));
        }
        let mut columns = Vec::with_capacity(def.fields.len());
        let mut pk = None;
        let mut incremented = None;
        let mut virtual_col = None;
        let mut indexes: Vec<(String, Vec<usize>)> = Vec::new();
        for field in &def.fields {
            let name = field
                .column
                .as_deref()
                .unwrap_or(&field.name)
                .to_lowercase();
            if name.is_empty() {
                return Err(StoreError::Schema(format!(
                    "{}: empty column name",
                    def.kind
                )));
            }
            if columns.iter().any(|c: &ColumnSchema| c.name == name) {
                return Err(StoreError::Schema(format!(
                    "{}: duplicate column '{name}'",
                    def.kind
                )));
            }
            let at = columns.len();
            match field.kind {
                FieldKind::Pk => {
                    if pk.is_some() {
                        return Err(StoreError::Schema(format!(
                            "{}: duplicate primary key '{name}'",
                            def.kind
                        )));
                    }
                    if field.column_type != ColumnType::Text {
                        return Err(StoreError::Schema(format!(
                            "{}: primary key '{name}' must be textual",
                            def.kind
                        )));
                    }
                    pk = Some(at);
                }
                FieldKind::Incremented => {
                    if incremented.is_some() {
                        return Err(StoreError::Schema(format!(
                            "{}: more than one incremented column",
                            def.kind
                        )));
                    }
                    if field.column_type != ColumnType::Integer {
                        return Err(StoreError::Schema(format!(
                            "{}: incremented column '{name}' must be an integer",
                            def.kind
                        )));
                    }
                    incremented = Some(at);
                }
                FieldKind::Virtual => {
                    if virtual_col.is_some() {
                        return Err(StoreError::Schema(format!(
                            "{}: more than one virtual column",
                            def.kind
                        )));
                    }
                    virtual_col = Some(at);
                }
                FieldKind::Key | FieldKind::Plain => {}
            }
            if field.detail > MAX_DETAIL {
                return Err(StoreError::Schema(format!(
                    "{}: column '{name}' detail level {} outside 1..{MAX_DETAIL}",
                    def.kind, field.detail
                )));
            }
            if let Some(group) = &field.index {
                if group.is_empty() {
                    return Err(StoreError::Schema(format!(
                        "{}: column '{name}' names an empty index group",
                        def.kind
                    )));
                }
                match indexes.iter_mut().find(|(g, _)| g == group) {
                    Some((_, members)) => members.push(at),
                    None => indexes.push((group.clone(), vec![at])),
                }
            }
            columns.push(ColumnSchema {
                name,
                column_type: field.column_type,
                kind: field.kind,
                detail: field.detail,
                index: field.index.clone(),
            });
        }
        let pk = pk.ok_or_else(|| {
            StoreError::Schema(format!("{}: no primary key declared", def.kind))
        })?;
        Ok(Self {
            table: def.kind.clone(),
            columns,
            pk,
            incremented,
            virtual_col,
            indexes,
        })
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let lowered = name.to_lowercase();
        self.columns.iter().position(|c| c.name == lowered)
    }

    pub(crate) fn pk_column(&self) -> &ColumnSchema {
        &self.columns[self.pk]
    }

    /// Column indices materialised at detail level `detail`: every
    /// non-detail column plus detail buckets up to and including it.
    pub(crate) fn projected(&self, detail: u8) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.detail == 0 || c.detail <= detail)
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == FieldKind::Key)
            .map(|(i, _)| i)
    }

    pub(crate) fn index_group(&self, group: &str) -> Option<&[usize]> {
        self.indexes
            .iter()
            .find(|(g, _)| g == group)
            .map(|(_, members)| members.as_slice())
    }
}

/// Maps an entity onto a full row of cells and resolves its stored primary
/// key: the explicit `pk()` string when present, otherwise a digest over
/// the natural-key cells.
pub(crate) fn entity_row<E: Entity>(
    schema: &TableSchema,
    entity: &E,
) -> Result<(String, Vec<Value>), StoreError> {
    let mut row = vec![Value::Null; schema.columns.len()];
    for (name, value) in entity.to_values()? {
        let index = schema.column_index(name).ok_or_else(|| {
            StoreError::Encode(format!(
                "unknown column '{name}' in table '{}'",
                schema.table
            ))
        })?;
        row[index] = value;
    }
    let pk = resolve_pk(schema, entity.pk(), &row)?;
    row[schema.pk] = Value::Text(pk.as_str().into());
    Ok((pk, row))
}

pub(crate) fn resolve_pk(
    schema: &TableSchema,
    explicit: String,
    row: &[Value],
) -> Result<String, StoreError> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    let mut hasher = Sha256::new();
    hasher.update(schema.table.as_bytes());
    let mut keyed = false;
    for index in schema.key_indices() {
        keyed = true;
        hasher.update([0x1f]);
        match &row[index] {
            Value::Null => hasher.update(b"n"),
            Value::Bool(v) => hasher.update(if *v { b"b1" } else { b"b0" }),
            Value::Int(v) => hasher.update(v.to_be_bytes()),
            Value::Text(v) => hasher.update(v.as_bytes()),
        }
    }
    if !keyed {
        return Err(StoreError::Schema(format!(
            "{}: empty primary key and no natural keys to derive it",
            schema.table
        )));
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    Ok(out)
}
