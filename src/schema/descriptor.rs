use crate::codec::{RowValues, Value};
use crate::error::StoreError;
use std::collections::BTreeMap;

/// Secondary `(name, value)` tags attached to a parent entity row.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Boolean,
    /// Composite value stored in its self-describing text form.
    Encoded,
}

/// Semantic kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Primary key; textual, unique, never mutated after insert.
    Pk,
    /// Natural key column (NOT NULL); feeds primary-key derivation.
    Key,
    /// Monotonic revision, bumped by the store on every update.
    Incremented,
    /// Read-only row identity exposed by the backend.
    Virtual,
    Plain,
}

/// One declared field. Built fluently:
///
/// ```ignore
/// FieldDef::new("name", ColumnType::Text).index("a")
/// FieldDef::new("d1", ColumnType::Text).detail(1)
/// ```
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) column_type: ColumnType,
    pub(crate) kind: FieldKind,
    pub(crate) column: Option<String>,
    pub(crate) detail: u8,
    pub(crate) index: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            kind: FieldKind::Plain,
            column: None,
            detail: 0,
            index: None,
        }
    }

    pub fn pk(mut self) -> Self {
        self.kind = FieldKind::Pk;
        self
    }

    /// Primary key stored under an explicit column name.
    pub fn pk_named(mut self, column: impl Into<String>) -> Self {
        self.kind = FieldKind::Pk;
        self.column = Some(column.into());
        self
    }

    pub fn key(mut self) -> Self {
        self.kind = FieldKind::Key;
        self
    }

    pub fn incremented(mut self) -> Self {
        self.kind = FieldKind::Incremented;
        self
    }

    pub fn virtual_col(mut self) -> Self {
        self.kind = FieldKind::Virtual;
        self
    }

    /// Assigns the field to a detail bucket 1..4; it is omitted from
    /// projections below that level.
    pub fn detail(mut self, level: u8) -> Self {
        self.detail = level;
        self
    }

    /// Adds the field to the named composite index group.
    pub fn index(mut self, group: impl Into<String>) -> Self {
        self.index = Some(group.into());
        self
    }
}

/// Static description of an entity: its kind and ordered fields.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub(crate) kind: String,
    pub(crate) fields: Vec<FieldDef>,
}

impl TableDef {
    /// Starts a descriptor whose kind is the last path segment of the
    /// entity's type name.
    pub fn of<E: ?Sized>() -> Self {
        Self::named(short_type_name::<E>())
    }

    pub fn named(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Splices another descriptor's fields in place; embedded aggregates
    /// contribute their fields transparently.
    pub fn embed(mut self, other: TableDef) -> Self {
        self.fields.extend(other.fields);
        self
    }
}

fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    full.rsplit("::").next().unwrap_or(full)
}

/// A type registered with the store. Implementations supply the static
/// descriptor, the primary-key string, the label mapping, and the value
/// codec in both directions.
///
/// `to_values` yields `(column, cell)` pairs for the declared columns;
/// `from_values` restores the entity from a materialised row, leaving
/// non-projected columns at their zero values.
pub trait Entity: Default + Send + 'static {
    fn table() -> TableDef;

    /// Explicit primary key. When empty, the store derives the stored key
    /// from the natural-key columns.
    fn pk(&self) -> String {
        String::new()
    }

    fn labels(&self) -> Labels {
        Labels::new()
    }

    fn to_values(&self) -> Result<Vec<(&'static str, Value)>, StoreError>;

    fn from_values(&mut self, row: &RowValues) -> Result<(), StoreError>;
}
