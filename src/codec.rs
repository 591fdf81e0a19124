use crate::error::StoreError;
use crate::schema::{ColumnType, TableSchema};
use compact_str::CompactString;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A single storage cell. Scalars map to the backend's native cell types;
/// composite values are carried as their self-describing text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(CompactString),
}

impl Value {
    /// Encodes a composite value (nested record, sequence, map) into its
    /// self-describing text form.
    pub fn composite<T: Serialize>(value: &T) -> Result<Value, StoreError> {
        let text = serde_json::to_string(value)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        Ok(Value::Text(text.into()))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
        }
    }

    /// Reads a backend cell into a `Value`, guided by the declared column
    /// type (the backend stores booleans as integers).
    pub(crate) fn from_backend(
        cell: ValueRef<'_>,
        column_type: ColumnType,
        column: &str,
    ) -> Result<Value, StoreError> {
        match cell {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(v) => {
                if column_type == ColumnType::Boolean {
                    Ok(Value::Bool(v != 0))
                } else {
                    Ok(Value::Int(v))
                }
            }
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|err| {
                    StoreError::Decode(format!("column '{column}': invalid utf-8: {err}"))
                })?;
                Ok(Value::Text(text.into()))
            }
            other => Err(StoreError::Decode(format!(
                "column '{column}': unsupported backend cell {:?}",
                other.data_type()
            ))),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v.into())
    }
}

impl From<CompactString> for Value {
    fn from(v: CompactString) -> Self {
        Value::Text(v)
    }
}

/// One materialised row, aligned to the table schema. Columns a query did
/// not project are `Null` and decode as the zero value of their type.
#[derive(Debug, Clone)]
pub struct RowValues {
    schema: Arc<TableSchema>,
    values: Vec<Value>,
}

impl RowValues {
    pub(crate) fn new(schema: Arc<TableSchema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.columns.len(), values.len());
        Self { schema, values }
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    fn lookup(&self, column: &str) -> Result<&Value, StoreError> {
        let index = self.schema.column_index(column).ok_or_else(|| {
            StoreError::Decode(format!(
                "unknown column '{column}' in table '{}'",
                self.schema.table
            ))
        })?;
        Ok(&self.values[index])
    }

    fn mismatch(&self, column: &str, expected: &'static str, got: &Value) -> StoreError {
        StoreError::Decode(format!(
            "column '{column}' in table '{}': expected {expected}, got {}",
            self.schema.table,
            got.kind()
        ))
    }

    pub fn i64(&self, column: &str) -> Result<i64, StoreError> {
        match self.lookup(column)? {
            Value::Int(v) => Ok(*v),
            Value::Null => Ok(0),
            other => Err(self.mismatch(column, "int", other)),
        }
    }

    pub fn i32(&self, column: &str) -> Result<i32, StoreError> {
        self.narrow(column, self.i64(column)?)
    }

    pub fn i16(&self, column: &str) -> Result<i16, StoreError> {
        self.narrow(column, self.i64(column)?)
    }

    pub fn i8(&self, column: &str) -> Result<i8, StoreError> {
        self.narrow(column, self.i64(column)?)
    }

    fn narrow<T: TryFrom<i64>>(&self, column: &str, wide: i64) -> Result<T, StoreError> {
        T::try_from(wide).map_err(|_| {
            StoreError::Decode(format!(
                "column '{column}' in table '{}': {wide} out of range",
                self.schema.table
            ))
        })
    }

    pub fn bool(&self, column: &str) -> Result<bool, StoreError> {
        match self.lookup(column)? {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::Null => Ok(false),
            other => Err(self.mismatch(column, "bool", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, StoreError> {
        match self.lookup(column)? {
            Value::Text(v) => Ok(v.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(self.mismatch(column, "text", other)),
        }
    }

    /// Restores a composite value from its self-describing text form; a
    /// non-projected column decodes as `T::default()`.
    pub fn composite<T: DeserializeOwned + Default>(
        &self,
        column: &str,
    ) -> Result<T, StoreError> {
        match self.lookup(column)? {
            Value::Text(v) => serde_json::from_str(v.as_str()).map_err(|err| {
                StoreError::Decode(format!(
                    "column '{column}' in table '{}': {err}",
                    self.schema.table
                ))
            }),
            Value::Null => Ok(T::default()),
            other => Err(self.mismatch(column, "text", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Nested {
        name: String,
        count: i64,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Composite {
        record: Nested,
        sequence: Vec<String>,
        mapping: BTreeMap<String, i32>,
    }

    fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> T {
        match value {
            Value::Text(text) => serde_json::from_str(text.as_str()).expect("decode"),
            other => panic!("composite encoded as {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn composite_roundtrip(
            name in "\\PC{0,24}",
            count in any::<i64>(),
            sequence in prop::collection::vec("\\PC{0,16}", 0..8),
            mapping in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..8),
        ) {
            let value = Composite {
                record: Nested { name, count },
                sequence,
                mapping,
            };
            let encoded = Value::composite(&value).expect("encode");
            let decoded: Composite = decode(&encoded);
            prop_assert_eq!(value, decoded);
        }
    }

    #[test]
    fn composite_encoding_is_self_describing_text() {
        let value = Composite {
            record: Nested {
                name: "json".into(),
                count: 3,
            },
            sequence: vec!["hello".into(), "world".into()],
            mapping: BTreeMap::from([("a".into(), 1)]),
        };
        let encoded = Value::composite(&value).expect("encode");
        let Value::Text(text) = &encoded else {
            panic!("expected text cell");
        };
        assert!(text.contains("\"name\""));
        assert!(text.contains("\"sequence\""));
    }

    #[test]
    fn scalar_conversions_keep_their_kind() {
        assert_eq!(Value::from(true).kind(), "bool");
        assert_eq!(Value::from(7i8), Value::Int(7));
        assert_eq!(Value::from(7i16), Value::Int(7));
        assert_eq!(Value::from(7i32), Value::Int(7));
        assert_eq!(Value::from("x"), Value::Text("x".into()));
    }
}
