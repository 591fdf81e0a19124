use crate::codec::{RowValues, Value};
use crate::error::StoreError;
use crate::schema::{ColumnType, Entity, FieldDef, TableDef};

pub(crate) const TABLE: &str = "Label";
pub(crate) const COL_KIND: &str = "kind";
pub(crate) const COL_PARENT: &str = "parent";
pub(crate) const COL_NAME: &str = "name";
pub(crate) const COL_VALUE: &str = "value";

/// One secondary tag row: `(kind, parent, name) -> value`. The label table
/// is installed with every store, and labels are readable like any other
/// entity — the stored primary key derives from the three natural keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Label {
    pub pk: String,
    /// Parent entity kind (its table name).
    pub kind: String,
    /// Parent primary key.
    pub parent: String,
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(
        kind: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            pk: String::new(),
            kind: kind.into(),
            parent: parent.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Entity for Label {
    fn table() -> TableDef {
        TableDef::of::<Self>()
            .field(FieldDef::new("pk", ColumnType::Text).pk_named("id"))
            .field(FieldDef::new(COL_KIND, ColumnType::Text).key().index("parent"))
            .field(
                FieldDef::new(COL_PARENT, ColumnType::Text)
                    .key()
                    .index("parent"),
            )
            .field(FieldDef::new(COL_NAME, ColumnType::Text).key())
            .field(FieldDef::new(COL_VALUE, ColumnType::Text))
    }

    fn pk(&self) -> String {
        self.pk.clone()
    }

    fn to_values(&self) -> Result<Vec<(&'static str, Value)>, StoreError> {
        Ok(vec![
            ("id", Value::from(self.pk.as_str())),
            (COL_KIND, Value::from(self.kind.as_str())),
            (COL_PARENT, Value::from(self.parent.as_str())),
            (COL_NAME, Value::from(self.name.as_str())),
            (COL_VALUE, Value::from(self.value.as_str())),
        ])
    }

    fn from_values(&mut self, row: &RowValues) -> Result<(), StoreError> {
        self.pk = row.text("id")?;
        self.kind = row.text(COL_KIND)?;
        self.parent = row.text(COL_PARENT)?;
        self.name = row.text(COL_NAME)?;
        self.value = row.text(COL_VALUE)?;
        Ok(())
    }
}
