pub mod descriptor;
pub mod reflect;

pub use descriptor::{ColumnType, Entity, FieldDef, FieldKind, Labels, TableDef};
pub use reflect::{ColumnSchema, TableSchema};
