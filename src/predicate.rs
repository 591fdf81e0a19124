use crate::codec::Value;
use crate::error::StoreError;
use crate::label;
use crate::schema::{ColumnType, Labels, TableSchema};

/// Reference to another column, usable wherever a literal is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
}

pub fn field(name: impl Into<String>) -> FieldRef {
    FieldRef { name: name.into() }
}

/// Right-hand side of a comparison: a bound literal or a column reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Field(FieldRef),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Literal(v)
    }
}

impl From<FieldRef> for Operand {
    fn from(v: FieldRef) -> Self {
        Operand::Field(v)
    }
}

macro_rules! literal_operand {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Operand {
            fn from(v: $ty) -> Self {
                Operand::Literal(Value::from(v))
            }
        })*
    };
}

literal_operand!(bool, i8, i16, i32, i64, &str, String);

/// Composable filter expression. Column names are case-insensitive and
/// resolved against the table schema at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Operand),
    Neq(String, Operand),
    Lt(String, Operand),
    Gt(String, Operand),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Match(Labels),
}

pub fn eq(column: impl Into<String>, value: impl Into<Operand>) -> Predicate {
    Predicate::Eq(column.into(), value.into())
}

pub fn neq(column: impl Into<String>, value: impl Into<Operand>) -> Predicate {
    Predicate::Neq(column.into(), value.into())
}

pub fn lt(column: impl Into<String>, value: impl Into<Operand>) -> Predicate {
    Predicate::Lt(column.into(), value.into())
}

pub fn gt(column: impl Into<String>, value: impl Into<Operand>) -> Predicate {
    Predicate::Gt(column.into(), value.into())
}

pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

/// Matches rows whose label set contains every given `(name, value)` pair.
pub fn match_labels(labels: Labels) -> Predicate {
    Predicate::Match(labels)
}

/// A compiled backend query fragment: text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fragment {
    pub text: String,
    pub params: Vec<Value>,
}

impl Predicate {
    /// Compiles the tree into a query fragment; a pure fold.
    pub(crate) fn compile(&self, schema: &TableSchema) -> Result<Fragment, StoreError> {
        match self {
            Predicate::Eq(column, operand) => comparison(schema, column, "=", operand),
            Predicate::Neq(column, operand) => comparison(schema, column, "!=", operand),
            Predicate::Lt(column, operand) => comparison(schema, column, "<", operand),
            Predicate::Gt(column, operand) => comparison(schema, column, ">", operand),
            // The empty combinator is the identity of its connective.
            Predicate::And(children) => combine(schema, children, " AND ", "1 = 1"),
            Predicate::Or(children) => combine(schema, children, " OR ", "1 = 0"),
            Predicate::Match(labels) => exists(schema, labels),
        }
    }
}

fn resolve<'a>(
    schema: &'a TableSchema,
    column: &str,
) -> Result<(usize, &'a str), StoreError> {
    let index = schema.column_index(column).ok_or_else(|| {
        StoreError::Predicate(format!(
            "unknown column '{column}' in table '{}'",
            schema.table
        ))
    })?;
    Ok((index, schema.columns[index].name.as_str()))
}

fn comparison(
    schema: &TableSchema,
    column: &str,
    op: &str,
    operand: &Operand,
) -> Result<Fragment, StoreError> {
    let (index, name) = resolve(schema, column)?;
    match operand {
        Operand::Literal(value) => {
            check_literal(schema, index, value)?;
            Ok(Fragment {
                text: format!("\"{name}\" {op} ?"),
                params: vec![value.clone()],
            })
        }
        Operand::Field(other) => {
            let (_, other_name) = resolve(schema, &other.name)?;
            Ok(Fragment {
                text: format!("\"{name}\" {op} \"{other_name}\""),
                params: Vec::new(),
            })
        }
    }
}

fn check_literal(
    schema: &TableSchema,
    index: usize,
    value: &Value,
) -> Result<(), StoreError> {
    let column = &schema.columns[index];
    let compatible = match value {
        Value::Null => false,
        Value::Bool(_) => column.column_type == ColumnType::Boolean,
        Value::Int(_) => column.column_type == ColumnType::Integer,
        Value::Text(_) => matches!(column.column_type, ColumnType::Text | ColumnType::Encoded),
    };
    if compatible {
        Ok(())
    } else {
        Err(StoreError::Predicate(format!(
            "column '{}' in table '{}': incompatible {} literal",
            column.name,
            schema.table,
            value.kind()
        )))
    }
}

fn combine(
    schema: &TableSchema,
    children: &[Predicate],
    connective: &str,
    identity: &str,
) -> Result<Fragment, StoreError> {
    if children.is_empty() {
        return Ok(Fragment {
            text: identity.to_string(),
            params: Vec::new(),
        });
    }
    let mut parts = Vec::with_capacity(children.len());
    let mut params = Vec::new();
    for child in children {
        let fragment = child.compile(schema)?;
        parts.push(fragment.text);
        params.extend(fragment.params);
    }
    Ok(Fragment {
        text: format!("({})", parts.join(connective)),
        params,
    })
}

/// Existence check against the label table, correlated to the parent row
/// by kind and primary key; one conjunct per required pair.
fn exists(schema: &TableSchema, labels: &Labels) -> Result<Fragment, StoreError> {
    if labels.is_empty() {
        return Ok(Fragment {
            text: "1 = 1".to_string(),
            params: Vec::new(),
        });
    }
    let parent_pk = format!("\"{}\".\"{}\"", schema.table, schema.pk_column().name);
    let mut parts = Vec::with_capacity(labels.len());
    let mut params = Vec::new();
    for (name, value) in labels {
        parts.push(format!(
            "EXISTS (SELECT 1 FROM \"{table}\" WHERE \"{table}\".\"{kind}\" = ? \
             AND \"{table}\".\"{parent}\" = {parent_pk} \
             AND \"{table}\".\"{label_name}\" = ? AND \"{table}\".\"{label_value}\" = ?)",
            table = label::TABLE,
            kind = label::COL_KIND,
            parent = label::COL_PARENT,
            label_name = label::COL_NAME,
            label_value = label::COL_VALUE,
        ));
        params.push(Value::from(schema.table.as_str()));
        params.push(Value::from(name.as_str()));
        params.push(Value::from(value.as_str()));
    }
    let text = if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("({})", parts.join(" AND "))
    };
    Ok(Fragment { text, params })
}

#[cfg(test)]
mod tests {
    use super::{and, eq, field, gt, lt, match_labels, neq, or, Predicate};
    use crate::codec::Value;
    use crate::error::ErrorCode;
    use crate::schema::{ColumnType, FieldDef, Labels, TableDef, TableSchema};

    fn schema() -> TableSchema {
        let def = TableDef::named("Widget")
            .field(FieldDef::new("rowid", ColumnType::Integer).virtual_col())
            .field(FieldDef::new("pk", ColumnType::Text).pk())
            .field(FieldDef::new("id", ColumnType::Integer).key())
            .field(FieldDef::new("name", ColumnType::Text))
            .field(FieldDef::new("flag", ColumnType::Boolean));
        TableSchema::reflect(&def).expect("reflect")
    }

    #[test]
    fn comparisons_bind_literals() {
        let fragment = eq("id", 3).compile(&schema()).expect("compile");
        assert_eq!(fragment.text, "\"id\" = ?");
        assert_eq!(fragment.params, vec![Value::Int(3)]);

        let fragment = lt("name", "m").compile(&schema()).expect("compile");
        assert_eq!(fragment.text, "\"name\" < ?");
    }

    #[test]
    fn field_references_emit_unbound_column_pairs() {
        let fragment = gt("rowid", field("id")).compile(&schema()).expect("compile");
        assert_eq!(fragment.text, "\"rowid\" > \"id\"");
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn column_resolution_is_case_insensitive() {
        let fragment = neq("ID", 1).compile(&schema()).expect("compile");
        assert_eq!(fragment.text, "\"id\" != ?");
    }

    #[test]
    fn unknown_column_is_a_compile_error() {
        let err = eq("missing", 1).compile(&schema()).expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::Predicate);
    }

    #[test]
    fn incompatible_literal_is_a_compile_error() {
        let err = eq("id", "three").compile(&schema()).expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::Predicate);
        assert!(eq("flag", true).compile(&schema()).is_ok());
        assert!(eq("flag", 1).compile(&schema()).is_err());
    }

    #[test]
    fn combinators_parenthesise_and_concatenate_params() {
        let fragment = or([eq("id", 0), and([eq("id", 6), neq("name", "x")])])
            .compile(&schema())
            .expect("compile");
        assert_eq!(
            fragment.text,
            "(\"id\" = ? OR (\"id\" = ? AND \"name\" != ?))"
        );
        assert_eq!(fragment.params.len(), 3);
    }

    #[test]
    fn empty_combinators_are_identities() {
        let universe = and([]).compile(&schema()).expect("compile");
        assert_eq!(universe.text, "1 = 1");
        let empty = or([]).compile(&schema()).expect("compile");
        assert_eq!(empty.text, "1 = 0");
    }

    #[test]
    fn single_child_combinator_equals_its_child_modulo_parens() {
        let child = eq("id", 4).compile(&schema()).expect("compile");
        let wrapped = and([eq("id", 4)]).compile(&schema()).expect("compile");
        assert_eq!(wrapped.text, format!("({})", child.text));
        assert_eq!(wrapped.params, child.params);
    }

    #[test]
    fn match_compiles_to_correlated_existence_checks() {
        let labels = Labels::from([("tier".to_string(), "gold".to_string())]);
        let fragment = match_labels(labels).compile(&schema()).expect("compile");
        assert!(fragment.text.starts_with("EXISTS (SELECT 1 FROM \"Label\""));
        assert!(fragment.text.contains("\"Label\".\"parent\" = \"Widget\".\"pk\""));
        assert_eq!(
            fragment.params,
            vec![
                Value::from("Widget"),
                Value::from("tier"),
                Value::from("gold"),
            ]
        );
    }

    #[test]
    fn match_conjoins_one_check_per_pair() {
        let labels = Labels::from([
            ("n1".to_string(), "v1".to_string()),
            ("n2".to_string(), "v2".to_string()),
        ]);
        let fragment = match_labels(labels).compile(&schema()).expect("compile");
        assert_eq!(fragment.text.matches("EXISTS").count(), 2);
        assert_eq!(fragment.params.len(), 6);
    }

    #[test]
    fn trees_compose_without_interface_dispatch() {
        let predicate = or([
            match_labels(Labels::from([("id".to_string(), "v4".to_string())])),
            eq("id", 8),
        ]);
        assert!(matches!(predicate, Predicate::Or(ref children) if children.len() == 2));
        assert!(predicate.compile(&schema()).is_ok());
    }
}
