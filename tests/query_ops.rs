use invdb::codec::{RowValues, Value};
use invdb::{
    and, eq, neq, or, ColumnType, Entity, FieldDef, ListOptions, Predicate, Store, StoreError,
    TableDef,
};
use std::path::Path;
use tempfile::tempdir;

#[derive(Debug, Clone, Default, PartialEq)]
struct Account {
    pk: String,
    id: i32,
    status: String,
    balance: i64,
    d1: String,
    d2: String,
    d3: String,
    d4: String,
}

impl Entity for Account {
    fn table() -> TableDef {
        TableDef::of::<Self>()
            .field(FieldDef::new("pk", ColumnType::Text).pk())
            .field(FieldDef::new("id", ColumnType::Integer).key())
            .field(FieldDef::new("status", ColumnType::Text).index("status"))
            .field(FieldDef::new("balance", ColumnType::Integer))
            .field(FieldDef::new("d1", ColumnType::Text).detail(1))
            .field(FieldDef::new("d2", ColumnType::Text).detail(2))
            .field(FieldDef::new("d3", ColumnType::Text).detail(3))
            .field(FieldDef::new("d4", ColumnType::Text).detail(4))
    }

    fn pk(&self) -> String {
        self.pk.clone()
    }

    fn to_values(&self) -> Result<Vec<(&'static str, Value)>, StoreError> {
        Ok(vec![
            ("pk", Value::from(self.pk.as_str())),
            ("id", Value::from(self.id)),
            ("status", Value::from(self.status.as_str())),
            ("balance", Value::from(self.balance)),
            ("d1", Value::from(self.d1.as_str())),
            ("d2", Value::from(self.d2.as_str())),
            ("d3", Value::from(self.d3.as_str())),
            ("d4", Value::from(self.d4.as_str())),
        ])
    }

    fn from_values(&mut self, row: &RowValues) -> Result<(), StoreError> {
        self.pk = row.text("pk")?;
        self.id = row.i32("id")?;
        self.status = row.text("status")?;
        self.balance = row.i64("balance")?;
        self.d1 = row.text("d1")?;
        self.d2 = row.text("d2")?;
        self.d3 = row.text("d3")?;
        self.d4 = row.text("d4")?;
        Ok(())
    }
}

fn seeded_store(dir: &Path, name: &str, n: i32) -> Store {
    let db = Store::builder(dir.join(name))
        .entity::<Account>()
        .open(true)
        .expect("open");
    for i in 0..n {
        let mut account = Account {
            id: i,
            status: if i % 2 == 0 { "open" } else { "closed" }.into(),
            balance: i64::from(i) * 10,
            d1: "one".into(),
            d2: "two".into(),
            d3: "three".into(),
            d4: "four".into(),
            ..Account::default()
        };
        db.insert(&mut account).expect("insert");
    }
    db
}

fn matching_ids(db: &Store, predicate: Option<Predicate>) -> Vec<i32> {
    let list: Vec<Account> = db
        .list(ListOptions {
            predicate,
            ..ListOptions::default()
        })
        .expect("list");
    let mut ids: Vec<i32> = list.iter().map(|a| a.id).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn single_child_combinators_are_identities() {
    let dir = tempdir().expect("tempdir");
    let db = seeded_store(dir.path(), "identity.db", 10);
    let plain = matching_ids(&db, Some(eq("status", "open")));
    let conjoined = matching_ids(&db, Some(and([eq("status", "open")])));
    let disjoined = matching_ids(&db, Some(or([eq("status", "open")])));
    assert_eq!(plain, conjoined);
    assert_eq!(plain, disjoined);
    assert_eq!(plain, vec![0, 2, 4, 6, 8]);
}

#[test]
fn empty_and_is_the_universe_and_empty_or_is_empty() {
    let dir = tempdir().expect("tempdir");
    let db = seeded_store(dir.path(), "units.db", 10);
    assert_eq!(matching_ids(&db, Some(and([]))).len(), 10);
    assert_eq!(matching_ids(&db, Some(and([]))), matching_ids(&db, None));
    assert!(matching_ids(&db, Some(or([]))).is_empty());
}

#[test]
fn neq_is_the_complement_of_eq_over_the_populated_set() {
    let dir = tempdir().expect("tempdir");
    let db = seeded_store(dir.path(), "complement.db", 10);
    let equal = matching_ids(&db, Some(eq("id", 4)));
    let unequal = matching_ids(&db, Some(neq("id", 4)));
    assert_eq!(equal, vec![4]);
    let mut union = [equal, unequal].concat();
    union.sort_unstable();
    assert_eq!(union, (0..10).collect::<Vec<_>>());
}

#[test]
fn count_agrees_with_list_under_any_predicate() {
    let dir = tempdir().expect("tempdir");
    let db = seeded_store(dir.path(), "count.db", 10);
    for predicate in [
        None,
        Some(eq("status", "open")),
        Some(or([eq("id", 1), eq("id", 2), eq("id", 3)])),
        Some(and([eq("status", "closed"), neq("id", 1)])),
    ] {
        let listed = matching_ids(&db, predicate.clone()).len();
        let counted = db.count::<Account>(predicate).expect("count");
        assert_eq!(listed as i64, counted);
    }
}

#[test]
fn detail_projection_is_exact_per_level() {
    let dir = tempdir().expect("tempdir");
    let db = seeded_store(dir.path(), "detail.db", 3);
    for detail in 0u8..=4 {
        let list: Vec<Account> = db
            .list(ListOptions {
                detail,
                ..ListOptions::default()
            })
            .expect("list");
        for account in &list {
            // Non-detail columns are always materialised.
            assert!(!account.pk.is_empty());
            assert!(!account.status.is_empty());
            let buckets = [
                (1, account.d1.as_str(), "one"),
                (2, account.d2.as_str(), "two"),
                (3, account.d3.as_str(), "three"),
                (4, account.d4.as_str(), "four"),
            ];
            for (bucket, actual, expected) in buckets {
                if bucket <= detail {
                    assert_eq!(actual, expected);
                } else {
                    assert_eq!(actual, "", "bucket {bucket} zeroed at detail {detail}");
                }
            }
        }
    }
}

#[test]
fn insert_get_roundtrip_preserves_every_field() {
    let dir = tempdir().expect("tempdir");
    let db = Store::builder(dir.path().join("roundtrip.db"))
        .entity::<Account>()
        .open(true)
        .expect("open");
    let mut account = Account {
        id: 42,
        status: "open".into(),
        balance: -7,
        d1: "a".into(),
        d2: "b".into(),
        d3: "c".into(),
        d4: "d".into(),
        ..Account::default()
    };
    db.insert(&mut account).expect("insert");
    let mut read = Account {
        id: 42,
        ..Account::default()
    };
    db.get(&mut read).expect("get");
    assert_eq!(account, read);
}
