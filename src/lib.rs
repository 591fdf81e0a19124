pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod label;
mod pool;
pub mod predicate;
pub mod schema;
mod sql;
pub mod tx;


pub use codec::{RowValues, Value};
pub use config::{JournalMode, StoreConfig, Synchronous};
pub use error::{ErrorCode, StoreError};
pub use journal::{Action, Event, EventHandler, Watch, WatchOptions};
pub use label::Label;
pub use predicate::{
    and, eq, field, gt, lt, match_labels, neq, or, FieldRef, Operand, Predicate,
};
pub use schema::{ColumnType, Entity, FieldDef, FieldKind, Labels, TableDef};
pub use sql::Page;
pub use tx::Tx;

use crate::journal::Journal;
use crate::pool::Pool;
use crate::schema::reflect::{entity_row, MAX_DETAIL};
use crate::schema::TableSchema;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Query options for `list` and `iter`.
#[derive(Clone, Default)]
pub struct ListOptions {
    pub predicate: Option<Predicate>,
    /// Detail level 0..4; level K materialises every detail bucket <= K.
    pub detail: u8,
    /// Index-group identifiers; ORDER BY expands each group's member
    /// columns in declaration order.
    pub sort: Vec<String>,
    pub page: Option<Page>,
}

/// Result of an `execute` escape hatch call.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteResult {
    rows_affected: usize,
}

impl ExecuteResult {
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }
}

/// Configures and opens a store: a backing file plus the set of entity
/// descriptors. The label table is always installed.
pub struct StoreBuilder {
    path: PathBuf,
    config: StoreConfig,
    entities: Vec<(TypeId, TableDef)>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn entity<E: Entity>(mut self) -> Self {
        self.entities.push((TypeId::of::<E>(), E::table()));
        self
    }

    /// Creates or opens the backing file, installs the schema, and starts
    /// the journal. `truncate` discards any prior contents. Descriptor
    /// problems are fatal here.
    pub fn open(self, truncate: bool) -> Result<Store, StoreError> {
        let mut registered = vec![(TypeId::of::<Label>(), Label::table())];
        registered.extend(
            self.entities
                .into_iter()
                .filter(|(id, _)| *id != TypeId::of::<Label>()),
        );
        let mut tables: Vec<Arc<TableSchema>> = Vec::with_capacity(registered.len());
        let mut by_type = HashMap::with_capacity(registered.len());
        for (type_id, def) in registered {
            let schema = Arc::new(TableSchema::reflect(&def)?);
            if by_type.contains_key(&type_id) {
                return Err(StoreError::Schema(format!(
                    "entity '{}' registered twice",
                    schema.table
                )));
            }
            if tables.iter().any(|t| t.table == schema.table) {
                return Err(StoreError::Schema(format!(
                    "duplicate table '{}'",
                    schema.table
                )));
            }
            by_type.insert(type_id, tables.len());
            tables.push(schema);
        }
        let pool = Pool::open(&self.path, self.config, truncate)?;
        {
            let session = pool.writer()?;
            let conn = session.conn()?;
            for schema in &tables {
                sql::execute(conn, &sql::create_table(schema), &[])?;
                for statement in sql::create_indexes(schema) {
                    sql::execute(conn, &statement, &[])?;
                }
            }
        }
        info!(
            path = %self.path.display(),
            tables = tables.len(),
            "store opened"
        );
        Ok(Store {
            inner: Arc::new(StoreInner {
                pool,
                tables,
                by_type,
                journal: Arc::new(Journal::new()),
            }),
        })
    }
}

pub(crate) struct StoreInner {
    pub(crate) pool: Pool,
    pub(crate) tables: Vec<Arc<TableSchema>>,
    pub(crate) by_type: HashMap<TypeId, usize>,
    pub(crate) journal: Arc<Journal>,
}

impl StoreInner {
    pub(crate) fn schema_for<E: Entity>(&self) -> Result<Arc<TableSchema>, StoreError> {
        self.by_type
            .get(&TypeId::of::<E>())
            .map(|&index| Arc::clone(&self.tables[index]))
            .ok_or_else(|| {
                StoreError::Schema(format!(
                    "entity type '{}' is not registered",
                    std::any::type_name::<E>()
                ))
            })
    }
}

/// The store façade. Cheap to clone; all clones share the same file,
/// session pool, and journal.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn builder(path: impl AsRef<Path>) -> StoreBuilder {
        StoreBuilder {
            path: path.as_ref().to_path_buf(),
            config: StoreConfig::default(),
            entities: Vec::new(),
        }
    }

    /// Inserts the entity and its labels in one implicit transaction. On
    /// return the entity reflects the stored row (revision 1, backend row
    /// identity, derived primary key).
    pub fn insert<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let mut tx = self.begin()?;
        tx.insert(entity)?;
        tx.commit()
    }

    /// Updates the entity, bumps its revision, and re-syncs its labels in
    /// one implicit transaction. Returns `NotFound` for an absent row.
    pub fn update<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let mut tx = self.begin()?;
        tx.update(entity)?;
        tx.commit()
    }

    /// Deletes the entity and its labels in one implicit transaction.
    /// Returns `NotFound` for an absent row.
    pub fn delete<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let mut tx = self.begin()?;
        tx.delete(entity)?;
        tx.commit()
    }

    /// Fetches one row by primary key — or by natural keys, through the
    /// deterministic key derivation — into the entity.
    pub fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let (pk, _) = entity_row(&schema, entity)?;
        let (select, projected) = sql::select_by_pk(&schema);
        let reader = self.inner.pool.reader()?;
        let session = reader.lock();
        let rows = sql::query_rows(
            session.conn()?,
            &schema,
            &select,
            &[Value::from(pk.as_str())],
            &projected,
        )?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        entity.from_values(&row)
    }

    /// Materialises the matching rows at the requested detail level.
    pub fn list<E: Entity>(&self, options: ListOptions) -> Result<Vec<E>, StoreError> {
        let rows = self.select_rows::<E>(&options)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut entity = E::default();
            entity.from_values(&row)?;
            out.push(entity);
        }
        Ok(out)
    }

    /// Streaming equivalent of `list`.
    pub fn iter<E: Entity>(&self, options: ListOptions) -> Result<Iter<E>, StoreError> {
        let rows = self.select_rows::<E>(&options)?;
        Ok(Iter {
            total: rows.len(),
            rows: rows.into(),
            _marker: PhantomData,
        })
    }

    pub fn count<E: Entity>(&self, predicate: Option<Predicate>) -> Result<i64, StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let fragment = predicate
            .as_ref()
            .map(|p| p.compile(&schema))
            .transpose()?;
        let (statement, params) = sql::count_statement(&schema, fragment.as_ref());
        let reader = self.inner.pool.reader()?;
        let session = reader.lock();
        sql::query_count(session.conn()?, &statement, &params)
    }

    /// Escape hatch: runs arbitrary SQL on the writer session. Such writes
    /// bypass event generation entirely.
    pub fn execute(&self, statement: &str, params: &[Value]) -> Result<ExecuteResult, StoreError> {
        let session = self.inner.pool.writer()?;
        let rows_affected = sql::execute(session.conn()?, statement, params)?;
        Ok(ExecuteResult { rows_affected })
    }

    /// Acquires the writer lease, blocking until it is free.
    pub fn begin(&self) -> Result<Tx<'_>, StoreError> {
        Tx::begin(&self.inner)
    }

    /// Subscribes a handler to the entity's change stream. With
    /// `snapshot`, current table contents replay as `Created` events in
    /// primary-key order before `parity`; concurrent commits queue behind
    /// the replay.
    pub fn watch<E, H>(&self, handler: H) -> Result<Watch, StoreError>
    where
        E: Entity,
        H: EventHandler<E> + 'static,
    {
        let schema = self.inner.schema_for::<E>()?;
        let options = handler.options();
        let snapshot: Option<Box<dyn FnOnce() -> Result<Vec<RowValues>, StoreError> + '_>> =
            if options.snapshot {
                let inner = &self.inner;
                let snapshot_schema = Arc::clone(&schema);
                Some(Box::new(move || {
                    let (select, projected) = sql::select_snapshot(&snapshot_schema);
                    let reader = inner.pool.reader()?;
                    let session = reader.lock();
                    sql::query_rows(
                        session.conn()?,
                        &snapshot_schema,
                        &select,
                        &[],
                        &projected,
                    )
                }))
            } else {
                None
            };
        Journal::watch::<E, H>(&self.inner.journal, &schema.table, handler, snapshot)
    }

    /// Closes the store. Sessions are marked closed and released; with
    /// `force`, every live watch is ended and its worker joined first.
    pub fn close(&self, force: bool) {
        if force {
            self.inner.journal.shutdown();
        }
        self.inner.pool.close();
        debug!(force, "store closed");
    }

    fn select_rows<E: Entity>(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<RowValues>, StoreError> {
        if options.detail > MAX_DETAIL {
            return Err(StoreError::Predicate(format!(
                "detail level {} outside 0..{MAX_DETAIL}",
                options.detail
            )));
        }
        let schema = self.inner.schema_for::<E>()?;
        let fragment = options
            .predicate
            .as_ref()
            .map(|p| p.compile(&schema))
            .transpose()?;
        let plan = sql::select_statement(
            &schema,
            fragment.as_ref(),
            options.detail,
            &options.sort,
            options.page,
        )?;
        let reader = self.inner.pool.reader()?;
        let session = reader.lock();
        sql::query_rows(session.conn()?, &schema, &plan.sql, &plan.params, &plan.projected)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }
}

/// Materialised result cursor. `len` reports the full result size;
/// `next_with` decodes into a caller-owned entity, resetting it first so
/// non-projected columns read as zero values.
pub struct Iter<E: Entity> {
    rows: std::collections::VecDeque<RowValues>,
    total: usize,
    _marker: PhantomData<E>,
}

impl<E: Entity> Iter<E> {
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn next_with(&mut self, target: &mut E) -> Result<bool, StoreError> {
        match self.rows.pop_front() {
            Some(row) => {
                *target = E::default();
                target.from_values(&row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<E: Entity> Iterator for Iter<E> {
    type Item = Result<E, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.pop_front()?;
        let mut entity = E::default();
        Some(entity.from_values(&row).map(|()| entity))
    }
}
