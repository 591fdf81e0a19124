use crate::codec::Value;
use crate::error::StoreError;
use crate::journal::{Action, PendingEvent};
use crate::label::{self, Label};
use crate::pool::Session;
use crate::predicate::{and, eq};
use crate::schema::reflect::{entity_row, MAX_DETAIL};
use crate::schema::{Entity, Labels, TableSchema};
use crate::sql;
use crate::StoreInner;
use parking_lot::MutexGuard;
use std::sync::Arc;

/// A logical transaction bound to the writer session. Writes are invisible
/// to readers until `commit`, which also publishes the buffered events to
/// the journal atomically, in mutation order. Dropping an uncommitted
/// transaction rolls it back and discards its events.
pub struct Tx<'a> {
    inner: &'a StoreInner,
    session: MutexGuard<'a, Session>,
    events: Vec<PendingEvent>,
    active: bool,
}

impl<'a> Tx<'a> {
    pub(crate) fn begin(inner: &'a StoreInner) -> Result<Self, StoreError> {
        let session = inner.pool.writer()?;
        session
            .conn()?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| StoreError::backend("begin", err))?;
        Ok(Self {
            inner,
            session,
            events: Vec::new(),
            active: true,
        })
    }

    pub fn insert<E: Entity>(&mut self, entity: &mut E) -> Result<(), StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let (pk, mut row) = entity_row(&schema, entity)?;
        if let Some(rev) = schema.incremented {
            row[rev] = Value::Int(1);
        }
        let (statement, bound) = sql::insert_statement(&schema);
        let params: Vec<Value> = bound.iter().map(|&i| row[i].clone()).collect();
        sql::execute(self.session.conn()?, &statement, &params)?;
        self.refresh(&schema, &pk, entity, Action::Created)?;
        if schema.table != label::TABLE {
            for (name, value) in entity.labels() {
                let mut added = Label::new(schema.table.clone(), pk.clone(), name, value);
                self.insert(&mut added)?;
            }
        }
        Ok(())
    }

    pub fn update<E: Entity>(&mut self, entity: &mut E) -> Result<(), StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let (pk, row) = entity_row(&schema, entity)?;
        let (statement, bound) = sql::update_statement(&schema);
        let params: Vec<Value> = bound.iter().map(|&i| row[i].clone()).collect();
        let affected = sql::execute(self.session.conn()?, &statement, &params)?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.refresh(&schema, &pk, entity, Action::Updated)?;
        if schema.table != label::TABLE {
            self.apply_labels(&schema, &pk, entity.labels())?;
        }
        Ok(())
    }

    pub fn delete<E: Entity>(&mut self, entity: &mut E) -> Result<(), StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let (pk, _) = entity_row(&schema, entity)?;
        let (select, projected) = sql::select_by_pk(&schema);
        let pk_param = [Value::from(pk.as_str())];
        let rows = sql::query_rows(
            self.session.conn()?,
            &schema,
            &select,
            &pk_param,
            &projected,
        )?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        let affected = sql::execute(
            self.session.conn()?,
            &sql::delete_statement(&schema),
            &pk_param,
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        entity.from_values(&row)?;
        self.events.push(PendingEvent {
            table: schema.table.clone(),
            action: Action::Deleted,
            row,
        });
        if schema.table != label::TABLE {
            for stored in self.stored_labels(&schema.table, &pk)? {
                let mut gone = stored;
                self.delete(&mut gone)?;
            }
        }
        Ok(())
    }

    /// Reads through the writer session, observing this transaction's own
    /// uncommitted writes.
    pub fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let schema = self.inner.schema_for::<E>()?;
        let (pk, _) = entity_row(&schema, entity)?;
        let (select, projected) = sql::select_by_pk(&schema);
        let rows = sql::query_rows(
            self.session.conn()?,
            &schema,
            &select,
            &[Value::from(pk.as_str())],
            &projected,
        )?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        entity.from_values(&row)
    }

    /// Commits the backend transaction and fans the buffered events out to
    /// the journal under the commit lock.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let events = std::mem::take(&mut self.events);
        let conn = self.session.conn()?;
        let result = self.inner.journal.commit(
            || {
                conn.execute_batch("COMMIT")
                    .map_err(|err| StoreError::backend("commit", err))
            },
            events,
        );
        if result.is_err() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        self.active = false;
        result
    }

    /// Discards the transaction; buffered events are dropped.
    pub fn end(self) {}

    /// Re-reads the stored row after a write so the entity reflects the
    /// bumped revision and backend row identity, and buffers the event
    /// with the full model.
    fn refresh<E: Entity>(
        &mut self,
        schema: &Arc<TableSchema>,
        pk: &str,
        entity: &mut E,
        action: Action,
    ) -> Result<(), StoreError> {
        let (select, projected) = sql::select_by_pk(schema);
        let rows = sql::query_rows(
            self.session.conn()?,
            schema,
            &select,
            &[Value::from(pk)],
            &projected,
        )?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound)?;
        entity.from_values(&row)?;
        self.events.push(PendingEvent {
            table: schema.table.clone(),
            action,
            row,
        });
        Ok(())
    }

    /// Diffs the desired label set against storage and applies the
    /// additions, removals, and changes inside this transaction.
    fn apply_labels(
        &mut self,
        schema: &Arc<TableSchema>,
        parent: &str,
        desired: Labels,
    ) -> Result<(), StoreError> {
        let stored = self.stored_labels(&schema.table, parent)?;
        for label in &stored {
            match desired.get(&label.name) {
                None => {
                    let mut removed = label.clone();
                    self.delete(&mut removed)?;
                }
                Some(value) if *value != label.value => {
                    let mut changed = label.clone();
                    changed.value = value.clone();
                    self.update(&mut changed)?;
                }
                Some(_) => {}
            }
        }
        for (name, value) in desired {
            if stored.iter().all(|l| l.name != name) {
                let mut added = Label::new(schema.table.clone(), parent, name, value);
                self.insert(&mut added)?;
            }
        }
        Ok(())
    }

    fn stored_labels(&self, kind: &str, parent: &str) -> Result<Vec<Label>, StoreError> {
        let schema = self.inner.schema_for::<Label>()?;
        let fragment = and([
            eq(label::COL_KIND, kind),
            eq(label::COL_PARENT, parent),
        ])
        .compile(&schema)?;
        let plan = sql::select_statement(&schema, Some(&fragment), MAX_DETAIL, &[], None)?;
        let rows = sql::query_rows(
            self.session.conn()?,
            &schema,
            &plan.sql,
            &plan.params,
            &plan.projected,
        )?;
        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            let mut label = Label::default();
            label.from_values(&row)?;
            labels.push(label);
        }
        Ok(labels)
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Ok(conn) = self.session.conn() {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
    }
}
