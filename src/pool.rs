use crate::config::StoreConfig;
use crate::error::StoreError;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One physical connection to the backing file; either the writer (id 0)
/// or one of the readers (id 1..N).
pub(crate) struct Session {
    pub(crate) id: usize,
    pub(crate) closed: bool,
    conn: Option<Connection>,
}

impl Session {
    pub(crate) fn conn(&self) -> Result<&Connection, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    fn close(&mut self) {
        self.closed = true;
        self.conn = None;
    }
}

/// Owns the single writer session and a lazily grown ring of reader
/// sessions over the same file.
pub(crate) struct Pool {
    path: PathBuf,
    config: StoreConfig,
    writer: Mutex<Session>,
    readers: Mutex<Vec<Arc<Mutex<Session>>>>,
    next_reader: AtomicUsize,
    closed: AtomicBool,
}

impl Pool {
    pub(crate) fn open(
        path: &Path,
        config: StoreConfig,
        truncate: bool,
    ) -> Result<Self, StoreError> {
        if truncate {
            discard_store_files(path)?;
        }
        let conn = open_writer(path, &config)?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
            writer: Mutex::new(Session {
                id: 0,
                closed: false,
                conn: Some(conn),
            }),
            readers: Mutex::new(Vec::new()),
            next_reader: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Acquires the exclusive writer lease, blocking until it is free.
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Session>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let guard = self.writer.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    /// Leases a reader session round-robin, creating sessions lazily up to
    /// the configured bound.
    pub(crate) fn reader(&self) -> Result<Arc<Mutex<Session>>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let turn = self.next_reader.fetch_add(1, Ordering::Relaxed);
        let mut readers = self.readers.lock();
        if readers.len() < self.config.max_readers.max(1) {
            let id = readers.len() + 1;
            let conn = open_reader(&self.path, &self.config)?;
            let session = Arc::new(Mutex::new(Session {
                id,
                closed: false,
                conn: Some(conn),
            }));
            readers.push(Arc::clone(&session));
            return Ok(session);
        }
        Ok(Arc::clone(&readers[turn % readers.len()]))
    }

    /// Marks every session closed and releases the backend handles;
    /// subsequent leases and in-flight sessions fail with `Closed`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut writer = self.writer.lock();
        debug!(session = writer.id, "session closed");
        writer.close();
        drop(writer);
        for reader in self.readers.lock().iter() {
            let mut session = reader.lock();
            debug!(session = session.id, "session closed");
            session.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn sessions_closed(&self) -> bool {
        self.writer.lock().closed && self.readers.lock().iter().all(|r| r.lock().closed)
    }

    #[cfg(test)]
    pub(crate) fn reader_ids(&self) -> Vec<usize> {
        self.readers.lock().iter().map(|r| r.lock().id).collect()
    }
}

fn discard_store_files(path: &Path) -> Result<(), StoreError> {
    let mut targets = vec![path.to_path_buf()];
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in ["-wal", "-shm"] {
        targets.push(path.with_file_name(format!("{name}{suffix}")));
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StoreError::Schema(format!(
                    "truncate {}: {err}",
                    target.display()
                )))
            }
        }
    }
    Ok(())
}

fn open_writer(path: &Path, config: &StoreConfig) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|err| StoreError::backend(format!("open {}", path.display()), err))?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = {};\nPRAGMA synchronous = {};",
        config.journal_mode.pragma_value(),
        config.synchronous.pragma_value(),
    ))
    .map_err(|err| StoreError::backend("apply pragmas", err))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| StoreError::backend("busy timeout", err))?;
    Ok(conn)
}

fn open_reader(path: &Path, config: &StoreConfig) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|err| StoreError::backend(format!("open {}", path.display()), err))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| StoreError::backend("busy timeout", err))?;
    Ok(conn)
}
