use crate::codec::RowValues;
use crate::error::StoreError;
use crate::schema::Entity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

/// One committed change as delivered to a watch handler.
#[derive(Debug, Clone)]
pub struct Event<E> {
    pub action: Action,
    pub model: E,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Replay the current table contents as synthetic `Created` events
    /// before going live.
    pub snapshot: bool,
}

/// Watch handler contract. Callbacks run on the watch's dedicated worker
/// and are never invoked concurrently. `started` is first, with the
/// journal revision the watch observed; `parity` marks the transition
/// from snapshot replay to live delivery; `end` is last.
///
/// Errors are delivered through `error` and do not terminate the watch.
pub trait EventHandler<E: Entity>: Send {
    fn options(&self) -> WatchOptions {
        WatchOptions::default()
    }
    fn started(&mut self, _revision: u64) {}
    fn parity(&mut self) {}
    fn created(&mut self, _event: Event<E>) {}
    fn updated(&mut self, _event: Event<E>) {}
    fn deleted(&mut self, _event: Event<E>) {}
    fn error(&mut self, _err: &StoreError) {}
    fn end(&mut self) {}
}

/// A buffered change awaiting commit.
pub(crate) struct PendingEvent {
    pub table: String,
    pub action: Action,
    pub row: RowValues,
}

enum WatchMsg {
    Started(u64),
    Event(Action, RowValues),
    Parity,
    End,
}

struct WatchEntry {
    id: u64,
    table: String,
    sender: Sender<WatchMsg>,
}

struct JournalState {
    /// Global commit sequence; every commit bumps it exactly once.
    seq: u64,
    next_id: u64,
    watches: Vec<WatchEntry>,
    workers: HashMap<u64, JoinHandle<()>>,
}

/// In-process fan-out of committed changes. Commits append to every
/// matching watch queue while holding the journal lock, so any two
/// watches observe commits in the same relative order; each queue is
/// drained by its watch's dedicated worker.
pub(crate) struct Journal {
    state: Mutex<JournalState>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(JournalState {
                seq: 0,
                next_id: 1,
                watches: Vec::new(),
                workers: HashMap::new(),
            }),
        }
    }

    /// Registers a watch. The snapshot closure, when present, runs under
    /// the journal lock: concurrent commits queue behind the replay, so a
    /// row is seen either in the snapshot or live, never both.
    pub(crate) fn watch<E, H>(
        journal: &Arc<Journal>,
        table: &str,
        handler: H,
        snapshot: Option<Box<dyn FnOnce() -> Result<Vec<RowValues>, StoreError> + '_>>,
    ) -> Result<Watch, StoreError>
    where
        E: Entity,
        H: EventHandler<E> + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let worker_alive = Arc::clone(&alive);
        let worker = std::thread::spawn(move || drive::<E, H>(receiver, handler, worker_alive));

        let mut state = journal.state.lock();
        let _ = sender.send(WatchMsg::Started(state.seq));
        if let Some(snapshot) = snapshot {
            match snapshot() {
                Ok(rows) => {
                    for row in rows {
                        let _ = sender.send(WatchMsg::Event(Action::Created, row));
                    }
                }
                Err(err) => {
                    let _ = sender.send(WatchMsg::End);
                    drop(sender);
                    drop(state);
                    let _ = worker.join();
                    return Err(err);
                }
            }
        }
        let _ = sender.send(WatchMsg::Parity);
        let id = state.next_id;
        state.next_id += 1;
        state.watches.push(WatchEntry {
            id,
            table: table.to_string(),
            sender,
        });
        state.workers.insert(id, worker);
        debug!(table, watch = id, "watch registered");
        Ok(Watch {
            id,
            alive,
            journal: Arc::clone(journal),
        })
    }

    /// Runs the backend commit and, on success, fans the buffered events
    /// out to every matching watch — all under the journal lock, so every
    /// watch observes the same global commit order.
    pub(crate) fn commit<F>(
        &self,
        apply: F,
        events: Vec<PendingEvent>,
    ) -> Result<(), StoreError>
    where
        F: FnOnce() -> Result<(), StoreError>,
    {
        let mut state = self.state.lock();
        apply()?;
        state.seq += 1;
        for event in events {
            for watch in state.watches.iter().filter(|w| w.table == event.table) {
                let _ = watch
                    .sender
                    .send(WatchMsg::Event(event.action, event.row.clone()));
            }
        }
        Ok(())
    }

    /// Ends one watch: its queue closes after draining in-flight events,
    /// then the handler's `end` runs on the worker.
    pub(crate) fn end(&self, id: u64) {
        let mut state = self.state.lock();
        let Some(position) = state.watches.iter().position(|w| w.id == id) else {
            return;
        };
        let entry = state.watches.remove(position);
        let _ = entry.sender.send(WatchMsg::End);
        // The worker detaches and exits once the queue drains.
        state.workers.remove(&id);
        debug!(watch = id, "watch ended");
    }

    /// Ends every live watch and waits for their workers to finish.
    pub(crate) fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock();
            for entry in state.watches.drain(..) {
                let _ = entry.sender.send(WatchMsg::End);
            }
            state.workers.drain().map(|(_, handle)| handle).collect()
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("watch worker panicked during shutdown");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn watch_count(&self) -> usize {
        self.state.lock().watches.len()
    }
}

fn drive<E, H>(receiver: Receiver<WatchMsg>, mut handler: H, alive: Arc<AtomicBool>)
where
    E: Entity,
    H: EventHandler<E>,
{
    while let Ok(message) = receiver.recv() {
        match message {
            WatchMsg::Started(revision) => handler.started(revision),
            WatchMsg::Parity => handler.parity(),
            WatchMsg::Event(action, row) => {
                let mut model = E::default();
                match model.from_values(&row) {
                    Ok(()) => {
                        let event = Event { action, model };
                        match action {
                            Action::Created => handler.created(event),
                            Action::Updated => handler.updated(event),
                            Action::Deleted => handler.deleted(event),
                        }
                    }
                    Err(err) => {
                        warn!(table = row.table(), error = %err, "watch event decode failed");
                        handler.error(&err);
                    }
                }
            }
            WatchMsg::End => break,
        }
    }
    handler.end();
    alive.store(false, Ordering::Release);
}

/// Handle to a live subscription.
pub struct Watch {
    id: u64,
    alive: Arc<AtomicBool>,
    journal: Arc<Journal>,
}

impl Watch {
    /// True until the handler's `end` has returned.
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn end(&self) {
        self.journal.end(self.id);
    }
}
