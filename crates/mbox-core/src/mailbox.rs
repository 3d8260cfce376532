//! Named shared records with per-field change tracking.
//!
//! A [`Mailbox`] couples one structured value with a [`DirtyTracker`] under a
//! single short critical section. Two role handles are handed out:
//!
//! - [`Producer`]: the control loop. Posts whole snapshots, fetches the
//!   current value and consumes command batches with [`Producer::fetch_marked`]
//!   and [`Producer::acknowledge`].
//! - [`Consumer`]: the service side. Stages external writes field by field
//!   with [`Consumer::stage`], marking every touched leaf.
//!
//! # Threading Model
//!
//! Every operation takes the record lock for the duration of a copy or a
//! tree traversal and nothing else. Observer notifications are sent under the
//! lock so subscribers see updates in record order; write handlers run
//! before it is taken. Acknowledgement clears only
//! marks up to the generation seen by the matching fetch, so a write landing
//! between `fetch_marked` and `acknowledge` stays marked for the next batch.

use crate::dirty::{DirtyTracker, ROOT};
use crate::record::Structure;
use crate::value::{FieldSnapshot, FieldValue, Put};
use mbox_common::error::{MboxError, MboxResult};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default number of buffered updates per observer.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 16;

/// Handler invoked for every external write. Its return value is the acknowledgement.
pub type WriteHandler<T> = Box<dyn Fn(&Consumer<T>, Put) -> MboxResult<WriteAck> + Send + Sync>;

/// Acknowledgement of an external write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAck {
    /// Paths that were stored and marked.
    pub accepted: Vec<String>,
    /// Paths that were skipped, with the reason.
    pub ignored: Vec<(String, MboxError)>,
}

impl WriteAck {
    /// True if every field of the write was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ignored.is_empty()
    }
}

/// A fetched value together with the dirty state it was fetched with.
#[derive(Debug, Clone)]
pub struct Marked<T> {
    /// The value at fetch time.
    pub value: T,
    /// Tracker generation observed by the fetch.
    pub generation: u64,
    /// Leaf paths that were marked at fetch time.
    pub dirty: Vec<String>,
}

impl<T> Marked<T> {
    /// Was anything written since the last acknowledgement?
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Was `path`, or anything below it, marked at fetch time?
    #[must_use]
    pub fn is_dirty(&self, path: &str) -> bool {
        if path == ROOT {
            return self.has_changes();
        }
        self.dirty.iter().any(|leaf| {
            leaf == path
                || (leaf.len() > path.len()
                    && leaf.starts_with(path)
                    && leaf.as_bytes()[path.len()] == b'.')
        })
    }
}

struct Slot<T> {
    value: Option<T>,
    tracker: DirtyTracker,
}

struct Inner<T: Structure> {
    name: String,
    slot: Mutex<Slot<T>>,
    observers: broadcast::Sender<T>,
    handler: OnceLock<WriteHandler<T>>,
}

/// A named structured value plus its change tracking.
pub struct Mailbox<T: Structure> {
    inner: Arc<Inner<T>>,
}

impl<T: Structure> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Structure> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.inner.name)
            .field("accepts_writes", &self.inner.handler.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Structure> Mailbox<T> {
    /// Create an unopened mailbox.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_OBSERVER_CAPACITY)
    }

    /// Create an unopened mailbox buffering `capacity` updates per observer.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                slot: Mutex::new(Slot {
                    value: None,
                    tracker: DirtyTracker::for_fields(T::FIELDS),
                }),
                observers,
                handler: OnceLock::new(),
            }),
        }
    }

    /// Record name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The control-loop role handle.
    #[must_use]
    pub fn producer(&self) -> Producer<T> {
        Producer(self.clone())
    }

    /// The service-side role handle.
    #[must_use]
    pub fn consumer(&self) -> Consumer<T> {
        Consumer(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // Every mutation under the lock is a whole-value assignment or an
        // infallible tracker update, so a poisoned slot is still consistent.
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the starting value.
    ///
    /// # Errors
    ///
    /// [`MboxError::AlreadyOpen`] if called twice.
    pub fn open(&self, initial: T) -> MboxResult<()> {
        {
            let mut slot = self.lock();
            if slot.value.is_some() {
                return Err(MboxError::AlreadyOpen(self.inner.name.clone()));
            }
            slot.value = Some(initial);
        }
        info!(record = %self.inner.name, "Record opened");
        Ok(())
    }

    /// Is the record open?
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Replace the whole value and notify observers.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before [`open`](Self::open).
    pub fn post(&self, snapshot: T) -> MboxResult<()> {
        {
            let mut slot = self.lock();
            let Some(value) = slot.value.as_mut() else {
                return Err(MboxError::NotOpen(self.inner.name.clone()));
            };
            value.clone_from(&snapshot);
            self.notify(snapshot);
        }
        Ok(())
    }

    /// Consistent copy of the current value.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before [`open`](Self::open).
    pub fn fetch(&self) -> MboxResult<T> {
        self.lock()
            .value
            .clone()
            .ok_or_else(|| MboxError::NotOpen(self.inner.name.clone()))
    }

    /// Copy of the current value plus the marks it carries, taken atomically.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before [`open`](Self::open).
    pub fn fetch_marked(&self) -> MboxResult<Marked<T>> {
        let slot = self.lock();
        let value = slot
            .value
            .clone()
            .ok_or_else(|| MboxError::NotOpen(self.inner.name.clone()))?;
        Ok(Marked {
            value,
            generation: slot.tracker.generation(),
            dirty: slot.tracker.marked_leaves(),
        })
    }

    /// Clear the marks a previous [`fetch_marked`](Self::fetch_marked) reported.
    ///
    /// Writes staged after that fetch keep their marks.
    pub fn acknowledge(&self, batch: &Marked<T>) {
        let mut slot = self.lock();
        slot.tracker.acknowledge(ROOT, true, batch.generation);
        debug!(
            record = %self.inner.name,
            generation = batch.generation,
            remaining = slot.tracker.is_marked(ROOT, true),
            "Batch acknowledged"
        );
    }

    /// Query the mark on `path`.
    #[must_use]
    pub fn is_marked(&self, path: &str, recursive: bool) -> bool {
        self.lock().tracker.is_marked(path, recursive)
    }

    /// Clear every mark written so far at `path` (and below with `recursive`).
    pub fn clear(&self, path: &str, recursive: bool) {
        if !self.lock().tracker.clear(path, recursive) {
            warn!(record = %self.inner.name, path, "Clear of unknown field path ignored");
        }
    }

    /// Store the fields of an external write and mark each touched leaf.
    ///
    /// Unknown or mistyped fields are skipped individually; the rest of the
    /// write still lands. Later fields for the same path win.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before [`open`](Self::open).
    pub fn stage(&self, put: Put) -> MboxResult<WriteAck> {
        let mut ack = WriteAck::default();
        {
            let mut guard = self.lock();
            let slot = &mut *guard;
            let Some(value) = slot.value.as_mut() else {
                return Err(MboxError::NotOpen(self.inner.name.clone()));
            };
            for (path, field) in put {
                let Some(leaves) = slot.tracker.leaves_under(&path) else {
                    ack.ignored.push((path.clone(), MboxError::UnknownFieldPath(path)));
                    continue;
                };
                let leaves: Vec<String> = leaves.into_iter().map(str::to_owned).collect();
                match value.set_field(&path, &field) {
                    Ok(()) => {
                        for leaf in &leaves {
                            slot.tracker.mark_written(leaf);
                        }
                        ack.accepted.push(path);
                    }
                    Err(e) => ack.ignored.push((path, e)),
                }
            }
            let updated = value.clone();
            self.notify(updated);
        }

        for (path, reason) in &ack.ignored {
            warn!(record = %self.inner.name, path, %reason, "Write field ignored");
        }
        debug!(record = %self.inner.name, accepted = ?ack.accepted, "Write staged");
        Ok(ack)
    }

    /// Register the single handler for external writes.
    ///
    /// # Errors
    ///
    /// [`MboxError::HandlerAlreadyRegistered`] if one is already installed.
    pub fn on_external_write<F>(&self, handler: F) -> MboxResult<()>
    where
        F: Fn(&Consumer<T>, Put) -> MboxResult<WriteAck> + Send + Sync + 'static,
    {
        self.inner
            .handler
            .set(Box::new(handler))
            .map_err(|_| MboxError::HandlerAlreadyRegistered(self.inner.name.clone()))
    }

    /// Register the plain staging handler.
    ///
    /// # Errors
    ///
    /// [`MboxError::HandlerAlreadyRegistered`] if one is already installed.
    pub fn accept_writes(&self) -> MboxResult<()> {
        self.on_external_write(|consumer, put| consumer.stage(put))
    }

    /// Deliver an external write to the registered handler.
    ///
    /// # Errors
    ///
    /// [`MboxError::NoWriteHandler`] for a read-only record, otherwise
    /// whatever the handler returns.
    pub fn external_write(&self, put: Put) -> MboxResult<WriteAck> {
        let handler = self
            .inner
            .handler
            .get()
            .ok_or_else(|| MboxError::NoWriteHandler(self.inner.name.clone()))?;
        handler(&self.consumer(), put)
    }

    /// Subscribe to posted and staged values.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.inner.observers.subscribe()
    }

    /// Every leaf of the current value.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before [`open`](Self::open).
    pub fn snapshot(&self) -> MboxResult<FieldSnapshot> {
        let value = self.fetch()?;
        let fields = T::FIELDS
            .iter()
            .filter_map(|path| value.field(path).map(|v| ((*path).to_owned(), v)))
            .collect();
        Ok(FieldSnapshot {
            name: self.inner.name.clone(),
            fields,
        })
    }

    /// Read one leaf of the current value.
    ///
    /// # Errors
    ///
    /// [`MboxError::NotOpen`] before open, [`MboxError::UnknownFieldPath`] for a bad path.
    pub fn field(&self, path: &str) -> MboxResult<FieldValue> {
        self.fetch()?
            .field(path)
            .ok_or_else(|| MboxError::UnknownFieldPath(path.to_owned()))
    }

    /// Callers hold the slot lock so sends follow the order of updates.
    fn notify(&self, value: T) {
        // No receivers is fine; nobody is watching.
        let _ = self.inner.observers.send(value);
    }
}

/// Control-loop view of a mailbox.
#[derive(Debug, Clone)]
pub struct Producer<T: Structure>(Mailbox<T>);

impl<T: Structure> Producer<T> {
    /// Record name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Mailbox::post`].
    pub fn post(&self, snapshot: T) -> MboxResult<()> {
        self.0.post(snapshot)
    }

    /// See [`Mailbox::fetch`].
    pub fn fetch(&self) -> MboxResult<T> {
        self.0.fetch()
    }

    /// See [`Mailbox::fetch_marked`].
    pub fn fetch_marked(&self) -> MboxResult<Marked<T>> {
        self.0.fetch_marked()
    }

    /// See [`Mailbox::acknowledge`].
    pub fn acknowledge(&self, batch: &Marked<T>) {
        self.0.acknowledge(batch);
    }

    /// See [`Mailbox::subscribe`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.0.subscribe()
    }
}

/// Service-side view of a mailbox, handed to write handlers.
#[derive(Debug, Clone)]
pub struct Consumer<T: Structure>(Mailbox<T>);

impl<T: Structure> Consumer<T> {
    /// Record name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Mailbox::stage`].
    pub fn stage(&self, put: Put) -> MboxResult<WriteAck> {
        self.0.stage(put)
    }

    /// See [`Mailbox::is_marked`].
    #[must_use]
    pub fn is_marked(&self, path: &str, recursive: bool) -> bool {
        self.0.is_marked(path, recursive)
    }
}
