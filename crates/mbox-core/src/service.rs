//! In-process record service and its service thread.
//!
//! The [`Service`] is a name to record registry standing in for the network
//! runtime: it resolves external writes to the record's write handler and
//! hands out current values. [`Service::spawn`] moves request handling onto a
//! dedicated thread fed by a bounded queue, so writers on other threads get
//! the handler's result back over a one-shot reply channel.

use crate::mailbox::{Mailbox, WriteAck};
use crate::record::Structure;
use crate::value::{FieldSnapshot, Put};
use mbox_common::error::{MboxError, MboxResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Type-erased view of a registered record.
pub trait Record: Send + Sync {
    /// Record name.
    fn name(&self) -> &str;

    /// Route an external write to the record's handler.
    fn external_write(&self, put: Put) -> MboxResult<WriteAck>;

    /// Current value as `(path, value)` leaves.
    fn fetch_fields(&self) -> MboxResult<FieldSnapshot>;
}

impl<T: Structure> Record for Mailbox<T> {
    fn name(&self) -> &str {
        Mailbox::name(self)
    }

    fn external_write(&self, put: Put) -> MboxResult<WriteAck> {
        Mailbox::external_write(self, put)
    }

    fn fetch_fields(&self) -> MboxResult<FieldSnapshot> {
        self.snapshot()
    }
}

/// Name to record registry.
#[derive(Clone, Default)]
pub struct Service {
    records: Arc<Mutex<HashMap<String, Arc<dyn Record>>>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("records", &self.names())
            .finish()
    }
}

impl Service {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a record under its own name.
    ///
    /// # Errors
    ///
    /// [`MboxError::DuplicateRecord`] if the name is taken.
    pub fn register_record<R: Record + 'static>(&self, record: R) -> MboxResult<()> {
        let name = record.name().to_owned();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&name) {
            return Err(MboxError::DuplicateRecord(name));
        }
        info!(record = %name, "Record registered");
        records.insert(name, Arc::new(record));
        Ok(())
    }

    /// Registered record names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = records.keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> MboxResult<Arc<dyn Record>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MboxError::UnknownRecord(name.to_owned()))
    }

    /// Current value of a record.
    ///
    /// # Errors
    ///
    /// [`MboxError::UnknownRecord`] or the record's own fetch error.
    pub fn fetch_current(&self, name: &str) -> MboxResult<FieldSnapshot> {
        self.lookup(name)?.fetch_fields()
    }

    /// Deliver an external write on the calling thread.
    ///
    /// The registry lock is not held while the handler runs.
    ///
    /// # Errors
    ///
    /// [`MboxError::UnknownRecord`], or whatever the record's handler returns.
    pub fn put(&self, name: &str, put: Put) -> MboxResult<WriteAck> {
        let record = self.lookup(name)?;
        let result = record.external_write(put);
        if let Err(e) = &result {
            warn!(record = %name, error = %e, "External write rejected");
        }
        result
    }

    /// Start the service thread with a request queue of `queue` entries.
    ///
    /// # Errors
    ///
    /// [`MboxError::Config`] if the thread cannot be spawned.
    pub fn spawn(&self, queue: usize) -> MboxResult<ServiceThread> {
        let (requests_tx, mut requests_rx) = mpsc::channel::<ServiceRequest>(queue.max(1));
        let service = self.clone();
        let join = thread::Builder::new()
            .name("mbox-service".into())
            .spawn(move || {
                info!("Service thread started");
                while let Some(request) = requests_rx.blocking_recv() {
                    match request {
                        ServiceRequest::Write { record, put, reply } => {
                            debug!(record = %record, fields = put.fields().len(), "Write request");
                            let result = service.put(&record, put);
                            // The writer may have given up waiting.
                            let _ = reply.send(result);
                        }
                        ServiceRequest::Fetch { record, reply } => {
                            let _ = reply.send(service.fetch_current(&record));
                        }
                        ServiceRequest::Stop => break,
                    }
                }
                info!("Service thread stopped");
            })
            .map_err(|e| MboxError::Config(format!("failed to spawn service thread: {e}")))?;

        Ok(ServiceThread {
            handle: ServiceHandle { requests_tx },
            join: Some(join),
        })
    }
}

enum ServiceRequest {
    /// External write to a named record.
    Write {
        record: String,
        put: Put,
        reply: oneshot::Sender<MboxResult<WriteAck>>,
    },
    Fetch {
        record: String,
        reply: oneshot::Sender<MboxResult<FieldSnapshot>>,
    },
    Stop,
}

/// Cloneable sender side of the service thread.
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    requests_tx: mpsc::Sender<ServiceRequest>,
}

impl std::fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { record, .. } => write!(f, "Write({record})"),
            Self::Fetch { record, .. } => write!(f, "Fetch({record})"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

impl ServiceHandle {
    /// Write to a record through the service thread and wait for the acknowledgement.
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// [`MboxError::ServiceStopped`] if the thread is gone, otherwise the
    /// handler's result.
    pub fn put(&self, record: &str, put: Put) -> MboxResult<WriteAck> {
        let (reply, rx) = oneshot::channel();
        self.requests_tx
            .blocking_send(ServiceRequest::Write {
                record: record.to_owned(),
                put,
                reply,
            })
            .map_err(|_| MboxError::ServiceStopped)?;
        rx.blocking_recv().map_err(|_| MboxError::ServiceStopped)?
    }

    /// Fetch a record's current value through the service thread.
    ///
    /// # Errors
    ///
    /// [`MboxError::ServiceStopped`] if the thread is gone, otherwise the fetch result.
    pub fn fetch(&self, record: &str) -> MboxResult<FieldSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.requests_tx
            .blocking_send(ServiceRequest::Fetch {
                record: record.to_owned(),
                reply,
            })
            .map_err(|_| MboxError::ServiceStopped)?;
        rx.blocking_recv().map_err(|_| MboxError::ServiceStopped)?
    }
}

/// A running service thread.
#[derive(Debug)]
pub struct ServiceThread {
    handle: ServiceHandle,
    join: Option<JoinHandle<()>>,
}

impl ServiceThread {
    /// A sender for requests. Cloneable across writer threads.
    #[must_use]
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Ask the thread to stop after the requests already queued, and join it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        // A closed queue means the thread already exited.
        let _ = self.handle.requests_tx.blocking_send(ServiceRequest::Stop);
        if join.join().is_err() {
            warn!("Service thread panicked");
        }
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
