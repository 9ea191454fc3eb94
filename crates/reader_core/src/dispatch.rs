//! Interaction-context dispatch: runs jobs on the single thread that owns the rendering surface.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("interaction context has been disposed")]
    Disposed,
}

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;

    fn is_current(&self) -> bool;
}

/// Disposing drops every job that has not started yet and rejects new ones, so
/// anything waiting on a dropped job observes the drop instead of hanging.
pub struct InteractionThread {
    tx: Mutex<Option<Sender<Job>>>,
    disposed: Arc<AtomicBool>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InteractionThread {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Arc<Self>> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let disposed = Arc::new(AtomicBool::new(false));
        let worker_disposed = Arc::clone(&disposed);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_jobs(rx, worker_disposed))?;
        let thread_id = handle.thread().id();
        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            disposed,
            thread_id,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Stops the thread. Idempotent; waits for a job that is currently running, unless
    /// called from the interaction thread itself.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(handle) = handle {
            if thread::current().id() == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("interaction thread panicked");
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

fn run_jobs(rx: Receiver<Job>, disposed: Arc<AtomicBool>) {
    tracing::debug!("interaction thread started");
    while let Ok(job) = rx.recv() {
        if disposed.load(Ordering::SeqCst) {
            // Dropping the remaining jobs releases whatever they captured.
            drop(job);
            continue;
        }
        job();
    }
    tracing::debug!("interaction thread stopped");
}

impl Dispatcher for InteractionThread {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        if self.is_disposed() {
            return Err(DispatchError::Disposed);
        }
        let guard = self.tx.lock().map_err(|_| DispatchError::Disposed)?;
        let tx = guard.as_ref().ok_or(DispatchError::Disposed)?;
        tx.send(job).map_err(|_| DispatchError::Disposed)
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for InteractionThread {
    fn drop(&mut self) {
        self.dispose();
    }
}
