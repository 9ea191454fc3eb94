//! Single-worker command queue: strict FIFO, exactly one job in flight.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::FutureExt;
use shared::{
    domain::CommandId,
    error::ReaderError,
    protocol::{CommandEvent, ReaderCommand, ReaderEvent},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

use crate::event_bus::EventBus;

/// Interprets commands on the worker. Implementations may hold non-`Sync` state: they are
/// only ever touched by the single worker thread.
#[async_trait]
pub trait CommandHandler: Send + 'static {
    type Notification: Send + 'static;

    async fn handle(&mut self, id: CommandId, command: &ReaderCommand) -> Result<(), ReaderError>;

    /// Inbound notifications share the command queue but produce no lifecycle events.
    async fn notify(&mut self, notification: Self::Notification);
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongRunningCommand {
    pub id: CommandId,
    pub command: ReaderCommand,
    pub started_at: Instant,
}

enum Job<N> {
    Command { id: CommandId, command: ReaderCommand },
    Notification(N),
    Stop,
}

pub struct CommandSubmitter<N> {
    tx: mpsc::UnboundedSender<Job<N>>,
    next_id: Arc<AtomicU64>,
}

impl<N> Clone for CommandSubmitter<N> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<N: Send + 'static> CommandSubmitter<N> {
    pub fn submit(&self, command: ReaderCommand) -> CommandId {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = command.name();
        match self.tx.send(Job::Command { id, command }) {
            Ok(()) => debug!(command_id = id.0, command = name, "queued command"),
            Err(_) => debug!(
                command_id = id.0,
                command = name,
                "command queue closed; dropping command"
            ),
        }
        id
    }

    pub fn notify(&self, notification: N) {
        if self.tx.send(Job::Notification(notification)).is_err() {
            debug!("command queue closed; dropping notification");
        }
    }
}

pub struct JobQueue<N> {
    rx: mpsc::UnboundedReceiver<Job<N>>,
}

pub fn queue<N: Send + 'static>() -> (CommandSubmitter<N>, JobQueue<N>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CommandSubmitter {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        JobQueue { rx },
    )
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub thread_name: String,
    pub long_running_threshold: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            thread_name: "reader-commands".into(),
            long_running_threshold: Duration::from_millis(1000),
        }
    }
}

pub struct SerialExecutor<N> {
    submitter: CommandSubmitter<N>,
    stopping: Arc<AtomicBool>,
    stopped: watch::Receiver<bool>,
    long_running: watch::Receiver<Option<LongRunningCommand>>,
}

impl<N: Send + 'static> SerialExecutor<N> {
    pub fn start<H>(
        queue: JobQueue<N>,
        submitter: CommandSubmitter<N>,
        handler: H,
        bus: Arc<EventBus>,
        options: ExecutorOptions,
    ) -> std::io::Result<Self>
    where
        H: CommandHandler<Notification = N>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let stopping = Arc::new(AtomicBool::new(false));
        let (stopped_tx, stopped) = watch::channel(false);
        let (long_running_tx, long_running) = watch::channel(None);

        let worker = Worker {
            handler,
            bus,
            long_running: long_running_tx,
            stopping: Arc::clone(&stopping),
            threshold: options.long_running_threshold,
        };
        thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || {
                runtime.block_on(worker.run(queue.rx));
                stopped_tx.send_replace(true);
            })?;
        info!(thread = %options.thread_name, "command worker started");

        Ok(Self {
            submitter,
            stopping,
            stopped,
            long_running,
        })
    }

    pub fn submit(&self, command: ReaderCommand) -> CommandId {
        self.submitter.submit(command)
    }

    pub fn submitter(&self) -> CommandSubmitter<N> {
        self.submitter.clone()
    }

    pub fn long_running_now(&self) -> Option<LongRunningCommand> {
        self.long_running.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("command worker stopping");
        }
        let _ = self.submitter.tx.send(Job::Stop);
    }

    /// Stops the worker and waits until it has exited. Idempotent. Must not be awaited from
    /// inside a command handler.
    pub async fn shutdown(&self) {
        self.stop();
        let mut stopped = self.stopped.clone();
        // An Err means the worker thread is already gone.
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

impl<N> Drop for SerialExecutor<N> {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.submitter.tx.send(Job::Stop);
    }
}

struct Worker<H> {
    handler: H,
    bus: Arc<EventBus>,
    long_running: watch::Sender<Option<LongRunningCommand>>,
    stopping: Arc<AtomicBool>,
    threshold: Duration,
}

impl<H: CommandHandler> Worker<H> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job<H::Notification>>) {
        while let Some(job) = rx.recv().await {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            match job {
                Job::Command { id, command } => self.run_command(id, command).await,
                Job::Notification(notification) => {
                    let outcome = AssertUnwindSafe(self.handler.notify(notification))
                        .catch_unwind()
                        .await;
                    if let Err(panic) = outcome {
                        error!(
                            panic = %panic_message(panic.as_ref()),
                            "notification handler panicked"
                        );
                    }
                }
                Job::Stop => break,
            }
        }

        rx.close();
        let mut discarded = 0usize;
        while let Ok(job) = rx.try_recv() {
            if matches!(job, Job::Command { .. }) {
                discarded += 1;
            }
        }
        info!(discarded, "command worker stopped");
    }

    async fn run_command(&mut self, id: CommandId, command: ReaderCommand) {
        let span = tracing::info_span!("command", command_id = id.0, command = command.name());
        self.bus.publish(ReaderEvent::Command(CommandEvent::Started {
            id,
            command: command.clone(),
        }));

        let started_at = Instant::now();
        let mut flagged = false;
        // The handler future borrows `command`; it must be gone before the terminal event
        // takes ownership.
        let outcome = {
            let handled = AssertUnwindSafe(self.handler.handle(id, &command))
                .catch_unwind()
                .instrument(span.clone());
            tokio::pin!(handled);
            let deadline = tokio::time::sleep(self.threshold);
            tokio::pin!(deadline);

            let outcome = tokio::select! {
                biased;
                outcome = &mut handled => outcome,
                _ = &mut deadline => {
                    flagged = true;
                    span.in_scope(|| warn!(threshold_ms = self.threshold.as_millis() as u64, "command running long"));
                    self.long_running.send_replace(Some(LongRunningCommand {
                        id,
                        command: command.clone(),
                        started_at,
                    }));
                    self.bus.publish(ReaderEvent::Command(CommandEvent::RunningLong {
                        id,
                        command: command.clone(),
                    }));
                    handled.await
                }
            };
            outcome
        };
        if flagged {
            self.long_running.send_replace(None);
        }

        let terminal = match outcome {
            Ok(Ok(())) => {
                span.in_scope(|| debug!("command succeeded"));
                CommandEvent::Succeeded { id, command }
            }
            Ok(Err(error)) => {
                span.in_scope(|| warn!(code = error.code().as_str(), %error, "command failed"));
                CommandEvent::Failed { id, command, error }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                span.in_scope(|| error!(panic = %message, "command handler panicked"));
                CommandEvent::Failed {
                    id,
                    command,
                    error: ReaderError::CommandExecutionFailed(message),
                }
            }
        };
        self.bus.publish(ReaderEvent::Command(terminal));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "command handler panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
