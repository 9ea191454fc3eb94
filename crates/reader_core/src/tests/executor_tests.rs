use super::*;
use std::sync::{atomic::AtomicUsize, Mutex};

use crate::event_bus::EventSubscription;
use shared::domain::{Bookmark, BookmarkKind, Locator, Theme};

struct RecordingHandler {
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingHandler {
    fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        (
            Self {
                log: Arc::clone(&log),
                delay,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::clone(&max_in_flight),
            },
            log,
            max_in_flight,
        )
    }
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    type Notification = String;

    async fn handle(&mut self, id: CommandId, command: &ReaderCommand) -> Result<(), ReaderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log
            .lock()
            .expect("log")
            .push(format!("start {}", id.0));

        match command {
            ReaderCommand::Refresh => tokio::time::sleep(self.delay).await,
            ReaderCommand::BookmarkCreate => panic!("boom"),
            ReaderCommand::BookmarkDelete(_) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(ReaderError::execution_failed("store unavailable"));
            }
            _ => tokio::task::yield_now().await,
        }

        self.log.lock().expect("log").push(format!("end {}", id.0));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify(&mut self, notification: String) {
        self.log
            .lock()
            .expect("log")
            .push(format!("notify {notification}"));
    }
}

fn start_executor(
    handler: RecordingHandler,
    threshold: Duration,
) -> (SerialExecutor<String>, EventSubscription) {
    let bus = Arc::new(EventBus::new(256));
    let subscription = bus.subscribe();
    let (submitter, queue) = queue();
    let executor = SerialExecutor::start(
        queue,
        submitter,
        handler,
        bus,
        ExecutorOptions {
            thread_name: "test-commands".into(),
            long_running_threshold: threshold,
        },
    )
    .expect("start executor");
    (executor, subscription)
}

async fn next_command_event(subscription: &mut EventSubscription) -> CommandEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("event before timeout")
            .expect("bus open");
        if let ReaderEvent::Command(event) = event {
            return event;
        }
    }
}

fn sample_bookmark() -> Bookmark {
    Bookmark::new(
        BookmarkKind::Explicit,
        Locator::href("ch1.xhtml", 0.0),
        chrono::Utc::now(),
    )
}

#[tokio::test]
async fn commands_start_in_submission_order_and_never_overlap() {
    let (handler, _log, max_in_flight) = RecordingHandler::new(Duration::from_millis(2));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let ids: Vec<CommandId> = (0..12)
        .map(|i| {
            if i % 3 == 0 {
                executor.submit(ReaderCommand::Refresh)
            } else {
                executor.submit(ReaderCommand::ThemeSet(Theme::default()))
            }
        })
        .collect();

    let mut started = Vec::new();
    let mut in_flight: Option<CommandId> = None;
    while started.len() < ids.len() || in_flight.is_some() {
        let event = next_command_event(&mut subscription).await;
        match &event {
            CommandEvent::Started { id, .. } => {
                assert!(in_flight.is_none(), "{id:?} started before previous finished");
                in_flight = Some(*id);
                started.push(*id);
            }
            CommandEvent::Succeeded { id, .. } | CommandEvent::Failed { id, .. } => {
                assert_eq!(in_flight.take(), Some(*id));
            }
            CommandEvent::RunningLong { .. } => panic!("threshold is generous"),
        }
    }

    assert_eq!(started, ids);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    executor.shutdown().await;
}

#[tokio::test]
async fn submit_is_callable_from_any_thread() {
    let (handler, _log, _) = RecordingHandler::new(Duration::from_millis(1));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let submitter = executor.submitter();
            std::thread::spawn(move || {
                (0..5)
                    .map(|_| submitter.submit(ReaderCommand::OpenPageNext))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids: Vec<CommandId> = submitters
        .into_iter()
        .flat_map(|handle| handle.join().expect("submitter thread"))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);

    let mut succeeded = 0;
    while succeeded < 20 {
        if let CommandEvent::Succeeded { .. } = next_command_event(&mut subscription).await {
            succeeded += 1;
        }
    }
    executor.shutdown().await;
}

#[tokio::test]
async fn running_long_is_advisory_and_published_once() {
    let (handler, _log, _) = RecordingHandler::new(Duration::from_millis(150));
    let (executor, mut subscription) = start_executor(handler, Duration::from_millis(20));

    let id = executor.submit(ReaderCommand::Refresh);
    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Started { id: started, .. } if started == id
    ));
    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::RunningLong { id: long, .. } if long == id
    ));
    let flagged = executor.long_running_now().expect("flagged while running");
    assert_eq!(flagged.id, id);
    assert_eq!(flagged.command, ReaderCommand::Refresh);

    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Succeeded { id: done, .. } if done == id
    ));
    assert!(executor.long_running_now().is_none());
    executor.shutdown().await;
}

#[tokio::test]
async fn handler_panic_fails_the_command_and_the_worker_survives() {
    let (handler, _log, _) = RecordingHandler::new(Duration::from_millis(1));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let panicking = executor.submit(ReaderCommand::BookmarkCreate);
    let healthy = executor.submit(ReaderCommand::OpenPagePrevious);

    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Started { id, .. } if id == panicking
    ));
    match next_command_event(&mut subscription).await {
        CommandEvent::Failed { id, error, .. } => {
            assert_eq!(id, panicking);
            assert_eq!(error, ReaderError::CommandExecutionFailed("boom".into()));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Started { id, .. } if id == healthy
    ));
    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Succeeded { id, .. } if id == healthy
    ));
    executor.shutdown().await;
}

#[tokio::test]
async fn handler_errors_are_reported_as_failed() {
    let (handler, _log, _) = RecordingHandler::new(Duration::from_millis(1));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let bookmark = sample_bookmark();
    let id = executor.submit(ReaderCommand::BookmarkDelete(bookmark.clone()));
    let _started = next_command_event(&mut subscription).await;
    assert_eq!(
        next_command_event(&mut subscription).await,
        CommandEvent::Failed {
            id,
            command: ReaderCommand::BookmarkDelete(bookmark),
            error: ReaderError::execution_failed("store unavailable"),
        }
    );
    executor.shutdown().await;
}

#[tokio::test]
async fn notifications_run_in_queue_order_between_commands() {
    let (handler, log, _) = RecordingHandler::new(Duration::from_millis(10));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let first = executor.submit(ReaderCommand::Refresh);
    executor.submitter().notify("tap".to_string());
    let second = executor.submit(ReaderCommand::OpenPageNext);

    loop {
        if let CommandEvent::Succeeded { id, .. } = next_command_event(&mut subscription).await {
            if id == second {
                break;
            }
        }
    }
    assert_eq!(
        *log.lock().expect("log"),
        vec![
            format!("start {}", first.0),
            format!("end {}", first.0),
            "notify tap".to_string(),
            format!("start {}", second.0),
            format!("end {}", second.0),
        ]
    );
    executor.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_command_and_discards_the_queue() {
    let (handler, log, _) = RecordingHandler::new(Duration::from_millis(80));
    let (executor, mut subscription) = start_executor(handler, Duration::from_secs(5));

    let running = executor.submit(ReaderCommand::Refresh);
    let queued = executor.submit(ReaderCommand::OpenPageNext);
    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Started { id, .. } if id == running
    ));

    executor.shutdown().await;
    executor.shutdown().await;
    assert!(executor.is_stopped());

    assert!(matches!(
        next_command_event(&mut subscription).await,
        CommandEvent::Succeeded { id, .. } if id == running
    ));
    assert!(subscription.try_recv().is_none());
    assert!(!log
        .lock()
        .expect("log")
        .contains(&format!("start {}", queued.0)));

    // Submitting after shutdown is harmless.
    executor.submit(ReaderCommand::Refresh);
}
