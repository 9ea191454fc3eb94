use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{
        clamp_progress, BookMetadata, Bookmark, BookmarkKind, CommandId, Locator,
        ReadingPosition, ScrollMode, Theme,
    },
    error::ReaderError,
    protocol::{
        BookLifecycle, BookmarkEvent, ErrorEvent, InputEvent, ReaderCommand, ReaderEvent,
    },
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    bridge::{
        BridgeError, ChapterEdge, NavigationTarget, PositionReport, RenderingBridge,
        RenderingSurface, ScriptOperation, ScriptValue, SurfaceCallbacks, SurfaceNotification,
        SwipeDirection, TapRegion,
    },
    config::EngineSettings,
    dispatch::Dispatcher,
    event_bus::{EventBus, EventSubscription},
    executor::{self, CommandHandler, CommandSubmitter, LongRunningCommand, SerialExecutor},
};

struct Snapshots {
    position: watch::Sender<Option<ReadingPosition>>,
    theme: watch::Sender<Theme>,
    bookmarks: watch::Sender<Arc<Vec<Bookmark>>>,
    scroll_mode: watch::Sender<ScrollMode>,
}

#[derive(Clone)]
struct SnapshotReaders {
    position: watch::Receiver<Option<ReadingPosition>>,
    theme: watch::Receiver<Theme>,
    bookmarks: watch::Receiver<Arc<Vec<Bookmark>>>,
    scroll_mode: watch::Receiver<ScrollMode>,
}

fn snapshots(theme: Theme, scroll_mode: ScrollMode) -> (Snapshots, SnapshotReaders) {
    let (position, position_rx) = watch::channel(None);
    let (theme, theme_rx) = watch::channel(theme);
    let (bookmarks, bookmarks_rx) = watch::channel(Arc::new(Vec::new()));
    let (scroll_mode, scroll_mode_rx) = watch::channel(scroll_mode);
    (
        Snapshots {
            position,
            theme,
            bookmarks,
            scroll_mode,
        },
        SnapshotReaders {
            position: position_rx,
            theme: theme_rx,
            bookmarks: bookmarks_rx,
            scroll_mode: scroll_mode_rx,
        },
    )
}

pub struct ReaderController {
    book: Arc<BookMetadata>,
    bus: Arc<EventBus>,
    bridge: Arc<RenderingBridge>,
    executor: SerialExecutor<SurfaceNotification>,
    snapshots: SnapshotReaders,
    closed: AtomicBool,
}

impl ReaderController {
    pub fn open(
        book: BookMetadata,
        initial_theme: Theme,
        dispatcher: Arc<dyn Dispatcher>,
        settings: &EngineSettings,
    ) -> anyhow::Result<Self> {
        let settings = settings.clone().normalized();
        let book = Arc::new(book);
        let bus = Arc::new(EventBus::new(settings.event_capacity));
        let (submitter, queue) = executor::queue::<SurfaceNotification>();

        let inbound = submitter.clone();
        let bridge = Arc::new(RenderingBridge::new(
            dispatcher,
            SurfaceCallbacks::new(move |notification| inbound.notify(notification)),
        ));

        let theme = initial_theme.with_text_size_clamped(settings.text_size_min, settings.text_size_max);
        let (published, readers) = snapshots(theme.clone(), settings.scroll_mode);
        let state = ControllerState {
            book: Arc::clone(&book),
            bridge: Arc::clone(&bridge),
            bus: Arc::clone(&bus),
            submitter: submitter.clone(),
            published,
            position: None,
            chapter_index: None,
            theme,
            scroll_mode: settings.scroll_mode,
            bookmarks: Vec::new(),
            text_size_range: (settings.text_size_min, settings.text_size_max),
        };

        let executor = SerialExecutor::start(
            queue,
            submitter,
            state,
            Arc::clone(&bus),
            settings.executor_options(),
        )
        .with_context(|| format!("failed to start command worker for book '{}'", book.id))?;

        bus.publish_book(BookLifecycle::Opened(Arc::clone(&book)));
        info!(book_id = %book.id, chapters = book.chapter_count(), "book opened");

        Ok(Self {
            book,
            bus,
            bridge,
            executor,
            snapshots: readers,
            closed: AtomicBool::new(false),
        })
    }

    pub fn book(&self) -> &Arc<BookMetadata> {
        &self.book
    }

    pub fn submit(&self, command: ReaderCommand) -> CommandId {
        self.executor.submit(command)
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    pub fn book_lifecycle(&self) -> watch::Receiver<Option<BookLifecycle>> {
        self.bus.book_lifecycle()
    }

    pub fn position_now(&self) -> Option<ReadingPosition> {
        self.snapshots.position.borrow().clone()
    }

    pub fn theme_now(&self) -> Theme {
        self.snapshots.theme.borrow().clone()
    }

    pub fn bookmarks_now(&self) -> Vec<Bookmark> {
        self.snapshots.bookmarks.borrow().as_ref().clone()
    }

    pub fn scroll_mode_now(&self) -> ScrollMode {
        *self.snapshots.scroll_mode.borrow()
    }

    pub fn long_running_command_now(&self) -> Option<LongRunningCommand> {
        self.executor.long_running_now()
    }

    /// Attaches the rendering surface. Submit [`ReaderCommand::Refresh`] afterwards to
    /// bring it in line with the current state.
    pub fn attach_surface(&self, surface: Box<dyn RenderingSurface>) {
        self.bridge.attach(surface);
    }

    pub fn detach_surface(&self) -> bool {
        self.bridge.detach()
    }

    pub fn is_surface_attached(&self) -> bool {
        self.bridge.is_attached()
    }

    pub fn surface_callbacks(&self) -> SurfaceCallbacks {
        self.bridge.callbacks()
    }

    pub async fn close(&self) {
        // Stop first so the command failed by the detach is the last one to run.
        self.executor.stop();
        self.bridge.detach();
        self.executor.shutdown().await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.publish_book(BookLifecycle::Closed);
            info!(book_id = %self.book.id, "book closed");
        }
    }
}

impl Drop for ReaderController {
    fn drop(&mut self) {
        self.bridge.detach();
        self.executor.stop();
    }
}

struct ControllerState {
    book: Arc<BookMetadata>,
    bridge: Arc<RenderingBridge>,
    bus: Arc<EventBus>,
    submitter: CommandSubmitter<SurfaceNotification>,
    published: Snapshots,
    position: Option<ReadingPosition>,
    chapter_index: Option<usize>,
    theme: Theme,
    scroll_mode: ScrollMode,
    bookmarks: Vec<Bookmark>,
    text_size_range: (f64, f64),
}

#[async_trait]
impl CommandHandler for ControllerState {
    type Notification = SurfaceNotification;

    async fn handle(&mut self, _id: CommandId, command: &ReaderCommand) -> Result<(), ReaderError> {
        match command {
            ReaderCommand::OpenChapter(locator) => self.open_chapter(locator).await,
            ReaderCommand::OpenPageNext => self.turn_page(ScriptOperation::OpenPageNext).await,
            ReaderCommand::OpenPagePrevious => {
                self.turn_page(ScriptOperation::OpenPagePrevious).await
            }
            ReaderCommand::Refresh => self.refresh().await,
            ReaderCommand::BookmarkCreate => {
                self.create_bookmark();
                Ok(())
            }
            ReaderCommand::BookmarkDelete(bookmark) => {
                self.delete_bookmark(bookmark);
                Ok(())
            }
            ReaderCommand::BookmarksLoad(bookmarks) => {
                self.load_bookmarks(bookmarks);
                Ok(())
            }
            ReaderCommand::ThemeSet(theme) => self.set_theme(theme).await,
            ReaderCommand::ScrollModeSet(mode) => self.set_scroll_mode(*mode).await,
        }
    }

    async fn notify(&mut self, notification: SurfaceNotification) {
        match notification {
            SurfaceNotification::PositionReport(report) => {
                let Some(index) = self.chapter_index else {
                    debug!("position report before any chapter was opened");
                    return;
                };
                if let Err(err) = self.update_position(index, report) {
                    warn!(%err, "discarding position report");
                }
            }
            SurfaceNotification::Tapped(TapRegion::Center) => {
                self.publish(ReaderEvent::Input(InputEvent::CenterTapped));
            }
            SurfaceNotification::Tapped(TapRegion::Left)
            | SurfaceNotification::Swiped(SwipeDirection::Right) => {
                if self.scroll_mode == ScrollMode::Paginated {
                    self.submitter.submit(ReaderCommand::OpenPagePrevious);
                }
            }
            SurfaceNotification::Tapped(TapRegion::Right)
            | SurfaceNotification::Swiped(SwipeDirection::Left) => {
                if self.scroll_mode == ScrollMode::Paginated {
                    self.submitter.submit(ReaderCommand::OpenPageNext);
                }
            }
            SurfaceNotification::ScriptError { message } => {
                warn!(%message, "rendering surface reported a script error");
            }
            SurfaceNotification::LinkSelected(href) => {
                if !is_external_link(&href) && self.book.chapter_index_of(&href).is_some() {
                    self.submitter
                        .submit(ReaderCommand::OpenChapter(Locator::href(href, 0.0)));
                } else {
                    self.publish(ReaderEvent::Input(InputEvent::ExternalLinkSelected(href)));
                }
            }
        }
    }
}

fn is_external_link(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

impl ControllerState {
    fn publish(&self, event: ReaderEvent) {
        self.bus.publish(event);
    }

    async fn call(&self, operation: ScriptOperation) -> Result<ScriptValue, ReaderError> {
        match self.bridge.execute(operation).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let error = ReaderError::from(err);
                if let ReaderError::WebViewInaccessible(message) = &error {
                    self.publish(ReaderEvent::Error(ErrorEvent::WebViewInaccessible {
                        message: message.clone(),
                    }));
                }
                Err(error)
            }
        }
    }

    async fn open_chapter(&mut self, locator: &Locator) -> Result<(), ReaderError> {
        let Some(chapter) = self.book.resolve(locator) else {
            let message = match locator {
                Locator::Href { chapter_href, .. } => {
                    format!("no chapter with href '{chapter_href}' in the table of contents")
                }
                Locator::Index { chapter_index, .. } => format!(
                    "no chapter at index {chapter_index}; the book has {}",
                    self.book.chapter_count()
                ),
            };
            self.publish(ReaderEvent::Error(ErrorEvent::ChapterNonexistent {
                locator: locator.clone(),
                message: message.clone(),
            }));
            return Err(ReaderError::ChapterNonexistent {
                locator: locator.clone(),
                message,
            });
        };

        let index = chapter.index;
        let href = chapter.entry.href.clone();
        self.show_chapter(index, href, locator.chapter_progress()).await
    }

    async fn show_chapter(
        &mut self,
        index: usize,
        href: String,
        progress: f64,
    ) -> Result<(), ReaderError> {
        let progress = clamp_progress(progress);
        let operation = if self.chapter_index == Some(index) {
            ScriptOperation::SetProgression(progress)
        } else {
            ScriptOperation::Navigate(NavigationTarget {
                chapter_href: href,
                chapter_progress: progress,
            })
        };
        let report = match self.call(operation).await? {
            ScriptValue::Position(report) => report,
            _ => PositionReport {
                chapter_progress: progress,
                current_page: None,
                page_count: None,
            },
        };
        self.update_position(index, report)
    }

    async fn turn_page(&mut self, operation: ScriptOperation) -> Result<(), ReaderError> {
        let name = operation.name();
        let reply = self.call(operation).await?;
        let Some(index) = self.chapter_index else {
            debug!(operation = name, "page turn before any chapter was opened");
            return Ok(());
        };

        match reply {
            ScriptValue::Position(report) => self.update_position(index, report),
            ScriptValue::ChapterEdge(ChapterEdge::End) => {
                match self.book.chapter_at(index + 1) {
                    Some(next) => {
                        let href = next.entry.href.clone();
                        self.show_chapter(index + 1, href, 0.0).await
                    }
                    None => {
                        debug!("already at the end of the book");
                        Ok(())
                    }
                }
            }
            ScriptValue::ChapterEdge(ChapterEdge::Start) => {
                match index.checked_sub(1).and_then(|i| self.book.chapter_at(i)) {
                    Some(previous) => {
                        let (target, href) = (previous.index, previous.entry.href.clone());
                        self.show_chapter(target, href, 1.0).await
                    }
                    None => {
                        debug!("already at the start of the book");
                        Ok(())
                    }
                }
            }
            reply => Err(ReaderError::from(BridgeError::UnexpectedReply {
                operation: name,
                reply,
            })),
        }
    }

    async fn refresh(&mut self) -> Result<(), ReaderError> {
        if !self.bridge.is_attached() {
            debug!("refresh skipped: no rendering surface attached");
            return Ok(());
        }

        self.call(ScriptOperation::SetScrollMode(self.scroll_mode))
            .await?;
        self.call(ScriptOperation::SetTheme(self.theme.clone()))
            .await?;

        let Some((index, position)) = self.chapter_index.zip(self.position.clone()) else {
            return Ok(());
        };
        // The surface may have been replaced, so reload the chapter instead of only seeking.
        let report = match self
            .call(ScriptOperation::Navigate(NavigationTarget {
                chapter_href: position.chapter_href().to_string(),
                chapter_progress: position.chapter_progress(),
            }))
            .await?
        {
            ScriptValue::Position(report) => report,
            _ => PositionReport {
                chapter_progress: position.chapter_progress(),
                current_page: None,
                page_count: None,
            },
        };
        self.update_position(index, report)
    }

    fn update_position(&mut self, index: usize, report: PositionReport) -> Result<(), ReaderError> {
        let chapter = self.book.chapter_at(index).ok_or_else(|| {
            ReaderError::execution_failed(format!("chapter index {index} left the table of contents"))
        })?;
        let progress = clamp_progress(report.chapter_progress);
        let (current_page, page_count) = match self.scroll_mode {
            ScrollMode::Paginated => (report.current_page, report.page_count),
            ScrollMode::Scrolling => (None, None),
        };
        let title = Some(chapter.entry.title.clone()).filter(|title| !title.is_empty());
        let position = ReadingPosition::new(
            chapter.entry.href.clone(),
            progress,
            title,
            current_page,
            page_count,
            self.book.book_progress(index, progress),
        )?;

        self.chapter_index = Some(index);
        self.position = Some(position.clone());
        self.track_last_read(&position);
        self.published.position.send_replace(Some(position.clone()));
        self.publish(ReaderEvent::ReadingPositionChanged(position));
        Ok(())
    }

    /// Keeps the single last-read bookmark in step with the position. Not announced as an
    /// event: hosts persist it from `ReadingPositionChanged`.
    fn track_last_read(&mut self, position: &ReadingPosition) {
        self.bookmarks
            .retain(|bookmark| bookmark.kind != BookmarkKind::LastRead);
        self.bookmarks
            .push(Bookmark::at_position(BookmarkKind::LastRead, position, Utc::now()));
        self.publish_bookmarks();
    }

    fn publish_bookmarks(&self) {
        self.published
            .bookmarks
            .send_replace(Arc::new(self.bookmarks.clone()));
    }

    fn create_bookmark(&mut self) {
        let now = Utc::now();
        let bookmark = match &self.position {
            Some(position) => Bookmark::at_position(BookmarkKind::Explicit, position, now),
            None => Bookmark::new(
                BookmarkKind::Explicit,
                self.book.start_locator.clone(),
                now,
            ),
        };

        if self
            .bookmarks
            .iter()
            .any(|existing| existing.same_place(&bookmark))
        {
            debug!("bookmark already exists at this position");
            return;
        }

        self.bookmarks.push(bookmark.clone());
        self.publish_bookmarks();
        self.publish(ReaderEvent::Bookmark(BookmarkEvent::Created(bookmark)));
    }

    fn delete_bookmark(&mut self, bookmark: &Bookmark) {
        let Some(index) = self
            .bookmarks
            .iter()
            .position(|existing| existing.same_place(bookmark))
        else {
            debug!("bookmark to delete is not present");
            return;
        };

        let removed = self.bookmarks.remove(index);
        self.publish_bookmarks();
        self.publish(ReaderEvent::Bookmark(BookmarkEvent::Deleted(removed)));
    }

    fn load_bookmarks(&mut self, bookmarks: &[Bookmark]) {
        self.bookmarks = normalize_bookmarks(bookmarks);
        self.publish_bookmarks();
        self.publish(ReaderEvent::Bookmark(BookmarkEvent::Loaded(
            self.bookmarks.clone(),
        )));
    }

    async fn set_theme(&mut self, theme: &Theme) -> Result<(), ReaderError> {
        let (min, max) = self.text_size_range;
        let theme = theme.clone().with_text_size_clamped(min, max);
        self.theme = theme.clone();
        self.published.theme.send_replace(theme.clone());
        self.publish(ReaderEvent::ThemeChanged(theme.clone()));

        if !self.bridge.is_attached() {
            debug!("theme stored; restyle deferred until a surface is attached");
            return Ok(());
        }
        // A failed restyle keeps the new theme; the next refresh reapplies it.
        self.call(ScriptOperation::SetTheme(theme)).await.map(|_| ())
    }

    async fn set_scroll_mode(&mut self, mode: ScrollMode) -> Result<(), ReaderError> {
        self.scroll_mode = mode;
        self.published.scroll_mode.send_replace(mode);
        if !self.bridge.is_attached() {
            return Ok(());
        }
        self.call(ScriptOperation::SetScrollMode(mode))
            .await
            .map(|_| ())
    }
}

fn normalize_bookmarks(bookmarks: &[Bookmark]) -> Vec<Bookmark> {
    let mut normalized: Vec<Bookmark> = Vec::with_capacity(bookmarks.len());
    let mut last_read: Option<&Bookmark> = None;
    for bookmark in bookmarks {
        match bookmark.kind {
            BookmarkKind::LastRead => {
                if last_read.map_or(true, |current| bookmark.created_at >= current.created_at) {
                    last_read = Some(bookmark);
                }
            }
            BookmarkKind::Explicit => {
                if !normalized.iter().any(|existing| existing.same_place(bookmark)) {
                    normalized.push(bookmark.clone());
                }
            }
        }
    }
    normalized.extend(last_read.cloned());
    normalized
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
