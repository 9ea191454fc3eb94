//! Test doubles shared by the engine tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use shared::domain::{BookMetadata, Locator, ScrollMode, Theme, TocEntry};

use crate::bridge::{
    ChapterEdge, NavigationTarget, PositionReport, RenderingSurface, ScriptCompletion,
    ScriptValue, SurfaceCallbacks,
};

pub(crate) fn test_book(chapters: usize) -> BookMetadata {
    BookMetadata {
        id: "urn:isbn:9780000000000".into(),
        title: "Test Book".into(),
        start_locator: Locator::href("ch1.xhtml", 0.0),
        table_of_contents: (1..=chapters)
            .map(|i| TocEntry {
                title: format!("Chapter {i}"),
                href: format!("ch{i}.xhtml"),
            })
            .collect(),
    }
}

#[derive(Default)]
pub(crate) struct SurfaceLog {
    pub calls: Vec<String>,
    pub threads: Vec<Option<String>>,
    pub held: Vec<ScriptCompletion>,
    pub callbacks: Option<SurfaceCallbacks>,
    pub themes: Vec<Theme>,
    /// `("bind" | "drop", thread name)` in the order they happened.
    pub lifecycle: Vec<(&'static str, Option<String>)>,
}

fn current_thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_owned)
}

/// A paginated in-memory surface. Replies synchronously unless `hold_calls` is set,
/// in which case completions are parked in the shared log.
pub(crate) struct FakeSurface {
    pub log: Arc<Mutex<SurfaceLog>>,
    pub hold_calls: bool,
    pub fail_theme: bool,
    pub pages_per_chapter: u32,
    current_page: u32,
    mode: ScrollMode,
}

impl FakeSurface {
    pub fn new() -> (Self, Arc<Mutex<SurfaceLog>>) {
        let log = Arc::new(Mutex::new(SurfaceLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                hold_calls: false,
                fail_theme: false,
                pages_per_chapter: 4,
                current_page: 1,
                mode: ScrollMode::Paginated,
            },
            log,
        )
    }

    pub fn holding() -> (Self, Arc<Mutex<SurfaceLog>>) {
        let (mut surface, log) = Self::new();
        surface.hold_calls = true;
        (surface, log)
    }

    fn record(&self, call: String) {
        let mut log = self.log.lock().expect("surface log");
        log.calls.push(call);
        log.threads.push(current_thread_name());
    }

    fn reply(&self, completion: ScriptCompletion, value: ScriptValue) {
        if self.hold_calls {
            self.log.lock().expect("surface log").held.push(completion);
        } else {
            completion.succeed(value);
        }
    }

    fn report(&self) -> PositionReport {
        let pages = self.pages_per_chapter.max(1);
        let progress = f64::from(self.current_page - 1) / f64::from(pages);
        match self.mode {
            ScrollMode::Paginated => PositionReport {
                chapter_progress: progress,
                current_page: Some(self.current_page),
                page_count: Some(pages),
            },
            ScrollMode::Scrolling => PositionReport {
                chapter_progress: progress,
                current_page: None,
                page_count: None,
            },
        }
    }

    fn seek(&mut self, progress: f64) -> PositionReport {
        let pages = self.pages_per_chapter.max(1);
        self.current_page = ((progress * f64::from(pages)).floor() as u32).min(pages - 1) + 1;
        PositionReport {
            chapter_progress: progress,
            ..self.report()
        }
    }
}

impl RenderingSurface for FakeSurface {
    fn bind(&mut self, callbacks: SurfaceCallbacks) {
        let mut log = self.log.lock().expect("surface log");
        log.callbacks = Some(callbacks);
        log.lifecycle.push(("bind", current_thread_name()));
    }

    fn navigate(&mut self, target: &NavigationTarget, completion: ScriptCompletion) {
        self.record(format!(
            "navigate {} {:.2}",
            target.chapter_href, target.chapter_progress
        ));
        let report = self.seek(target.chapter_progress);
        self.reply(completion, ScriptValue::Position(report));
    }

    fn set_scroll_mode(&mut self, mode: ScrollMode, completion: ScriptCompletion) {
        self.record(format!("set_scroll_mode {mode:?}"));
        self.mode = mode;
        self.reply(completion, ScriptValue::Done);
    }

    fn set_theme(&mut self, theme: &Theme, completion: ScriptCompletion) {
        self.record("set_theme".into());
        self.log
            .lock()
            .expect("surface log")
            .themes
            .push(theme.clone());
        if self.fail_theme {
            completion.fail("stylesheet rejected");
        } else {
            self.reply(completion, ScriptValue::Done);
        }
    }

    fn set_progression(&mut self, progress: f64, completion: ScriptCompletion) {
        self.record(format!("set_progression {progress:.2}"));
        let report = self.seek(progress);
        self.reply(completion, ScriptValue::Position(report));
    }

    fn viewport_width(&mut self, completion: ScriptCompletion) {
        self.record("viewport_width".into());
        self.reply(completion, ScriptValue::ViewportWidth(1080.0));
    }

    fn open_page_next(&mut self, completion: ScriptCompletion) {
        self.record("open_page_next".into());
        if self.current_page >= self.pages_per_chapter {
            self.reply(completion, ScriptValue::ChapterEdge(ChapterEdge::End));
        } else {
            self.current_page += 1;
            let report = self.report();
            self.reply(completion, ScriptValue::Position(report));
        }
    }

    fn open_page_previous(&mut self, completion: ScriptCompletion) {
        self.record("open_page_previous".into());
        if self.current_page <= 1 {
            self.reply(completion, ScriptValue::ChapterEdge(ChapterEdge::Start));
        } else {
            self.current_page -= 1;
            let report = self.report();
            self.reply(completion, ScriptValue::Position(report));
        }
    }
}

impl Drop for FakeSurface {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.lifecycle.push(("drop", current_thread_name()));
        }
    }
}

/// Polls `check` until it holds or two seconds pass.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
