use reader_core::bridge::{
    ChapterEdge, NavigationTarget, PositionReport, RenderingSurface, ScriptCompletion,
    ScriptValue,
};
use shared::domain::{ScrollMode, Theme};
use tracing::debug;

/// Stand-in for a web view: lays every chapter out as a fixed number of pages.
pub struct SimulatedSurface {
    pages_per_chapter: u32,
    page: u32,
    mode: ScrollMode,
}

impl SimulatedSurface {
    pub fn new(pages_per_chapter: u32) -> Self {
        Self {
            pages_per_chapter: pages_per_chapter.max(1),
            page: 1,
            mode: ScrollMode::Paginated,
        }
    }

    fn report(&self, chapter_progress: f64) -> ScriptValue {
        let paginated = self.mode == ScrollMode::Paginated;
        ScriptValue::Position(PositionReport {
            chapter_progress,
            current_page: paginated.then_some(self.page),
            page_count: paginated.then_some(self.pages_per_chapter),
        })
    }

    fn page_progress(&self) -> f64 {
        f64::from(self.page - 1) / f64::from(self.pages_per_chapter)
    }

    fn seek(&mut self, progress: f64) -> ScriptValue {
        let page = (progress * f64::from(self.pages_per_chapter)).floor() as u32;
        self.page = page.min(self.pages_per_chapter - 1) + 1;
        self.report(progress)
    }
}

impl RenderingSurface for SimulatedSurface {
    fn navigate(&mut self, target: &NavigationTarget, completion: ScriptCompletion) {
        debug!(href = %target.chapter_href, progress = target.chapter_progress, "surface navigate");
        completion.succeed(self.seek(target.chapter_progress));
    }

    fn set_scroll_mode(&mut self, mode: ScrollMode, completion: ScriptCompletion) {
        self.mode = mode;
        completion.succeed(ScriptValue::Done);
    }

    fn set_theme(&mut self, theme: &Theme, completion: ScriptCompletion) {
        debug!(?theme, "surface restyled");
        completion.succeed(ScriptValue::Done);
    }

    fn set_progression(&mut self, progress: f64, completion: ScriptCompletion) {
        completion.succeed(self.seek(progress));
    }

    fn viewport_width(&mut self, completion: ScriptCompletion) {
        completion.succeed(ScriptValue::ViewportWidth(1280.0));
    }

    fn open_page_next(&mut self, completion: ScriptCompletion) {
        if self.page >= self.pages_per_chapter {
            completion.succeed(ScriptValue::ChapterEdge(ChapterEdge::End));
        } else {
            self.page += 1;
            completion.succeed(self.report(self.page_progress()));
        }
    }

    fn open_page_previous(&mut self, completion: ScriptCompletion) {
        if self.page <= 1 {
            completion.succeed(ScriptValue::ChapterEdge(ChapterEdge::Start));
        } else {
            self.page -= 1;
            completion.succeed(self.report(self.page_progress()));
        }
    }
}
