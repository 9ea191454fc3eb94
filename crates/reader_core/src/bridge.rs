//! Rendering bridge: scripted calls into the attached surface and inbound notifications out of it.
//!
//! Calls are requested from the command worker, hop onto the interaction context through the
//! injected [`Dispatcher`], and resolve on a oneshot channel. Every attach and detach bumps a
//! generation counter; a call issued under an older generation resolves with
//! [`BridgeError::Inaccessible`] instead of waiting forever.

use std::sync::{Arc, Mutex, MutexGuard};

use shared::{
    domain::{ScrollMode, Theme},
    error::ReaderError,
};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::dispatch::{Dispatcher, Job};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReport {
    pub chapter_progress: f64,
    pub current_page: Option<u32>,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterEdge {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Done,
    Position(PositionReport),
    ChapterEdge(ChapterEdge),
    ViewportWidth(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationTarget {
    pub chapter_href: String,
    pub chapter_progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOperation {
    Navigate(NavigationTarget),
    SetScrollMode(ScrollMode),
    SetTheme(Theme),
    SetProgression(f64),
    ViewportWidth,
    OpenPageNext,
    OpenPagePrevious,
}

impl ScriptOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::SetScrollMode(_) => "set_scroll_mode",
            Self::SetTheme(_) => "set_theme",
            Self::SetProgression(_) => "set_progression",
            Self::ViewportWidth => "viewport_width",
            Self::OpenPageNext => "open_page_next",
            Self::OpenPagePrevious => "open_page_previous",
        }
    }

    fn apply(self, surface: &mut dyn RenderingSurface, completion: ScriptCompletion) {
        match self {
            Self::Navigate(target) => surface.navigate(&target, completion),
            Self::SetScrollMode(mode) => surface.set_scroll_mode(mode, completion),
            Self::SetTheme(theme) => surface.set_theme(&theme, completion),
            Self::SetProgression(progress) => surface.set_progression(progress, completion),
            Self::ViewportWidth => surface.viewport_width(completion),
            Self::OpenPageNext => surface.open_page_next(completion),
            Self::OpenPagePrevious => surface.open_page_previous(completion),
        }
    }
}

/// Reply handle for one scripted call. The surface may complete it immediately or hold it
/// until its script engine answers; dropping it unanswered resolves the call as inaccessible.
#[derive(Debug)]
pub struct ScriptCompletion {
    tx: oneshot::Sender<Result<ScriptValue, String>>,
}

impl ScriptCompletion {
    pub fn complete(self, result: Result<ScriptValue, String>) {
        // The caller may already have given up after a detach.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self, value: ScriptValue) {
        self.complete(Ok(value));
    }

    pub fn fail(self, message: impl Into<String>) {
        self.complete(Err(message.into()));
    }
}

/// Driver contract for the external rendering surface. Every method is invoked on the
/// interaction context.
pub trait RenderingSurface: Send {
    fn bind(&mut self, _callbacks: SurfaceCallbacks) {}

    fn navigate(&mut self, target: &NavigationTarget, completion: ScriptCompletion);
    fn set_scroll_mode(&mut self, mode: ScrollMode, completion: ScriptCompletion);
    fn set_theme(&mut self, theme: &Theme, completion: ScriptCompletion);
    fn set_progression(&mut self, progress: f64, completion: ScriptCompletion);
    fn viewport_width(&mut self, completion: ScriptCompletion);
    fn open_page_next(&mut self, completion: ScriptCompletion);
    fn open_page_previous(&mut self, completion: ScriptCompletion);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapRegion {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceNotification {
    PositionReport(PositionReport),
    Tapped(TapRegion),
    Swiped(SwipeDirection),
    ScriptError { message: String },
    LinkSelected(String),
}

#[derive(Clone)]
pub struct SurfaceCallbacks {
    sink: Arc<dyn Fn(SurfaceNotification) + Send + Sync>,
}

impl SurfaceCallbacks {
    pub fn new(sink: impl Fn(SurfaceNotification) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn on_position_report(&self, report: PositionReport) {
        (self.sink)(SurfaceNotification::PositionReport(report));
    }

    pub fn on_tapped(&self, region: TapRegion) {
        (self.sink)(SurfaceNotification::Tapped(region));
    }

    pub fn on_swiped(&self, direction: SwipeDirection) {
        (self.sink)(SurfaceNotification::Swiped(direction));
    }

    pub fn on_script_error(&self, message: impl Into<String>) {
        (self.sink)(SurfaceNotification::ScriptError {
            message: message.into(),
        });
    }

    pub fn on_link_selected(&self, href: impl Into<String>) {
        (self.sink)(SurfaceNotification::LinkSelected(href.into()));
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("rendering surface inaccessible: {0}")]
    Inaccessible(String),
    #[error("script call {operation} failed: {message}")]
    Script {
        operation: &'static str,
        message: String,
    },
    #[error("unexpected reply to {operation}: {reply:?}")]
    UnexpectedReply {
        operation: &'static str,
        reply: ScriptValue,
    },
}

impl From<BridgeError> for ReaderError {
    fn from(value: BridgeError) -> Self {
        match value {
            BridgeError::Inaccessible(message) => ReaderError::WebViewInaccessible(message),
            BridgeError::Script { .. } => ReaderError::WebViewInaccessible(value.to_string()),
            BridgeError::UnexpectedReply { .. } => ReaderError::execution_failed(value),
        }
    }
}

struct SurfaceSlot {
    surface: Option<Box<dyn RenderingSurface>>,
    generation: u64,
}

pub struct RenderingBridge {
    dispatcher: Arc<dyn Dispatcher>,
    callbacks: SurfaceCallbacks,
    slot: Arc<Mutex<SurfaceSlot>>,
    generation: watch::Sender<u64>,
}

fn lock_slot(slot: &Mutex<SurfaceSlot>) -> MutexGuard<'_, SurfaceSlot> {
    // A surface that panicked mid-call leaves the slot itself consistent.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RenderingBridge {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, callbacks: SurfaceCallbacks) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            dispatcher,
            callbacks,
            slot: Arc::new(Mutex::new(SurfaceSlot {
                surface: None,
                generation: 0,
            })),
            generation,
        }
    }

    // Binding and dropping happen on the interaction context; the generation bump does not.
    pub fn attach(&self, surface: Box<dyn RenderingSurface>) {
        let (generation, previous) = {
            let mut slot = lock_slot(&self.slot);
            slot.generation += 1;
            self.generation.send_replace(slot.generation);
            (slot.generation, slot.surface.replace(surface))
        };
        tracing::debug!(replaced = previous.is_some(), "rendering surface attached");

        let slot = Arc::clone(&self.slot);
        let callbacks = self.callbacks.clone();
        self.run_on_interaction_context(Box::new(move || {
            drop(previous);
            let mut slot = lock_slot(&slot);
            if slot.generation != generation {
                return;
            }
            if let Some(surface) = slot.surface.as_mut() {
                surface.bind(callbacks);
            }
        }));
    }

    pub fn detach(&self) -> bool {
        let previous = {
            let mut slot = lock_slot(&self.slot);
            let previous = slot.surface.take();
            if previous.is_some() {
                slot.generation += 1;
                self.generation.send_replace(slot.generation);
            }
            previous
        };
        let Some(previous) = previous else {
            return false;
        };
        tracing::debug!("rendering surface detached");
        self.run_on_interaction_context(Box::new(move || drop(previous)));
        true
    }

    fn run_on_interaction_context(&self, job: Job) {
        if self.dispatcher.dispatch(job).is_err() {
            tracing::debug!("interaction context disposed; releasing surface on the caller");
        }
    }

    pub fn is_attached(&self) -> bool {
        lock_slot(&self.slot).surface.is_some()
    }

    pub fn callbacks(&self) -> SurfaceCallbacks {
        self.callbacks.clone()
    }

    pub async fn execute(&self, operation: ScriptOperation) -> Result<ScriptValue, BridgeError> {
        let mut generation_rx = self.generation.subscribe();
        let issued = {
            let slot = lock_slot(&self.slot);
            if slot.surface.is_none() {
                return Err(BridgeError::Inaccessible(
                    "no rendering surface is attached".into(),
                ));
            }
            slot.generation
        };

        let name = operation.name();
        tracing::debug!(operation = name, "bridge call issued");
        let (tx, rx) = oneshot::channel();
        let completion = ScriptCompletion { tx };
        let slot = Arc::clone(&self.slot);
        self.dispatcher
            .dispatch(Box::new(move || {
                let mut slot = lock_slot(&slot);
                if slot.generation != issued {
                    return;
                }
                if let Some(surface) = slot.surface.as_mut() {
                    operation.apply(surface.as_mut(), completion);
                }
            }))
            .map_err(|err| BridgeError::Inaccessible(err.to_string()))?;

        tokio::select! {
            reply = rx => match reply {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(BridgeError::Script {
                    operation: name,
                    message,
                }),
                Err(_) => Err(BridgeError::Inaccessible(format!(
                    "rendering surface dropped the {name} call"
                ))),
            },
            _ = generation_rx.wait_for(|current| *current != issued) => {
                Err(BridgeError::Inaccessible(format!(
                    "rendering surface detached during the {name} call"
                )))
            }
        }
    }

    pub async fn viewport_width(&self) -> Result<f64, BridgeError> {
        match self.execute(ScriptOperation::ViewportWidth).await? {
            ScriptValue::ViewportWidth(width) => Ok(width),
            reply => Err(BridgeError::UnexpectedReply {
                operation: "viewport_width",
                reply,
            }),
        }
    }
}

impl Drop for RenderingBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
