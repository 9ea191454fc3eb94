use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReaderError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(CommandId);

/// Clamps a progress value into `[0, 1]`. NaN is treated as the start of the chapter.
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn check_progress(value: f64) -> Result<f64, ReaderError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ReaderError::InvalidProgress(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Locator {
    Href {
        chapter_href: String,
        chapter_progress: f64,
    },
    Index {
        chapter_index: usize,
        chapter_progress: f64,
    },
}

impl Locator {
    pub fn href(chapter_href: impl Into<String>, chapter_progress: f64) -> Self {
        Self::Href {
            chapter_href: chapter_href.into(),
            chapter_progress: clamp_progress(chapter_progress),
        }
    }

    pub fn index(chapter_index: usize, chapter_progress: f64) -> Self {
        Self::Index {
            chapter_index,
            chapter_progress: clamp_progress(chapter_progress),
        }
    }

    pub fn chapter_progress(&self) -> f64 {
        match self {
            Self::Href {
                chapter_progress, ..
            }
            | Self::Index {
                chapter_progress, ..
            } => *chapter_progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    #[default]
    Paginated,
    Scrolling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReadingPositionFields")]
pub struct ReadingPosition {
    chapter_href: String,
    chapter_progress: f64,
    chapter_title: Option<String>,
    current_page: Option<u32>,
    page_count: Option<u32>,
    book_progress: Option<f64>,
}

#[derive(Deserialize)]
struct ReadingPositionFields {
    chapter_href: String,
    chapter_progress: f64,
    #[serde(default)]
    chapter_title: Option<String>,
    #[serde(default)]
    current_page: Option<u32>,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    book_progress: Option<f64>,
}

impl TryFrom<ReadingPositionFields> for ReadingPosition {
    type Error = ReaderError;

    fn try_from(fields: ReadingPositionFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.chapter_href,
            fields.chapter_progress,
            fields.chapter_title,
            fields.current_page,
            fields.page_count,
            fields.book_progress,
        )
    }
}

impl ReadingPosition {
    pub fn new(
        chapter_href: impl Into<String>,
        chapter_progress: f64,
        chapter_title: Option<String>,
        current_page: Option<u32>,
        page_count: Option<u32>,
        book_progress: Option<f64>,
    ) -> Result<Self, ReaderError> {
        let chapter_progress = check_progress(chapter_progress)?;
        let book_progress = book_progress.map(check_progress).transpose()?;
        Ok(Self {
            chapter_href: chapter_href.into(),
            chapter_progress,
            chapter_title,
            current_page,
            page_count,
            book_progress,
        })
    }

    pub fn chapter_href(&self) -> &str {
        &self.chapter_href
    }

    pub fn chapter_progress(&self) -> f64 {
        self.chapter_progress
    }

    pub fn chapter_title(&self) -> Option<&str> {
        self.chapter_title.as_deref()
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    pub fn book_progress(&self) -> Option<f64> {
        self.book_progress
    }

    pub fn book_progress_percent(&self) -> Option<u32> {
        self.book_progress.map(|p| (p * 100.0) as u32)
    }

    pub fn locator(&self) -> Locator {
        Locator::Href {
            chapter_href: self.chapter_href.clone(),
            chapter_progress: self.chapter_progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    Explicit,
    LastRead,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub kind: BookmarkKind,
    pub locator: Locator,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_progress: Option<f64>,
}

impl Bookmark {
    pub fn new(kind: BookmarkKind, locator: Locator, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            locator,
            created_at,
            chapter_title: None,
            book_progress: None,
        }
    }

    pub fn at_position(kind: BookmarkKind, position: &ReadingPosition, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            locator: position.locator(),
            created_at,
            chapter_title: position.chapter_title.clone(),
            book_progress: position.book_progress,
        }
    }

    /// Two bookmarks mark the same place when kind and locator match; the timestamp is ignored.
    pub fn same_place(&self, other: &Bookmark) -> bool {
        self.kind == other.kind && self.locator == other.locator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontFamily {
    #[default]
    Sans,
    Serif,
    OpenDyslexic,
    Publisher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    #[default]
    DarkTextLightBackground,
    LightTextDarkBackground,
    DarkTextOnSepia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub font: FontFamily,
    pub color_scheme: ColorScheme,
    pub text_size: f64,
    pub publisher_css_enabled: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            font: FontFamily::default(),
            color_scheme: ColorScheme::default(),
            text_size: 1.0,
            publisher_css_enabled: false,
        }
    }
}

impl Theme {
    /// Bounds given in either order are accepted; a NaN bound leaves the size untouched.
    pub fn with_text_size_clamped(mut self, min: f64, max: f64) -> Self {
        if min.is_nan() || max.is_nan() {
            return self;
        }
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.text_size = if self.text_size.is_nan() {
            1.0_f64.clamp(min, max)
        } else {
            self.text_size.clamp(min, max)
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub id: String,
    pub title: String,
    pub start_locator: Locator,
    pub table_of_contents: Vec<TocEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRef<'a> {
    pub index: usize,
    pub entry: &'a TocEntry,
}

impl BookMetadata {
    pub fn chapter_count(&self) -> usize {
        self.table_of_contents.len()
    }

    pub fn chapter_at(&self, index: usize) -> Option<ChapterRef<'_>> {
        self.table_of_contents
            .get(index)
            .map(|entry| ChapterRef { index, entry })
    }

    pub fn chapter_index_of(&self, href: &str) -> Option<usize> {
        let href = strip_fragment(href);
        self.table_of_contents
            .iter()
            .position(|entry| strip_fragment(&entry.href) == href)
    }

    pub fn resolve(&self, locator: &Locator) -> Option<ChapterRef<'_>> {
        match locator {
            Locator::Href { chapter_href, .. } => self
                .chapter_index_of(chapter_href)
                .and_then(|index| self.chapter_at(index)),
            Locator::Index { chapter_index, .. } => self.chapter_at(*chapter_index),
        }
    }

    /// Fraction of the whole book completed at `chapter_progress` into chapter `index`.
    pub fn book_progress(&self, index: usize, chapter_progress: f64) -> Option<f64> {
        let count = self.chapter_count();
        if count == 0 || index >= count {
            return None;
        }
        Some(clamp_progress(
            (index as f64 + clamp_progress(chapter_progress)) / count as f64,
        ))
    }
}

fn strip_fragment(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}
