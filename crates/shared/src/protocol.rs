use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{BookMetadata, Bookmark, CommandId, Locator, ReadingPosition, ScrollMode, Theme},
    error::ReaderError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ReaderCommand {
    OpenChapter(Locator),
    OpenPageNext,
    OpenPagePrevious,
    Refresh,
    BookmarkCreate,
    BookmarkDelete(Bookmark),
    BookmarksLoad(Vec<Bookmark>),
    ThemeSet(Theme),
    ScrollModeSet(ScrollMode),
}

impl ReaderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenChapter(_) => "open_chapter",
            Self::OpenPageNext => "open_page_next",
            Self::OpenPagePrevious => "open_page_previous",
            Self::Refresh => "refresh",
            Self::BookmarkCreate => "bookmark_create",
            Self::BookmarkDelete(_) => "bookmark_delete",
            Self::BookmarksLoad(_) => "bookmarks_load",
            Self::ThemeSet(_) => "theme_set",
            Self::ScrollModeSet(_) => "scroll_mode_set",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ErrorEvent {
    ChapterNonexistent { locator: Locator, message: String },
    WebViewInaccessible { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BookmarkEvent {
    Created(Bookmark),
    Deleted(Bookmark),
    Loaded(Vec<Bookmark>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CommandEvent {
    Started {
        id: CommandId,
        command: ReaderCommand,
    },
    RunningLong {
        id: CommandId,
        command: ReaderCommand,
    },
    Succeeded {
        id: CommandId,
        command: ReaderCommand,
    },
    Failed {
        id: CommandId,
        command: ReaderCommand,
        error: ReaderError,
    },
}

impl CommandEvent {
    pub fn id(&self) -> CommandId {
        match self {
            Self::Started { id, .. }
            | Self::RunningLong { id, .. }
            | Self::Succeeded { id, .. }
            | Self::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InputEvent {
    CenterTapped,
    ExternalLinkSelected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ReaderEvent {
    Error(ErrorEvent),
    ReadingPositionChanged(ReadingPosition),
    Bookmark(BookmarkEvent),
    ThemeChanged(Theme),
    Command(CommandEvent),
    Input(InputEvent),
}

/// The replay-latest notification: late subscribers see the most recent value.
#[derive(Debug, Clone, PartialEq)]
pub enum BookLifecycle {
    Opened(Arc<BookMetadata>),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tags() {
        let event = ReaderEvent::Command(CommandEvent::Started {
            id: CommandId(7),
            command: ReaderCommand::OpenChapter(Locator::href("ch1.xhtml", 0.0)),
        });
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["type"], "command");
        assert_eq!(json["payload"]["type"], "started");
        assert_eq!(json["payload"]["payload"]["command"]["type"], "open_chapter");

        let back: ReaderEvent = serde_json::from_value(json).expect("deserialize event");
        assert_eq!(back, event);
    }

    #[test]
    fn failed_event_carries_error_code() {
        let event = CommandEvent::Failed {
            id: CommandId(1),
            command: ReaderCommand::Refresh,
            error: ReaderError::WebViewInaccessible("detached".into()),
        };
        assert!(event.is_terminal());
        let json = serde_json::to_value(&event).expect("serialize failure");
        assert_eq!(json["payload"]["error"]["code"], "web_view_inaccessible");
    }
}
