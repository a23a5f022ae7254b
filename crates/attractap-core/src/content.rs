//! Display content model shared between the core and the screen layer.
//!
//! The core never draws anything itself. It describes what the main content
//! area should show with a [`DisplayContent`] value and hands it to a
//! [`DisplaySink`](crate::collaborators::DisplaySink).

use crate::constants::{COLOR_LIGHT_GRAY, COLOR_WHITE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of content shown in the main content area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Nothing; the screen falls back to its idle view.
    #[default]
    None,
    Error,
    Success,
    Text,
    /// Waiting for a card tap.
    CardChecking,
    FirmwareUpdate,
}

/// One frame of main content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayContent {
    pub kind: ContentKind,
    pub message: String,
    pub sub_message: String,
    pub text_color: u32,
    pub sub_text_color: u32,
    pub show_cancel_button: bool,
    /// Auto-clear after this long. `None` keeps the content until replaced.
    pub duration: Option<Duration>,
    /// Firmware progress in percent, only meaningful for
    /// [`ContentKind::FirmwareUpdate`].
    pub progress_percent: Option<u8>,
}

impl Default for DisplayContent {
    fn default() -> Self {
        Self {
            kind: ContentKind::None,
            message: String::new(),
            sub_message: String::new(),
            text_color: COLOR_WHITE,
            sub_text_color: COLOR_LIGHT_GRAY,
            show_cancel_button: false,
            duration: None,
            progress_percent: None,
        }
    }
}

impl DisplayContent {
    /// Empty content, clears whatever is shown.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(kind: ContentKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ContentKind::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ContentKind::Success, message)
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self::new(ContentKind::Text, message)
    }

    pub fn card_checking(message: impl Into<String>) -> Self {
        Self::new(ContentKind::CardChecking, message)
    }

    pub fn firmware(message: impl Into<String>) -> Self {
        Self::new(ContentKind::FirmwareUpdate, message)
    }

    pub fn with_sub_message(mut self, sub_message: impl Into<String>) -> Self {
        self.sub_message = sub_message.into();
        self
    }

    pub fn with_text_color(mut self, color: u32) -> Self {
        self.text_color = color;
        self
    }

    pub fn with_sub_text_color(mut self, color: u32) -> Self {
        self.sub_text_color = color;
        self
    }

    pub fn with_cancel_button(mut self) -> Self {
        self.show_cancel_button = true;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress_percent = Some(percent.min(100));
        self
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == ContentKind::None
    }
}

/// Connection summary for the status bar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub authenticated: bool,
    pub status: String,
    pub reader_name: Option<String>,
}

/// One entry of a server-provided selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub label: String,
}

/// Selection dialog requested by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectItemPrompt {
    pub label: String,
    pub options: Vec<SelectOption>,
}
