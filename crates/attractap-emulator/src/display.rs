//! Virtual reader screen for the desktop terminal.
//!
//! The reader's screen is modelled as four text lines:
//!
//! ```text
//! line 0  status bar: connection state and reader name
//! line 1  main message
//! line 2  sub message
//! line 3  footer: cancel button, firmware progress or selection hint
//! ```
//!
//! Content with a duration clears itself once [`VirtualDisplay::update`]
//! runs after the deadline.
//!
//! # Examples
//!
//! ```
//! use attractap_core::DisplayContent;
//! use attractap_emulator::VirtualDisplay;
//!
//! let mut display = VirtualDisplay::new(32, "Ready");
//! assert_eq!(display.get_line(1).unwrap().trim(), "Ready");
//!
//! display.show_content(&DisplayContent::success("Welcome").with_sub_message("ada"));
//! assert_eq!(display.get_line(1).unwrap().trim(), "Welcome");
//! assert_eq!(display.get_line(2).unwrap().trim(), "ada");
//! ```

use crate::error::{EmulatorError, Result};
use attractap_core::{
    ConnectionStatus, ContentKind, DisplayContent, DisplaySink, SelectItemPrompt,
};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Lines of the reader screen.
pub const LINES: usize = 4;

const DEFAULT_COLUMNS: usize = 32;
const STATUS_LINE: usize = 0;
const MESSAGE_LINE: usize = 1;
const SUB_MESSAGE_LINE: usize = 2;
const FOOTER_LINE: usize = 3;

/// Text alignment within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    /// Extra space goes to the right when the padding is odd.
    Center,
    Right,
}

/// Text buffer of the reader screen.
///
/// Not synchronized; [`ScreenSink`] wraps it for use from the session.
#[derive(Debug, Clone)]
pub struct VirtualDisplay {
    columns: usize,
    buffer: Vec<String>,
    idle_message: String,
    /// Deadline of the current content, if it has one.
    expires_at: Option<Instant>,
    prompt_open: bool,
}

impl VirtualDisplay {
    /// Blank screen showing `idle_message`.
    pub fn new(columns: usize, idle_message: impl Into<String>) -> Self {
        let mut display = Self {
            columns,
            buffer: vec![" ".repeat(columns); LINES],
            idle_message: idle_message.into(),
            expires_at: None,
            prompt_open: false,
        };
        display.reset_to_idle();
        display
    }

    pub fn builder() -> VirtualDisplayBuilder {
        VirtualDisplayBuilder::default()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Set `line` with left alignment.
    ///
    /// # Errors
    /// `InvalidLine` when `line` is past the last line.
    pub fn set_line(&mut self, line: usize, text: &str) -> Result<()> {
        self.set_line_aligned(line, text, Alignment::Left)
    }

    /// Set `line`, dropping control characters and truncating to the width.
    ///
    /// # Errors
    /// `InvalidLine` when `line` is past the last line.
    pub fn set_line_aligned(&mut self, line: usize, text: &str, align: Alignment) -> Result<()> {
        let Some(slot) = self.buffer.get_mut(line) else {
            return Err(EmulatorError::InvalidLine {
                line,
                max: LINES - 1,
            });
        };
        *slot = align_text(&sanitize_text(text), self.columns, align);
        Ok(())
    }

    /// Render the connection indicator into the status bar.
    pub fn show_status(&mut self, status: &ConnectionStatus) {
        let text = match &status.reader_name {
            Some(name) if status.authenticated => format!("{} | {name}", status.status),
            _ => status.status.clone(),
        };
        self.write(STATUS_LINE, &text, Alignment::Left);
    }

    /// Replace the content area. [`ContentKind::None`] returns to idle.
    pub fn show_content(&mut self, content: &DisplayContent) {
        self.show_content_at(content, Instant::now());
    }

    pub fn show_content_at(&mut self, content: &DisplayContent, now: Instant) {
        self.prompt_open = false;
        if content.kind == ContentKind::None {
            self.reset_to_idle();
            return;
        }

        self.write(MESSAGE_LINE, &content.message, Alignment::Center);
        self.write(SUB_MESSAGE_LINE, &content.sub_message, Alignment::Center);
        let footer = if let Some(percent) = content.progress_percent {
            progress_bar(percent, self.columns)
        } else if content.show_cancel_button {
            "[ Cancel ]".to_string()
        } else {
            String::new()
        };
        self.write(FOOTER_LINE, &footer, Alignment::Center);
        self.expires_at = content.duration.map(|duration| now + duration);
    }

    /// Show a selection dialog over the content area.
    pub fn show_prompt(&mut self, prompt: &SelectItemPrompt) {
        let options = prompt
            .options
            .iter()
            .map(|option| format!("{}) {}", option.id, option.label))
            .collect::<Vec<_>>()
            .join("  ");
        self.write(MESSAGE_LINE, &prompt.label, Alignment::Center);
        self.write(SUB_MESSAGE_LINE, &options, Alignment::Left);
        self.write(FOOTER_LINE, "select <id> | cancel", Alignment::Center);
        self.expires_at = None;
        self.prompt_open = true;
    }

    /// Close the selection dialog if it is still open.
    pub fn close_prompt(&mut self) {
        if self.prompt_open {
            self.reset_to_idle();
        }
    }

    pub fn is_prompt_open(&self) -> bool {
        self.prompt_open
    }

    /// Expire timed content. Returns true when the screen changed.
    pub fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    pub fn update_at(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) if now >= deadline => {
                self.reset_to_idle();
                true
            }
            _ => false,
        }
    }

    /// Clear the content area and show the idle message. The status bar
    /// is kept.
    pub fn reset_to_idle(&mut self) {
        let idle = self.idle_message.clone();
        self.write(MESSAGE_LINE, &idle, Alignment::Center);
        self.write(SUB_MESSAGE_LINE, "", Alignment::Left);
        self.write(FOOTER_LINE, "", Alignment::Left);
        self.expires_at = None;
        self.prompt_open = false;
    }

    pub fn is_idle(&self) -> bool {
        !self.prompt_open
            && self.expires_at.is_none()
            && self.buffer[MESSAGE_LINE].trim() == self.idle_message
            && self.buffer[SUB_MESSAGE_LINE].trim().is_empty()
    }

    /// # Errors
    /// `InvalidLine` when `line` is past the last line.
    pub fn get_line(&self, line: usize) -> Result<&str> {
        self.buffer
            .get(line)
            .map(String::as_str)
            .ok_or(EmulatorError::InvalidLine {
                line,
                max: LINES - 1,
            })
    }

    pub fn get_all_lines(&self) -> Vec<&str> {
        self.buffer.iter().map(String::as_str).collect()
    }

    /// Screen with a frame around it, ready to print.
    pub fn render(&self) -> String {
        let border = format!("+{}+", "-".repeat(self.columns));
        let mut out = String::with_capacity((self.columns + 3) * (LINES + 2));
        out.push_str(&border);
        out.push('\n');
        for line in &self.buffer {
            out.push('|');
            out.push_str(line);
            out.push_str("|\n");
        }
        out.push_str(&border);
        out
    }

    fn write(&mut self, line: usize, text: &str, align: Alignment) {
        if let Some(slot) = self.buffer.get_mut(line) {
            *slot = align_text(&sanitize_text(text), self.columns, align);
        }
    }
}

#[derive(Debug)]
pub struct VirtualDisplayBuilder {
    columns: usize,
    idle_message: String,
}

impl VirtualDisplayBuilder {
    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_idle_message(mut self, message: impl Into<String>) -> Self {
        self.idle_message = message.into();
        self
    }

    pub fn build(self) -> VirtualDisplay {
        VirtualDisplay::new(self.columns, self.idle_message)
    }
}

impl Default for VirtualDisplayBuilder {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            idle_message: "Attractap".to_string(),
        }
    }
}

/// [`DisplaySink`] that draws into a [`VirtualDisplay`] and prints the
/// screen to stdout whenever it changes.
#[derive(Debug)]
pub struct ScreenSink {
    display: Mutex<VirtualDisplay>,
    echo: bool,
}

impl ScreenSink {
    pub fn new(display: VirtualDisplay) -> Self {
        Self {
            display: Mutex::new(display),
            echo: true,
        }
    }

    /// Sink that only updates the buffer.
    pub fn silent(display: VirtualDisplay) -> Self {
        Self {
            display: Mutex::new(display),
            echo: false,
        }
    }

    /// Copy of the current screen.
    pub fn snapshot(&self) -> VirtualDisplay {
        self.lock().clone()
    }

    /// Expire timed content and redraw if that changed the screen.
    pub fn refresh(&self) {
        let mut display = self.lock();
        if display.update() {
            self.draw(&display);
        }
    }

    fn lock(&self) -> MutexGuard<'_, VirtualDisplay> {
        match self.display.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn change(&self, f: impl FnOnce(&mut VirtualDisplay)) {
        let mut display = self.lock();
        f(&mut display);
        self.draw(&display);
    }

    fn draw(&self, display: &VirtualDisplay) {
        if self.echo {
            println!("{}", display.render());
        }
    }
}

impl DisplaySink for ScreenSink {
    fn show_content(&self, content: DisplayContent) {
        self.change(|display| display.show_content(&content));
    }

    fn show_connection_status(&self, status: &ConnectionStatus) {
        self.change(|display| display.show_status(status));
    }

    fn show_select_item(&self, prompt: SelectItemPrompt) {
        self.change(|display| display.show_prompt(&prompt));
    }

    fn close_select_item(&self) {
        self.change(VirtualDisplay::close_prompt);
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Pad `text` to exactly `width` characters, truncating when longer.
pub fn align_text(text: &str, width: usize, alignment: Alignment) -> String {
    let char_count = text.chars().count();
    if char_count >= width {
        return truncate_text(text, width);
    }

    let padding = width - char_count;
    match alignment {
        Alignment::Left => format!("{text}{}", " ".repeat(padding)),
        Alignment::Right => format!("{}{text}", " ".repeat(padding)),
        Alignment::Center => {
            let left_pad = padding / 2;
            let right_pad = padding - left_pad;
            format!("{}{text}{}", " ".repeat(left_pad), " ".repeat(right_pad))
        }
    }
}

fn progress_bar(percent: u8, columns: usize) -> String {
    let percent = usize::from(percent.min(100));
    // "[" + bar + "] " + "100%"
    let width = columns.saturating_sub(7).max(1);
    let filled = width * percent / 100;
    format!(
        "[{}{}] {percent}%",
        "#".repeat(filled),
        " ".repeat(width - filled)
    )
}

fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
