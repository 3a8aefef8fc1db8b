//! Editor surface consumed by chat sessions and autosave
//!
//! The real editor widget lives outside this crate; sessions only need to
//! replace or extend its text and read it back.

use parking_lot::Mutex;

/// How `set_value` applies text to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetValueMode {
    /// Load text as the initial document (restored drafts)
    Reset,
    /// Replace the whole document
    Cover,
    /// Insert at the end of the document
    Append,
}

/// Narrow interface onto the SQL editor widget.
pub trait EditorSurface: Send + Sync {
    fn set_value(&self, text: &str, mode: SetValueMode);

    fn get_all_content(&self) -> String;

    /// Current selection, if the user has selected anything.
    fn get_current_select_content(&self) -> Option<String>;
}

/// In-memory editor buffer used by the CLI and by tests.
#[derive(Debug, Default)]
pub struct BufferEditor {
    inner: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    selection: Option<(usize, usize)>,
    writes: usize,
}

impl BufferEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let editor = Self::default();
        editor.inner.lock().text = text.into();
        editor
    }

    /// Select a byte range of the current text. Out-of-range or non-boundary
    /// selections clear the selection instead.
    pub fn select(&self, start: usize, end: usize) {
        let mut state = self.inner.lock();
        let valid = start <= end
            && end <= state.text.len()
            && state.text.is_char_boundary(start)
            && state.text.is_char_boundary(end);
        state.selection = valid.then_some((start, end));
    }

    pub fn clear_selection(&self) {
        self.inner.lock().selection = None;
    }

    /// Number of `set_value` calls seen so far
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }
}

impl EditorSurface for BufferEditor {
    fn set_value(&self, text: &str, mode: SetValueMode) {
        let mut state = self.inner.lock();
        match mode {
            SetValueMode::Reset | SetValueMode::Cover => {
                state.text = text.to_string();
            }
            SetValueMode::Append => state.text.push_str(text),
        }
        state.selection = None;
        state.writes += 1;
    }

    fn get_all_content(&self) -> String {
        self.inner.lock().text.clone()
    }

    fn get_current_select_content(&self) -> Option<String> {
        let state = self.inner.lock();
        let (start, end) = state.selection?;
        let selected = &state.text[start..end];
        (!selected.is_empty()).then(|| selected.to_string())
    }
}
