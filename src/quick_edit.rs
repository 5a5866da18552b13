//! Quick Edit: rewrite the text selected in another application.
//!
//! Flow: copy the selection out of the foreground window, run one or more
//! rewrite actions over it, then paste the result back on accept.

use std::sync::Arc;

use crate::capture::{UiPoint, UiRect};
use crate::llm::prompts::{build_rewrite_message, REWRITE_SYSTEM_PROMPT};
use crate::llm::streaming::strip_code_fences;
use crate::llm::{ChatBackend, LlmError, Message};
use crate::text_bridge::{self, Clipboard, InputSynth, TextBridgeError, WindowHandle};

/// Vertical gap between the cursor and the popup's top edge.
const CURSOR_OFFSET: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteAction {
    Expand,
    Summarize,
    RephraseProfessional,
    RephraseCasual,
}

impl RewriteAction {
    pub const ALL: [RewriteAction; 4] = [
        RewriteAction::Expand,
        RewriteAction::Summarize,
        RewriteAction::RephraseProfessional,
        RewriteAction::RephraseCasual,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RewriteAction::Expand => "Expand",
            RewriteAction::Summarize => "Summarize",
            RewriteAction::RephraseProfessional => "Rephrase (Professional)",
            RewriteAction::RephraseCasual => "Rephrase (Casual)",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            RewriteAction::Expand => "Expand and elaborate while keeping the original meaning.",
            RewriteAction::Summarize => "Summarize concisely.",
            RewriteAction::RephraseProfessional => "Rephrase to a professional tone.",
            RewriteAction::RephraseCasual => "Rephrase to a casual, friendly tone.",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuickEditError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    TextBridge(#[from] TextBridgeError),
}

/// The two-message request for one rewrite.
pub fn build_rewrite_messages(action: RewriteAction, text: &str) -> Vec<Message> {
    vec![
        Message::system(REWRITE_SYSTEM_PROMPT),
        Message::user(build_rewrite_message(action.instruction(), text)),
    ]
}

/// Trim the model's answer and drop wrapping fences or quotes.
pub fn clean_rewrite(raw: &str) -> String {
    let text = strip_code_fences(raw);
    for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201C}', '\u{201D}')] {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            let inner = &text[open.len_utf8()..text.len() - close.len_utf8()];
            return inner.trim().to_string();
        }
    }
    text
}

/// Top-left corner for a popup of `size` shown under `cursor`, kept inside
/// `work_area`.
pub fn place_near_cursor(cursor: UiPoint, size: (f64, f64), work_area: UiRect) -> UiPoint {
    let (width, height) = size;
    let right = work_area.x + work_area.width;
    let bottom = work_area.y + work_area.height;

    let mut left = (cursor.x - width / 2.0).max(work_area.x);
    let mut top = (cursor.y + CURSOR_OFFSET).max(work_area.y);
    if left + width > right {
        left = right - width;
    }
    if top + height > bottom {
        top = work_area.y.max(bottom - height);
    }
    UiPoint::new(left, top)
}

/// One Quick Edit popup: the target window and the text being edited.
pub struct QuickEdit<B> {
    backend: Arc<B>,
    model: Option<String>,
    target: WindowHandle,
    original: String,
    text: String,
}

impl<B: ChatBackend> QuickEdit<B> {
    /// Copy the selection out of the foreground window. `None` when there is
    /// no foreground window or nothing is selected.
    pub async fn open(
        backend: Arc<B>,
        input: &impl InputSynth,
        clipboard: &mut impl Clipboard,
    ) -> Result<Option<Self>, QuickEditError> {
        let Some(target) = input.foreground_window() else {
            log::info!("[QUICK_EDIT] No foreground window");
            return Ok(None);
        };

        let Some(original) = text_bridge::copy_selected_text(input, clipboard, target).await? else {
            log::info!("[QUICK_EDIT] Nothing selected in {:?}", target);
            return Ok(None);
        };

        log::info!("[QUICK_EDIT] Editing {} chars from {:?}", original.len(), target);
        Ok(Some(Self {
            backend,
            model: None,
            target,
            text: original.clone(),
            original,
        }))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn target(&self) -> WindowHandle {
        self.target
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// Current editor contents.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Manual edits by the user.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Rewrite the current text. A blank answer leaves the text unchanged.
    pub async fn transform(&mut self, action: RewriteAction) -> Result<&str, QuickEditError> {
        let start = std::time::Instant::now();
        let messages = build_rewrite_messages(action, &self.text);
        let raw = self.backend.complete(&messages, self.model.as_deref()).await?;

        let cleaned = clean_rewrite(&raw);
        if cleaned.is_empty() {
            log::warn!("[QUICK_EDIT] {} returned nothing", action.label());
        } else {
            log::info!(
                "[QUICK_EDIT] {}: {} -> {} chars in {}ms",
                action.label(),
                self.text.len(),
                cleaned.len(),
                start.elapsed().as_millis()
            );
            self.text = cleaned;
        }
        Ok(&self.text)
    }

    /// Paste the current text back into the target window.
    pub async fn accept(
        self,
        input: &impl InputSynth,
        clipboard: &mut impl Clipboard,
    ) -> Result<(), QuickEditError> {
        text_bridge::paste_text(input, clipboard, self.target, &self.text).await?;
        Ok(())
    }
}
