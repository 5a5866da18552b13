//! Moving selected text between another application and us.
//!
//! The OS side (window activation, synthetic keystrokes, clipboard) sits
//! behind two traits. The copy and paste sequences here drive them with the
//! timing real applications need, and always put the user's clipboard back.

use std::borrow::Cow;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::capture::CapturedImage;

/// Native top-level window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// Synthetic shortcut sent to the focused window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chord {
    Copy,
    Paste,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierKey {
    Control,
    Alt,
    Shift,
    Meta,
}

#[derive(Debug, thiserror::Error)]
pub enum TextBridgeError {
    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("Key injection failed: {0}")]
    Input(String),
}

impl From<arboard::Error> for TextBridgeError {
    fn from(e: arboard::Error) -> Self {
        TextBridgeError::Clipboard(e.to_string())
    }
}

/// Window focus and keyboard injection.
pub trait InputSynth {
    fn foreground_window(&self) -> Option<WindowHandle>;
    /// Bring `window` to the front. Returns false if the OS refused.
    fn activate(&self, window: WindowHandle) -> bool;
    fn send_chord(&self, chord: Chord) -> Result<(), TextBridgeError>;
    fn is_modifier_down(&self, key: ModifierKey) -> bool;
    /// Inject a key-up for a modifier the user is still physically holding.
    fn release_modifier(&self, key: ModifierKey);
}

/// Whatever was on the clipboard before we borrowed it.
#[derive(Clone)]
pub enum ClipboardSnapshot {
    Empty,
    Text(String),
    Image(arboard::ImageData<'static>),
}

impl std::fmt::Debug for ClipboardSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipboardSnapshot::Empty => write!(f, "Empty"),
            ClipboardSnapshot::Text(t) => write!(f, "Text({} chars)", t.len()),
            ClipboardSnapshot::Image(i) => write!(f, "Image({}x{})", i.width, i.height),
        }
    }
}

pub trait Clipboard {
    fn snapshot(&mut self) -> ClipboardSnapshot;
    fn restore(&mut self, snapshot: ClipboardSnapshot) -> Result<(), TextBridgeError>;
    fn get_text(&mut self) -> Option<String>;
    fn set_text(&mut self, text: &str) -> Result<(), TextBridgeError>;
    fn set_image(&mut self, image: &CapturedImage) -> Result<(), TextBridgeError>;
    fn clear(&mut self) -> Result<(), TextBridgeError>;
}

/// The system clipboard through `arboard`.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, TextBridgeError> {
        Ok(Self {
            inner: arboard::Clipboard::new()?,
        })
    }
}

impl Clipboard for SystemClipboard {
    fn snapshot(&mut self) -> ClipboardSnapshot {
        if let Ok(text) = self.inner.get_text() {
            return ClipboardSnapshot::Text(text);
        }
        match self.inner.get_image() {
            Ok(image) => ClipboardSnapshot::Image(image),
            Err(_) => ClipboardSnapshot::Empty,
        }
    }

    fn restore(&mut self, snapshot: ClipboardSnapshot) -> Result<(), TextBridgeError> {
        match snapshot {
            ClipboardSnapshot::Empty => self.inner.clear()?,
            ClipboardSnapshot::Text(text) => self.inner.set_text(text)?,
            ClipboardSnapshot::Image(image) => self.inner.set_image(image)?,
        }
        Ok(())
    }

    fn get_text(&mut self) -> Option<String> {
        self.inner.get_text().ok()
    }

    fn set_text(&mut self, text: &str) -> Result<(), TextBridgeError> {
        self.inner.set_text(text.to_string())?;
        Ok(())
    }

    fn set_image(&mut self, image: &CapturedImage) -> Result<(), TextBridgeError> {
        let rgba = image::load_from_memory(image.png_bytes())
            .map_err(|e| TextBridgeError::Clipboard(e.to_string()))?
            .to_rgba8();
        self.inner.set_image(arboard::ImageData {
            width: rgba.width() as usize,
            height: rgba.height() as usize,
            bytes: Cow::Owned(rgba.into_raw()),
        })?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), TextBridgeError> {
        self.inner.clear()?;
        Ok(())
    }
}

pub const COPY_ATTEMPTS: u32 = 4;
const ACTIVATE_SETTLE: Duration = Duration::from_millis(30);
const COPY_SETTLE: Duration = Duration::from_millis(80);
const PASTE_SETTLE: Duration = Duration::from_millis(50);
const MODIFIER_POLL: Duration = Duration::from_millis(10);
const MODIFIER_TIMEOUT: Duration = Duration::from_millis(300);

/// Modifiers from the triggering hotkey that would turn our copy into
/// something else if still held.
const HOTKEY_MODIFIERS: [ModifierKey; 2] = [ModifierKey::Control, ModifierKey::Alt];

/// Wait for the user to let go of the hotkey modifiers. Anything still held
/// at the deadline gets a synthetic key-up.
async fn wait_for_modifiers_released(input: &impl InputSynth) {
    let deadline = Instant::now() + MODIFIER_TIMEOUT;
    loop {
        let held: Vec<ModifierKey> = HOTKEY_MODIFIERS
            .iter()
            .copied()
            .filter(|k| input.is_modifier_down(*k))
            .collect();
        if held.is_empty() {
            return;
        }
        if Instant::now() >= deadline {
            log::warn!("[CLIPBOARD] Forcing key-up for {:?}", held);
            for key in held {
                input.release_modifier(key);
            }
            return;
        }
        sleep(MODIFIER_POLL).await;
    }
}

/// Copy the current selection out of `target`.
///
/// Returns `None` if nothing non-blank was copied after every attempt. The
/// previous clipboard content is restored either way.
pub async fn copy_selected_text(
    input: &impl InputSynth,
    clipboard: &mut impl Clipboard,
    target: WindowHandle,
) -> Result<Option<String>, TextBridgeError> {
    let snapshot = clipboard.snapshot();
    let copied = copy_attempts(input, clipboard, target).await;

    if let Err(e) = clipboard.restore(snapshot) {
        log::warn!("[CLIPBOARD] Failed to restore clipboard: {}", e);
    }
    copied
}

async fn copy_attempts(
    input: &impl InputSynth,
    clipboard: &mut impl Clipboard,
    target: WindowHandle,
) -> Result<Option<String>, TextBridgeError> {
    for attempt in 1..=COPY_ATTEMPTS {
        if !input.activate(target) {
            log::warn!("[CLIPBOARD] Could not activate window {:?}", target);
        }
        sleep(ACTIVATE_SETTLE).await;
        wait_for_modifiers_released(input).await;

        clipboard.clear()?;
        input.send_chord(Chord::Copy)?;
        sleep(COPY_SETTLE).await;

        if let Some(text) = clipboard.get_text().filter(|t| !t.trim().is_empty()) {
            log::info!("[CLIPBOARD] Copied {} chars on attempt {}", text.len(), attempt);
            return Ok(Some(text));
        }
        log::debug!("[CLIPBOARD] Attempt {} copied nothing", attempt);
    }
    log::info!("[CLIPBOARD] No selection after {} attempts", COPY_ATTEMPTS);
    Ok(None)
}

/// Paste `text` into `target` through the clipboard, then restore it.
pub async fn paste_text(
    input: &impl InputSynth,
    clipboard: &mut impl Clipboard,
    target: WindowHandle,
    text: &str,
) -> Result<(), TextBridgeError> {
    let snapshot = clipboard.snapshot();
    let pasted = paste_once(input, clipboard, target, text).await;

    if let Err(e) = clipboard.restore(snapshot) {
        log::warn!("[CLIPBOARD] Failed to restore clipboard: {}", e);
    }
    pasted
}

/// Put a reply on the clipboard for the user to paste elsewhere.
pub fn copy_text<C: Clipboard + ?Sized>(clipboard: &mut C, text: &str) -> Result<(), TextBridgeError> {
    clipboard.set_text(text)?;
    log::info!("[CLIPBOARD] Copied {} chars", text.len());
    Ok(())
}

/// Put the screenshot on the clipboard as a bitmap.
pub fn copy_image<C: Clipboard + ?Sized>(
    clipboard: &mut C,
    image: &CapturedImage,
) -> Result<(), TextBridgeError> {
    clipboard.set_image(image)?;
    log::info!("[CLIPBOARD] Copied {}x{} image", image.width(), image.height());
    Ok(())
}

async fn paste_once(
    input: &impl InputSynth,
    clipboard: &mut impl Clipboard,
    target: WindowHandle,
    text: &str,
) -> Result<(), TextBridgeError> {
    clipboard.set_text(text)?;
    if !input.activate(target) {
        log::warn!("[CLIPBOARD] Could not activate window {:?}", target);
    }
    sleep(PASTE_SETTLE).await;
    input.send_chord(Chord::Paste)?;
    sleep(PASTE_SETTLE).await;
    log::info!("[CLIPBOARD] Pasted {} chars", text.len());
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct Board {
        pub(crate) text: Option<String>,
        pub(crate) pasted: Vec<String>,
        /// Dimensions of the last bitmap put on the board.
        pub(crate) image: Option<(u32, u32)>,
    }

    pub(crate) struct FakeClipboard(pub(crate) Arc<Mutex<Board>>);

    impl Clipboard for FakeClipboard {
        fn snapshot(&mut self) -> ClipboardSnapshot {
            match &self.0.lock().unwrap().text {
                Some(t) => ClipboardSnapshot::Text(t.clone()),
                None => ClipboardSnapshot::Empty,
            }
        }

        fn restore(&mut self, snapshot: ClipboardSnapshot) -> Result<(), TextBridgeError> {
            self.0.lock().unwrap().text = match snapshot {
                ClipboardSnapshot::Text(t) => Some(t),
                _ => None,
            };
            Ok(())
        }

        fn get_text(&mut self) -> Option<String> {
            self.0.lock().unwrap().text.clone()
        }

        fn set_text(&mut self, text: &str) -> Result<(), TextBridgeError> {
            self.0.lock().unwrap().text = Some(text.to_string());
            Ok(())
        }

        fn set_image(&mut self, image: &CapturedImage) -> Result<(), TextBridgeError> {
            let mut board = self.0.lock().unwrap();
            board.text = None;
            board.image = Some((image.width(), image.height()));
            Ok(())
        }

        fn clear(&mut self) -> Result<(), TextBridgeError> {
            let mut board = self.0.lock().unwrap();
            board.text = None;
            board.image = None;
            Ok(())
        }
    }

    /// A target application holding `selection`. Copy puts it on the shared
    /// board after `copy_misses` empty copies; paste records the board text.
    pub(crate) struct FakeApp {
        board: Arc<Mutex<Board>>,
        selection: Option<String>,
        copy_misses: Mutex<u32>,
        held: Mutex<HashSet<ModifierKey>>,
        pub(crate) log: Mutex<Vec<String>>,
    }

    impl FakeApp {
        pub(crate) fn new(board: Arc<Mutex<Board>>, selection: Option<&str>) -> Self {
            Self {
                board,
                selection: selection.map(str::to_string),
                copy_misses: Mutex::new(0),
                held: Mutex::new(HashSet::new()),
                log: Mutex::new(Vec::new()),
            }
        }

        fn count(&self, entry: &str) -> usize {
            self.log.lock().unwrap().iter().filter(|e| *e == entry).count()
        }
    }

    impl InputSynth for FakeApp {
        fn foreground_window(&self) -> Option<WindowHandle> {
            Some(WindowHandle(7))
        }

        fn activate(&self, window: WindowHandle) -> bool {
            self.log.lock().unwrap().push(format!("activate {}", window.0));
            true
        }

        fn send_chord(&self, chord: Chord) -> Result<(), TextBridgeError> {
            self.log.lock().unwrap().push(format!("{:?}", chord));
            let mut board = self.board.lock().unwrap();
            match chord {
                Chord::Copy => {
                    let mut misses = self.copy_misses.lock().unwrap();
                    if *misses > 0 {
                        *misses -= 1;
                    } else if let Some(sel) = &self.selection {
                        board.text = Some(sel.clone());
                    }
                }
                Chord::Paste => {
                    let text = board.text.clone().unwrap_or_default();
                    board.pasted.push(text);
                }
            }
            Ok(())
        }

        fn is_modifier_down(&self, key: ModifierKey) -> bool {
            self.held.lock().unwrap().contains(&key)
        }

        fn release_modifier(&self, key: ModifierKey) {
            self.log.lock().unwrap().push(format!("release {:?}", key));
            self.held.lock().unwrap().remove(&key);
        }
    }

    fn setup(previous: Option<&str>, selection: Option<&str>) -> (Arc<Mutex<Board>>, FakeApp, FakeClipboard) {
        let board = Arc::new(Mutex::new(Board {
            text: previous.map(str::to_string),
            ..Board::default()
        }));
        let app = FakeApp::new(board.clone(), selection);
        (board.clone(), app, FakeClipboard(board))
    }

    #[tokio::test(start_paused = true)]
    async fn copies_selection_and_restores_clipboard() {
        let (board, app, mut clipboard) = setup(Some("user data"), Some("hello world"));

        let text = copy_selected_text(&app, &mut clipboard, WindowHandle(7)).await.unwrap();
        assert_eq!(text.as_deref(), Some("hello world"));
        assert_eq!(board.lock().unwrap().text.as_deref(), Some("user data"));
        assert_eq!(*app.log.lock().unwrap(), vec!["activate 7", "Copy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_copy_lands() {
        let (_board, app, mut clipboard) = setup(None, Some("late"));
        *app.copy_misses.lock().unwrap() = 2;

        let text = copy_selected_text(&app, &mut clipboard, WindowHandle(7)).await.unwrap();
        assert_eq!(text.as_deref(), Some("late"));
        assert_eq!(app.count("Copy"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_clipboard_text_is_not_returned() {
        let (board, app, mut clipboard) = setup(Some("old clipboard"), None);

        let text = copy_selected_text(&app, &mut clipboard, WindowHandle(7)).await.unwrap();
        assert_eq!(text, None);
        assert_eq!(app.count("Copy"), COPY_ATTEMPTS as usize);
        assert_eq!(board.lock().unwrap().text.as_deref(), Some("old clipboard"));
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_selection_counts_as_none() {
        let (_board, app, mut clipboard) = setup(None, Some("  \n "));
        let text = copy_selected_text(&app, &mut clipboard, WindowHandle(7)).await.unwrap();
        assert_eq!(text, None);
    }

    #[tokio::test(start_paused = true)]
    async fn held_modifier_is_released_after_timeout() {
        let (_board, app, mut clipboard) = setup(None, Some("x"));
        app.held.lock().unwrap().insert(ModifierKey::Control);

        let started = Instant::now();
        copy_selected_text(&app, &mut clipboard, WindowHandle(7)).await.unwrap();

        assert_eq!(app.count("release Control"), 1);
        assert!(started.elapsed() >= MODIFIER_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn paste_puts_text_then_restores() {
        let (board, app, mut clipboard) = setup(Some("keep me"), None);

        paste_text(&app, &mut clipboard, WindowHandle(3), "rewritten").await.unwrap();

        let board = board.lock().unwrap();
        assert_eq!(board.pasted, vec!["rewritten"]);
        assert_eq!(board.text.as_deref(), Some("keep me"));
        assert_eq!(*app.log.lock().unwrap(), vec!["activate 3", "Paste"]);
    }

    #[test]
    fn copy_text_and_image_replace_board() {
        let board = Arc::new(Mutex::new(Board::default()));
        let mut clipboard = FakeClipboard(board.clone());

        copy_text(&mut clipboard, "the reply").unwrap();
        assert_eq!(board.lock().unwrap().text.as_deref(), Some("the reply"));

        copy_image(&mut clipboard, &crate::session::tests::tiny_image()).unwrap();
        let board = board.lock().unwrap();
        assert_eq!(board.image, Some((10, 10)));
        assert!(board.text.is_none());
    }
}
