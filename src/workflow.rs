//! Capture workflows: overlay gesture, capture, then a fresh conversation.
//!
//! The overlay is always closed before the desktop is rasterized, and a short
//! settle delay lets the compositor drop it from the screen first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{self, CaptureError, CapturedImage, DesktopSource, UiRect};
use crate::llm::ChatBackend;
use crate::selection::{OverlayEvent, RegionSelector, SelectionOutcome};
use crate::session::ConversationSession;

/// Pause between closing the overlay and grabbing the screen.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// The transparent full-desktop surface the user drags on.
pub trait SelectionOverlay {
    /// Next input event, or `None` if the overlay went away.
    fn next_event(&mut self) -> impl Future<Output = Option<OverlayEvent>> + Send;
    fn close(&mut self);
}

/// Feed overlay events to a selector until the gesture ends, then close the
/// overlay. An overlay that stops producing events counts as cancelled.
pub async fn run_overlay(overlay: &mut impl SelectionOverlay) -> SelectionOutcome {
    let mut selector = RegionSelector::new();
    let outcome = loop {
        match overlay.next_event().await {
            Some(event) => {
                if let Some(outcome) = selector.handle(event) {
                    break outcome;
                }
            }
            None => break SelectionOutcome::Cancelled,
        }
    };
    overlay.close();
    log::info!("[SELECT] Gesture finished: {:?}", outcome);
    outcome
}

/// Let the user pick a region, capture it, and open a conversation on it.
///
/// `Ok(None)` means the user cancelled. A selection that ends up empty on the
/// desktop still opens a conversation, just without an image.
pub async fn select_region_then_prompt<B, D>(
    overlay: &mut impl SelectionOverlay,
    desktop: &D,
    backend: Arc<B>,
) -> Result<Option<ConversationSession<B>>, CaptureError>
where
    B: ChatBackend,
    D: DesktopSource + Clone + Send + 'static,
{
    let selection = match run_overlay(overlay).await {
        SelectionOutcome::Confirmed(rect) => Some(rect),
        SelectionOutcome::FullDesktop => None,
        SelectionOutcome::Cancelled => return Ok(None),
    };
    capture_into_session(desktop, selection, backend).await.map(Some)
}

/// Capture every monitor and open a conversation on the result.
pub async fn full_screen_then_prompt<B, D>(
    desktop: &D,
    backend: Arc<B>,
) -> Result<ConversationSession<B>, CaptureError>
where
    B: ChatBackend,
    D: DesktopSource + Clone + Send + 'static,
{
    capture_into_session(desktop, None, backend).await
}

/// Wait out the settle delay, then capture `selection` (or everything) on a
/// blocking thread.
pub async fn capture_region<D>(
    desktop: &D,
    selection: Option<UiRect>,
) -> Result<CapturedImage, CaptureError>
where
    D: DesktopSource + Clone + Send + 'static,
{
    tokio::time::sleep(SETTLE_DELAY).await;

    // Rasterizing and PNG encoding are CPU-bound; keep them off the runtime.
    let source = desktop.clone();
    tokio::task::spawn_blocking(move || capture::capture_selection(&source, selection.as_ref()))
        .await
        .map_err(|e| CaptureError::CaptureUnavailable(format!("capture task failed: {}", e)))?
}

async fn capture_into_session<B, D>(
    desktop: &D,
    selection: Option<UiRect>,
    backend: Arc<B>,
) -> Result<ConversationSession<B>, CaptureError>
where
    B: ChatBackend,
    D: DesktopSource + Clone + Send + 'static,
{
    match capture_region(desktop, selection).await {
        Ok(image) => Ok(ConversationSession::with_image(backend, image)),
        Err(CaptureError::InvalidRegion) => {
            log::warn!("[CAPTURE] Selection is outside the desktop, continuing without an image");
            Ok(ConversationSession::new(backend))
        }
        Err(e) => {
            log::error!("[CAPTURE] Capture failed: {}", e);
            Err(e)
        }
    }
}
