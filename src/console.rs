//! Terminal front-end: one full-desktop capture, then a prompt loop.
//!
//! Replies stream to the output as they arrive. `/capture` retakes the
//! screenshot before the first prompt, `/copy` and `/copyimage` put the last
//! reply or the screenshot on the clipboard, `/quit` exits.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::capture::DesktopSource;
use crate::llm::ChatBackend;
use crate::session::{ConversationSession, StreamOutcome};
use crate::text_bridge::{self, Clipboard};
use crate::workflow;

const QUIT: &str = "/quit";
const RECAPTURE: &str = "/capture";
const COPY_REPLY: &str = "/copy";
const COPY_IMAGE: &str = "/copyimage";

/// `clipboard` is `None` when the system clipboard could not be opened; the
/// copy commands then only report that.
pub async fn run_console<B, D, R, W>(
    backend: Arc<B>,
    desktop: &D,
    mut clipboard: Option<&mut dyn Clipboard>,
    input: R,
    output: &mut W,
) -> std::io::Result<()>
where
    B: ChatBackend,
    D: DesktopSource + Clone + Send + 'static,
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    let session = match workflow::full_screen_then_prompt(desktop, backend.clone()).await {
        Ok(session) => {
            if let Some(image) = session.pending_image() {
                writeln!(output, "Captured {}x{} desktop.", image.width(), image.height())?;
            }
            session
        }
        Err(e) => {
            writeln!(output, "{}. Continuing without an image.", e)?;
            ConversationSession::new(backend)
        }
    };
    writeln!(output, "Ask about the screenshot. {} retakes it, {} exits.", RECAPTURE, QUIT)?;

    let mut lines = input.lines();
    loop {
        write!(output, "> ")?;
        output.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            QUIT => break,
            RECAPTURE => {
                recapture(&session, desktop, output).await?;
                continue;
            }
            COPY_REPLY | COPY_IMAGE => {
                copy_to_clipboard(line, &session, clipboard.as_deref_mut(), output)?;
                continue;
            }
            _ => {}
        }

        match session.submit_prompt(line) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                writeln!(output, "{}", e)?;
                continue;
            }
        }

        let mut write_failed = false;
        let outcome = session
            .request_assistant_reply_streaming(
                |delta: &str| {
                    if let Err(e) = output.write_all(delta.as_bytes()).and_then(|()| output.flush()) {
                        if !write_failed {
                            log::warn!("[SESSION] Could not write reply to the terminal: {}", e);
                            write_failed = true;
                        }
                    }
                },
                |_| {},
            )
            .await;

        match outcome {
            StreamOutcome::Completed(_) | StreamOutcome::Cancelled(_) => writeln!(output)?,
            StreamOutcome::Failed(e) => writeln!(output, "{}", e.display_text())?,
        }
    }

    log::info!("[SESSION] Console closed after {} turns", session.turns().len());
    Ok(())
}

fn copy_to_clipboard<B, W>(
    command: &str,
    session: &ConversationSession<B>,
    clipboard: Option<&mut (dyn Clipboard + '_)>,
    output: &mut W,
) -> std::io::Result<()>
where
    B: ChatBackend,
    W: Write,
{
    let Some(clipboard) = clipboard else {
        writeln!(output, "Clipboard unavailable.")?;
        return Ok(());
    };

    let copied = if command == COPY_IMAGE {
        match session.captured_image() {
            Some(image) => text_bridge::copy_image(clipboard, &image).map(|()| "Screenshot copied."),
            None => Ok("No screenshot to copy."),
        }
    } else {
        match session.last_reply() {
            Some(reply) => text_bridge::copy_text(clipboard, &reply).map(|()| "Reply copied."),
            None => Ok("No reply to copy yet."),
        }
    };

    match copied {
        Ok(message) => writeln!(output, "{}", message),
        Err(e) => {
            log::warn!("[CLIPBOARD] {} failed: {}", command, e);
            writeln!(output, "{}", e)
        }
    }
}

async fn recapture<B, D, W>(
    session: &ConversationSession<B>,
    desktop: &D,
    output: &mut W,
) -> std::io::Result<()>
where
    B: ChatBackend,
    D: DesktopSource + Clone + Send + 'static,
    W: Write,
{
    if session.has_user_turn() {
        writeln!(output, "The screenshot is already part of this conversation.")?;
        return Ok(());
    }
    match workflow::capture_region(desktop, None).await {
        Ok(image) => {
            let (w, h) = (image.width(), image.height());
            match session.set_pending_image(image) {
                Ok(()) => writeln!(output, "Captured {}x{} desktop.", w, h)?,
                Err(e) => writeln!(output, "{}", e)?,
            }
        }
        Err(e) => writeln!(output, "{}", e)?,
    }
    Ok(())
}
