//! AiSnapper: snip a screen region and chat about it with a vision model.
//!
//! This is the library behind the binary. It wires together:
//! - Screen capture domain (capture/) and the selection gesture (selection.rs)
//! - Chat-completions access (llm/) and conversations over a capture (session.rs)
//! - Quick Edit text rewriting (quick_edit.rs, text_bridge.rs)
//! - Global hotkeys (hotkey.rs) and the capture workflows (workflow.rs)

pub mod capture;
pub mod config;
pub mod console;
pub mod hotkey;
pub mod llm;
pub mod quick_edit;
pub mod selection;
pub mod session;
pub mod text_bridge;
pub mod workflow;

use std::sync::Arc;

use capture::XcapDesktop;
use config::Settings;
use llm::ChatClient;
use text_bridge::{Clipboard, SystemClipboard};

/// Entry point called by the binary.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let settings = Settings::from_env();
    log::info!("AiSnapper starting up ({:?})", settings);
    let client = Arc::new(ChatClient::new(&settings)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let mut clipboard = match SystemClipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(e) => {
            log::warn!("[CLIPBOARD] {}", e);
            None
        }
    };

    runtime.block_on(async {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut stdout = std::io::stdout();
        let clipboard = clipboard.as_mut().map(|c| c as &mut dyn Clipboard);
        console::run_console(client, &XcapDesktop, clipboard, stdin, &mut stdout).await
    })?;

    log::info!("AiSnapper shutting down");
    Ok(())
}
