// src/browser/messages.rs

//! Payloads the refresh script running in the browser understands.

use serde::Serialize;

/// Tells every tab to reload the page.
pub const RELOAD_MESSAGE: &[u8] = b"Reload";

/// Tells every tab to show the "rebuilding" indicator.
pub const WAIT_MESSAGE: &[u8] = b"Wait";

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum BrowserMessage<'a> {
    UpdateStaticFile { path: &'a str },
}

/// Request to swap one static asset in place, keyed by its web-relative path.
pub fn update_static_file(path: &str) -> Vec<u8> {
    // A struct with one &str field always serializes.
    serde_json::to_vec(&BrowserMessage::UpdateStaticFile { path }).unwrap_or_default()
}
