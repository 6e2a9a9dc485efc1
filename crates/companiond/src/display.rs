//! Display sink interface. The heartbeat loop and chat front-ends drive a
//! face/status display through this trait only — neither imports a concrete
//! display implementation, so a headless run just plugs in [`NullDisplay`].

use async_trait::async_trait;

#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Pushes a new face/text/status frame. `force` bypasses any
    /// debounce/dedup the implementation applies to identical frames.
    async fn update(&self, face: &str, text: Option<&str>, mood_text: Option<&str>, status: Option<&str>, force: bool);

    /// Shows `text` across however many pages it takes, `page_delay_ms`
    /// between pages, optionally looping. Returns the number of pages shown.
    async fn show_message_paginated(&self, text: &str, face: &str, page_delay_ms: u64, loop_pages: bool) -> u32;

    async fn set_mode(&self, mode_name: &str);
    async fn increment_chat_count(&self);
    async fn should_activate_screensaver(&self) -> bool;
    async fn start_screensaver(&self);
    async fn stop_screensaver(&self);
}

/// A display sink that does nothing — used headless and in tests.
#[derive(Debug, Default)]
pub struct NullDisplay;

#[async_trait]
impl DisplaySink for NullDisplay {
    async fn update(&self, _face: &str, _text: Option<&str>, _mood_text: Option<&str>, _status: Option<&str>, _force: bool) {}

    async fn show_message_paginated(&self, text: &str, _face: &str, _page_delay_ms: u64, _loop_pages: bool) -> u32 {
        text.len().div_ceil(200).max(1) as u32
    }

    async fn set_mode(&self, _mode_name: &str) {}
    async fn increment_chat_count(&self) {}
    async fn should_activate_screensaver(&self) -> bool {
        false
    }
    async fn start_screensaver(&self) {}
    async fn stop_screensaver(&self) {}
}
