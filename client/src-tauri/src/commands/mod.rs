//! Tauri Commands
//!
//! Bridge between the frontend and the voice core.

pub mod screen_share;
pub mod voice;
pub mod webcam;
pub mod websocket;
