//! voice-loop: hands-free voice interaction daemon
//!
//! Captures speech, detects the end of a turn from silence, hands the
//! transcript to a chat backend and speaks the reply, optionally listening
//! again afterwards. A Unix socket exposes the controller to UI clients.

pub mod config;
pub mod engine;
pub mod events;
pub mod ipc;
pub mod lifecycle;
pub mod relay;
pub mod voice;
