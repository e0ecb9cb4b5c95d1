//! clawwatch library
//!
//! Session catalog, archive store, retention policy and the HTTP dashboard
//! API for monitoring OpenClaw agent sessions.

pub mod auth;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod sessions;
pub mod transcript;
pub mod update;
