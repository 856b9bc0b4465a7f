//! Wavecast - personal media server with on-demand transcoding
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod library;
pub mod probe;
pub mod server;
pub mod streaming;
pub mod transcode;
